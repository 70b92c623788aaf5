//! Pipeline configuration document
//!
//! A JSON document describing inputs, global filters, outputs (sinks) and
//! batching settings. Parsing only produces typed values; turning item
//! entries into plugins is the job of [`crate::registry::ItemRegistry`].
//!
//! ```json
//! {
//!   "inputs":  [{ "type": "stdin" }],
//!   "filters": [{ "type": "level", "minLevel": "Warning" }],
//!   "outputs": [
//!     { "type": "stdout", "name": "console", "format": "pretty" },
//!     { "type": "http", "endpoint": "https://collector.local/ingest",
//!       "filters": [{ "type": "drop", "expression": "providerName == noisy" }] }
//!   ],
//!   "settings": { "overflowPolicy": "dropOldest", "maxBatchSize": 50, "maxBatchDelayMs": 500 },
//!   "health": { "type": "csv", "path": "/var/log/virta-health.csv", "throttleMs": 1000 }
//! }
//! ```

use crate::buffer::OverflowPolicy;
use crate::engine::BatchSettings;
use crate::error::ConfigError;
use crate::health::{CsvHealthReporter, TracingHealthReporter, DEFAULT_THROTTLE_WINDOW};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use virta_core::HealthReporter;

/// Root configuration document
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub inputs: Vec<ItemConfig>,
    /// Global filter chain, in order
    #[serde(default)]
    pub filters: Vec<ItemConfig>,
    /// One sink per entry
    #[serde(default)]
    pub outputs: Vec<SinkConfig>,
    pub settings: SettingsConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl PipelineConfig {
    /// Parse a JSON document
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// One configured input, filter or output
///
/// `type` selects the factory; every other field is the kind's own settings
/// and is validated by that factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Instance name; defaults to the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ItemConfig {
    /// Item with no settings
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            settings: Map::new(),
        }
    }

    /// Set the instance name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a setting
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Instance name, falling back to the kind
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    /// Whether two entries configure the same thing (name aside)
    pub fn same_payload(&self, other: &ItemConfig) -> bool {
        self.kind == other.kind && self.settings == other.settings
    }
}

/// One sink: an output entry plus its own filters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub filters: Vec<ItemConfig>,
    #[serde(flatten)]
    pub output: ItemConfig,
}

impl SinkConfig {
    /// Sink name: the output's name, or its kind
    pub fn name(&self) -> &str {
        self.output.display_name()
    }
}

/// Batching settings as written in the document
///
/// Only `overflowPolicy` is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsConfig {
    pub overflow_policy: OverflowPolicy,
    pub max_batch_size: Option<usize>,
    pub max_batch_delay_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub block_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
}

impl SettingsConfig {
    /// Typed settings with defaults filled in (not yet validated)
    pub fn to_batch_settings(&self) -> BatchSettings {
        let mut settings = BatchSettings::new(self.overflow_policy);
        if let Some(size) = self.max_batch_size {
            settings.max_batch_size = size;
        }
        if let Some(ms) = self.max_batch_delay_ms {
            settings.max_batch_delay = Duration::from_millis(ms);
        }
        if let Some(capacity) = self.queue_capacity {
            settings.queue_capacity = capacity;
        }
        if let Some(ms) = self.block_timeout_ms {
            settings.block_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = self.send_timeout_ms {
            settings.send_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.drain_timeout_ms {
            settings.drain_timeout = Duration::from_millis(ms);
        }
        settings
    }
}

/// Health backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBackend {
    #[default]
    Tracing,
    Csv,
}

/// Health section of the document
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(rename = "type", default)]
    pub backend: HealthBackend,
    /// CSV file, required for the `csv` backend
    pub path: Option<PathBuf>,
    /// Per-source throttle window; 0 disables throttling
    pub throttle_ms: Option<u64>,
}

impl HealthConfig {
    /// Throttle window, defaulting to one second
    pub fn throttle_window(&self) -> Duration {
        self.throttle_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_THROTTLE_WINDOW)
    }

    /// Construct the configured backend
    pub fn build_reporter(&self) -> Result<Arc<dyn HealthReporter>, ConfigError> {
        match self.backend {
            HealthBackend::Tracing => Ok(Arc::new(TracingHealthReporter)),
            HealthBackend::Csv => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::invalid_value("health.path", "required for the csv backend")
                })?;
                Ok(Arc::new(CsvHealthReporter::open(path)?))
            }
        }
    }
}
