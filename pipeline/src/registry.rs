//! Item registry for virta
//!
//! Maps a configuration entry's `type` to a factory that builds the concrete
//! input, filter or output. Factories validate their own settings eagerly, so
//! every configuration mistake surfaces from [`ItemRegistry::build_pipeline`]
//! before a pipeline exists.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = ItemRegistry::with_builtins();
//! registry.register_output("kafka", |item| {
//!     let settings: KafkaSettings = parse_settings(item)?;
//!     Ok(Arc::new(KafkaOutput::new(item.display_name(), settings)))
//! });
//!
//! let config = PipelineConfig::from_file("virta.json")?;
//! let pipeline = registry.build_pipeline(&config)?;
//! ```

use crate::config::{ItemConfig, PipelineConfig};
use crate::error::{ConfigError, Result};
use crate::filter::{DropFilter, Expression, FilterChain, IncludeFilter, LevelFilter, MetadataFilter};
use crate::input::{HeartbeatInput, JsonLinesInput};
use crate::output::{BackoffConfig, HttpOutput, RetryOutput, StdoutFormat, StdoutOutput};
use crate::pipeline::Pipeline;
use crate::sink::Sink;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use virta_core::{Context, Filter, Input, Level, Output};

/// Builds an input from its configuration entry
pub type InputFactory = Box<dyn Fn(&ItemConfig) -> std::result::Result<Arc<dyn Input>, ConfigError> + Send + Sync>;

/// Builds a filter from its configuration entry
pub type FilterFactory = Box<dyn Fn(&ItemConfig) -> std::result::Result<Arc<dyn Filter>, ConfigError> + Send + Sync>;

/// Builds an output from its configuration entry
pub type OutputFactory = Box<dyn Fn(&ItemConfig) -> std::result::Result<Arc<dyn Output>, ConfigError> + Send + Sync>;

/// Deserialize an item's settings into its typed configuration struct
///
/// Serde's message names the offending field, e.g.
/// `invalid http configuration: missing field `endpoint``.
pub fn parse_settings<T: DeserializeOwned>(item: &ItemConfig) -> std::result::Result<T, ConfigError> {
    serde_json::from_value(serde_json::Value::Object(item.settings.clone()))
        .map_err(|e| ConfigError::invalid_item(&item.kind, e.to_string()))
}

fn parse_expression(kind: &str, source: &str) -> std::result::Result<Expression, ConfigError> {
    Expression::parse(source)
        .map_err(|e| ConfigError::invalid_item(kind, format!("expression '{source}': {e}")))
}

/// Registry of input, filter and output factories
///
/// Typically populated at startup and then used read-only to build
/// pipelines.
#[derive(Default)]
pub struct ItemRegistry {
    inputs: HashMap<String, InputFactory>,
    filters: HashMap<String, FilterFactory>,
    outputs: HashMap<String, OutputFactory>,
}

impl ItemRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind
    ///
    /// Inputs `heartbeat`, `stdin`; filters `drop`, `include`, `level`,
    /// `metadata`; outputs `stdout`, `http`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_input("heartbeat", |item| {
            let settings: HeartbeatSettings = parse_settings(item)?;
            if settings.interval_ms == 0 {
                return Err(ConfigError::invalid_item(&item.kind, "intervalMs must be positive"));
            }
            Ok(Arc::new(HeartbeatInput::new(
                item.display_name(),
                Duration::from_millis(settings.interval_ms),
            )))
        });
        registry.register_input("stdin", |item| {
            let _: NoSettings = parse_settings(item)?;
            Ok(Arc::new(JsonLinesInput::stdin(item.display_name())))
        });

        registry.register_filter("drop", |item| {
            let settings: ExpressionSettings = parse_settings(item)?;
            Ok(Arc::new(DropFilter::new(parse_expression(&item.kind, &settings.expression)?)))
        });
        registry.register_filter("include", |item| {
            let settings: ExpressionSettings = parse_settings(item)?;
            Ok(Arc::new(IncludeFilter::new(parse_expression(&item.kind, &settings.expression)?)))
        });
        registry.register_filter("level", |item| {
            let settings: LevelSettings = parse_settings(item)?;
            Ok(Arc::new(LevelFilter::new(settings.min_level)))
        });
        registry.register_filter("metadata", |item| {
            let settings: MetadataSettings = parse_settings(item)?;
            if settings.metadata.is_empty() {
                return Err(ConfigError::invalid_item(&item.kind, "metadata must not be empty"));
            }
            let mut filter = MetadataFilter::new(settings.metadata);
            if let Some(when) = &settings.when {
                filter = filter.when(parse_expression(&item.kind, when)?);
            }
            Ok(Arc::new(filter))
        });

        registry.register_output("stdout", |item| {
            let settings: StdoutSettings = parse_settings(item)?;
            Ok(Arc::new(StdoutOutput::new(item.display_name(), settings.format)))
        });
        registry.register_output("http", |item| {
            let settings: HttpSettings = parse_settings(item)?;
            let timeout = settings
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(10));
            let mut output = HttpOutput::with_timeout(item.display_name(), settings.endpoint, timeout)
                .map_err(|e| ConfigError::invalid_item(&item.kind, e.to_string()))?;
            for (key, value) in settings.headers {
                output = output.header(key, value);
            }
            let output: Arc<dyn Output> = match settings.retry {
                Some(backoff) => Arc::new(RetryOutput::new(Arc::new(output), backoff)),
                None => Arc::new(output),
            };
            Ok(output)
        });

        registry
    }

    /// Register an input factory for `kind`, replacing any previous one
    pub fn register_input<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ItemConfig) -> std::result::Result<Arc<dyn Input>, ConfigError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!(kind = %kind, "Registered input kind");
        self.inputs.insert(kind, Box::new(factory));
    }

    /// Register a filter factory for `kind`, replacing any previous one
    pub fn register_filter<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ItemConfig) -> std::result::Result<Arc<dyn Filter>, ConfigError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!(kind = %kind, "Registered filter kind");
        self.filters.insert(kind, Box::new(factory));
    }

    /// Register an output factory for `kind`, replacing any previous one
    pub fn register_output<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ItemConfig) -> std::result::Result<Arc<dyn Output>, ConfigError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!(kind = %kind, "Registered output kind");
        self.outputs.insert(kind, Box::new(factory));
    }

    /// Check if an input kind is registered
    pub fn has_input(&self, kind: &str) -> bool {
        self.inputs.contains_key(kind)
    }

    /// Check if a filter kind is registered
    pub fn has_filter(&self, kind: &str) -> bool {
        self.filters.contains_key(kind)
    }

    /// Check if an output kind is registered
    pub fn has_output(&self, kind: &str) -> bool {
        self.outputs.contains_key(kind)
    }

    /// Build one input
    pub fn create_input(&self, item: &ItemConfig) -> std::result::Result<Arc<dyn Input>, ConfigError> {
        let factory = self.inputs.get(&item.kind).ok_or_else(|| ConfigError::UnknownKind {
            category: "input",
            kind: item.kind.clone(),
        })?;
        factory(item)
    }

    /// Build one filter
    pub fn create_filter(&self, item: &ItemConfig) -> std::result::Result<Arc<dyn Filter>, ConfigError> {
        let factory = self.filters.get(&item.kind).ok_or_else(|| ConfigError::UnknownKind {
            category: "filter",
            kind: item.kind.clone(),
        })?;
        factory(item)
    }

    /// Build one output
    pub fn create_output(&self, item: &ItemConfig) -> std::result::Result<Arc<dyn Output>, ConfigError> {
        let factory = self.outputs.get(&item.kind).ok_or_else(|| ConfigError::UnknownKind {
            category: "output",
            kind: item.kind.clone(),
        })?;
        factory(item)
    }

    /// Build a filter chain, skipping entries identical to an earlier one
    pub fn create_filter_chain(&self, items: &[ItemConfig]) -> std::result::Result<FilterChain, ConfigError> {
        let mut chain = FilterChain::new();
        let mut seen: Vec<&ItemConfig> = Vec::with_capacity(items.len());

        for item in items {
            if seen.iter().any(|earlier| earlier.same_payload(item)) {
                warn!(kind = %item.kind, name = item.display_name(), "Duplicate filter configuration skipped");
                continue;
            }
            chain.push(self.create_filter(item)?);
            seen.push(item);
        }
        Ok(chain)
    }

    /// Build a ready-to-start pipeline from a configuration document
    ///
    /// # Errors
    ///
    /// Unknown kinds, invalid item settings, out-of-range batching values,
    /// duplicate sink names and an unusable health backend are all
    /// [`ConfigError`]s.
    pub fn build_pipeline(&self, config: &PipelineConfig) -> Result<Pipeline> {
        let mut builder = Pipeline::builder()
            .settings(config.settings.to_batch_settings())
            .health_reporter(config.health.build_reporter()?)
            .health_throttle(config.health.throttle_window())
            .filters(self.create_filter_chain(&config.filters)?);

        for item in &config.inputs {
            builder = builder.input(self.create_input(item)?);
        }
        for sink in &config.outputs {
            let output = self.create_output(&sink.output)?;
            let filters = self.create_filter_chain(&sink.filters)?;
            builder = builder.sink(Sink::new(sink.name(), output).with_filters(filters));
        }

        let pipeline = builder.build()?;
        info!(
            inputs = config.inputs.len(),
            sinks = config.outputs.len(),
            "Pipeline built from configuration"
        );
        Ok(pipeline)
    }
}

// ============================================================================
// Built-in item settings
// ============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoSettings {}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HeartbeatSettings {
    interval_ms: u64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpressionSettings {
    expression: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LevelSettings {
    min_level: Level,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MetadataSettings {
    metadata: Context,
    when: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StdoutSettings {
    #[serde(default)]
    format: StdoutFormat,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HttpSettings {
    endpoint: String,
    timeout_ms: Option<u64>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    retry: Option<BackoffConfig>,
}
