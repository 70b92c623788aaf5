//! Error types for virta

use thiserror::Error;

pub use virta_core::PluginError;

use crate::pipeline::LifecycleState;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
///
/// Only configuration problems and lifecycle misuse surface here. Everything
/// an input, filter or output does wrong at runtime is reported to health
/// instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration error, fatal before `start()`
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation not allowed in the current lifecycle state
    #[error("cannot {operation} a pipeline in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// Plugin error surfaced while building the pipeline
    #[error("plugin '{plugin}' error: {message}")]
    Plugin { plugin: String, message: String },
}

impl PipelineError {
    /// Attribute a plugin error to a named plugin
    pub fn plugin(plugin: impl Into<String>, err: PluginError) -> Self {
        PipelineError::Plugin {
            plugin: plugin.into(),
            message: err.to_string(),
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Configuration errors
///
/// Every variant carries enough context to be printed as-is to an operator.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No factory is registered for a kind
    #[error("unknown {category} kind '{kind}'")]
    UnknownKind {
        category: &'static str,
        kind: String,
    },

    /// A factory rejected its item configuration
    #[error("invalid {kind} configuration: {reason}")]
    InvalidItem { kind: String, reason: String },

    /// A numeric or duration setting is out of range
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Two sinks share a name
    #[error("duplicate sink name '{0}'")]
    DuplicateSink(String),

    /// The configuration document could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidItem`]
    pub fn invalid_item(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidItem {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ConfigError::InvalidValue`]
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
