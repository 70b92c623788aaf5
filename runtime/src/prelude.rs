//! Convenience re-exports for pipeline authors.
//!
//! ```rust
//! use virta_runtime::prelude::*;
//! ```

// Event model and plugin contracts
pub use virta_core::{
    CancellationToken, Context, Event, EventObserver, Filter, HealthReport, HealthReporter,
    HealthSeverity, Input, Level, Output, Payload, PluginError, Subscription,
};

// Pipeline
pub use virta_pipeline::{
    BatchSettings, LifecycleState, OverflowPolicy, Pipeline, PipelineBuilder, Sink, SinkStats,
};

// Configuration and registry
pub use virta_pipeline::{parse_settings, ConfigError, ItemConfig, ItemRegistry, PipelineConfig};

// Filters
pub use virta_pipeline::{
    DropFilter, Expression, FilterChain, IncludeFilter, LevelFilter, MetadataFilter, Predicate,
    Transform,
};

// Built-in inputs and outputs
pub use virta_pipeline::{
    BackoffConfig, ChannelInput, ChannelInputHandle, HeartbeatInput, HttpOutput, JsonLinesInput,
    RetryOutput, StdoutOutput,
};

// Health backends
pub use virta_pipeline::{CsvHealthReporter, MemoryHealthReporter, TracingHealthReporter};

// Runtime
pub use crate::{serve, RuntimeBuilder};
