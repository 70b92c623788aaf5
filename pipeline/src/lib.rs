//! virta - diagnostics pipeline core
//!
//! Collects events from any number of inputs, filters them, batches them
//! per sink and delivers the batches to outputs, while reporting its own
//! health through a throttled channel.
//!
//! # Architecture
//!
//! ```text
//! Inputs ──► global filters ──► BufferingEngine ──┬─► sink filters ──► Output A
//!                                                 └─► sink filters ──► Output B
//!                 │                     │
//!                 └──────► HealthRegistry (throttled per source)
//! ```
//!
//! Each sink has its own bounded queue and dispatch task, so a slow output
//! never holds up another sink. Failures inside an input, filter or output
//! are reported to health and isolated; only configuration errors surface to
//! the caller, and only at build time.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod health;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod sink;

pub use buffer::{OverflowPolicy, PushOutcome, SinkQueue};
pub use config::{HealthBackend, HealthConfig, ItemConfig, PipelineConfig, SettingsConfig, SinkConfig};
pub use engine::{BatchSettings, BufferingEngine, ShutdownSummary, SinkStats};
pub use error::{ConfigError, PipelineError, Result};
pub use filter::{
    DropFilter, Expression, ExpressionError, FilterChain, IncludeFilter, LevelFilter,
    MetadataFilter, Predicate, Transform,
};
pub use health::{
    CsvHealthReporter, HealthRegistry, MemoryHealthReporter, Throttle, ThrottledReporter,
    TracingHealthReporter, DEFAULT_THROTTLE_WINDOW,
};
pub use input::{ChannelInput, ChannelInputHandle, HeartbeatInput, JsonLinesInput};
pub use output::{BackoffConfig, HttpOutput, RetryOutput, StdoutFormat, StdoutOutput};
pub use pipeline::{LifecycleState, Pipeline, PipelineBuilder};
pub use registry::{parse_settings, ItemRegistry};
pub use sink::Sink;

pub use virta_core::{
    CancellationToken, Context, Event, EventObserver, Filter, HealthReport, HealthReporter,
    HealthSeverity, Input, Level, Output, Payload, PluginError, Subscription,
};
