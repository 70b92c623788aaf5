//! virta-core - Event model and plugin contracts for the virta pipeline
//!
//! This crate holds everything a plugin author needs and nothing more:
//!
//! - [`Event`] / [`Level`] - the normalized event shape
//! - [`Input`] / [`EventObserver`] / [`Subscription`] - the producer contract
//! - [`Output`] - the batch delivery contract
//! - [`Filter`] - the per-event predicate/transform contract
//! - [`HealthReporter`] - where plugins report their own transient trouble
//! - [`PluginError`] - error type for plugin operations
//!
//! # Why this crate exists
//!
//! Third-party inputs and outputs implement these traits without pulling in
//! the pipeline engine, and the engine can depend on such plugins without a
//! cycle:
//!
//! ```text
//! virta-core ◄── virta-pipeline
//!     ▲
//!     └────────── my-kafka-output
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
/// The normalized event shape
pub mod event;
mod filter;
/// Health reporting contract
pub mod health;
mod input;
mod output;

pub use error::PluginError;
pub use event::{Context, Event, Level, ParseLevelError, Payload};
pub use filter::Filter;
pub use health::{HealthReport, HealthReporter, HealthSeverity, NullHealthReporter};
pub use input::{EventObserver, Input, Subscription};
pub use output::Output;

/// Re-exported so plugins name the same token type the pipeline uses
pub use tokio_util::sync::CancellationToken;
