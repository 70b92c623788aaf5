//! Built-in outputs
//!
//! - [`StdoutOutput`] - prints batches for development and debugging (`stdout`)
//! - [`HttpOutput`] - POSTs each batch as a JSON array (`http`)
//! - [`RetryOutput`] - decorator adding exponential backoff to any output
//!
//! Retries are an output concern: the engine hands each batch to `send`
//! exactly once.

mod http;
mod retry;
mod stdout;

pub use http::{HttpOutput, SEQUENCE_HEADER};
pub use retry::{BackoffConfig, RetryOutput};
pub use stdout::{StdoutFormat, StdoutOutput};
