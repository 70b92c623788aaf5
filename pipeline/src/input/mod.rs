//! Built-in inputs
//!
//! - [`HeartbeatInput`] - periodic liveness events (`heartbeat`)
//! - [`JsonLinesInput`] - newline-delimited JSON events from stdin or any
//!   async reader (`stdin`)
//! - [`ChannelInput`] - programmatic in-process input fed through a
//!   [`ChannelInputHandle`]
//!
//! Real deployments add their own inputs by implementing
//! [`virta_core::Input`] and registering a factory with
//! [`crate::ItemRegistry`].

mod channel;
mod heartbeat;
mod json_lines;

pub use channel::{ChannelInput, ChannelInputHandle};
pub use heartbeat::{HeartbeatInput, HEARTBEAT_PROVIDER};
pub use json_lines::JsonLinesInput;
