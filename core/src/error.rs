//! Error types for virta plugins

use thiserror::Error;

/// Error type for plugin operations
///
/// Shared by inputs, filters and outputs. The pipeline never lets one of
/// these escape to its caller: every plugin error is caught at the
/// orchestrator boundary and turned into a health report.
///
/// # Example
///
/// ```
/// use virta_core::PluginError;
///
/// fn connect() -> Result<(), PluginError> {
///     Err(PluginError::Connection("refused".to_string()))
/// }
///
/// match connect() {
///     Ok(_) => println!("connected"),
///     Err(PluginError::Connection(msg)) => println!("connection failed: {msg}"),
///     Err(e) => println!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Initialization failed
    ///
    /// Examples: failed to open a source, missing credentials.
    #[error("initialization failed: {0}")]
    Init(String),

    /// An input could not decode a source record into an event
    #[error("decode failed: {0}")]
    Decode(String),

    /// A filter failed while processing one event
    #[error("filter failed: {0}")]
    Filter(String),

    /// Send failed
    ///
    /// Examples: server rejected request, quota exceeded.
    #[error("send failed: {0}")]
    Send(String),

    /// Connection error
    ///
    /// Examples: DNS lookup failed, connection refused, TLS handshake error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation did not finish within its time bound
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The operation observed its cancellation signal and gave up
    #[error("operation cancelled")]
    Cancelled,

    /// Not ready
    ///
    /// Returned when a plugin is used before it can serve requests, or when
    /// a non-restartable input is subscribed a second time.
    #[error("plugin not ready")]
    NotReady,

    /// Shutdown error
    ///
    /// Examples: failed to flush buffers, connection close failed.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl PluginError {
    /// Build a [`PluginError::Timeout`] from a duration
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout(u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
    }
}
