//! Output trait for virta plugins
//!
//! The [`Output`] trait is the delivery side of the pipeline. Each sink owns
//! exactly one output and hands it ordered, sequence-numbered batches.

use crate::error::PluginError;
use crate::event::Event;
use crate::health::HealthReporter;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output trait - delivers batches of events to a destination
///
/// # Implementation Requirements
///
/// - `send` is called by one dispatch task per sink, so calls for the same
///   sink never overlap and arrive in increasing `sequence` order.
/// - Honor `cancel` promptly. Check it between per-event work units and race
///   long I/O against `cancel.cancelled()`. A cancelled send should return
///   [`PluginError::Cancelled`].
/// - Routine transient failures should be reported through the reporter
///   given to [`Output::bind_health`]; the pipeline does not retry failed
///   batches.
///
/// # Example
///
/// ```ignore
/// struct HttpOutput {
///     client: reqwest::Client,
///     endpoint: String,
/// }
///
/// #[async_trait]
/// impl Output for HttpOutput {
///     fn name(&self) -> &str {
///         "http"
///     }
///
///     async fn send(
///         &self,
///         batch: &[Event],
///         sequence: u64,
///         cancel: &CancellationToken,
///     ) -> Result<(), PluginError> {
///         let request = self.client.post(&self.endpoint).json(batch).send();
///         tokio::select! {
///             _ = cancel.cancelled() => Err(PluginError::Cancelled),
///             resp = request => resp
///                 .map(|_| ())
///                 .map_err(|e| PluginError::Send(e.to_string())),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Output: Send + Sync {
    /// Instance name (usually the sink name)
    fn name(&self) -> &str;

    /// Deliver one batch
    ///
    /// # Arguments
    ///
    /// * `batch` - Events in arrival order. Never empty.
    /// * `sequence` - Per-sink transmission sequence number, starting at 0
    /// * `cancel` - Fires when the pipeline stops and the grace period ends
    async fn send(
        &self,
        batch: &[Event],
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<(), PluginError>;

    /// Graceful shutdown, called after the sink has drained
    ///
    /// The default implementation returns `Ok(())`.
    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Receive the reporter this output should use for transient errors
    ///
    /// Called once when the pipeline is built; the default ignores it.
    fn bind_health(&self, _reporter: Arc<dyn HealthReporter>) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event::Level;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingOutput {
        events: AtomicU64,
        last_sequence: AtomicU64,
    }

    #[async_trait]
    impl Output for CountingOutput {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(
            &self,
            batch: &[Event],
            sequence: u64,
            cancel: &CancellationToken,
        ) -> Result<(), PluginError> {
            if cancel.is_cancelled() {
                return Err(PluginError::Cancelled);
            }
            self.events.fetch_add(batch.len() as u64, Ordering::Relaxed);
            self.last_sequence.store(sequence, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn output_is_object_safe_and_default_shutdown_succeeds() {
        let output: Arc<dyn Output> = Arc::new(CountingOutput {
            events: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
        });
        let batch = vec![Event::new("x", Level::Warning); 3];
        let cancel = CancellationToken::new();

        output.send(&batch, 7, &cancel).await.unwrap();
        assert!(output.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_send_reports_cancelled() {
        let output = CountingOutput {
            events: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = output.send(&[Event::new("x", Level::Error)], 0, &cancel).await;
        assert_eq!(result, Err(PluginError::Cancelled));
        assert_eq!(output.events.load(Ordering::Relaxed), 0);
    }
}
