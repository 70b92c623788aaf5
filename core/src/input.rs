//! Input trait for virta plugins
//!
//! An [`Input`] is a live, possibly infinite, non-restartable source of
//! events. The pipeline subscribes once with an [`EventObserver`] and keeps
//! the returned [`Subscription`] until shutdown.

use crate::error::PluginError;
use crate::event::Event;
use crate::health::HealthReporter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Callback side of a subscription
///
/// `on_event` may suspend: when a sink queue is full under the `block`
/// overflow policy the await only completes once there is room, which is how
/// backpressure reaches the producer.
#[async_trait]
pub trait EventObserver: Send + Sync {
    /// Deliver one event
    async fn on_event(&self, event: Event);

    /// Report a per-event error (bad record, transient read failure)
    ///
    /// Errors delivered here never end the subscription.
    fn on_error(&self, error: PluginError);
}

/// Input trait - produces events for the pipeline
///
/// # Implementation Requirements
///
/// - `subscribe` returns an error only when the input cannot start at all.
///   Per-event failures go through [`EventObserver::on_error`].
/// - The producer must stop promptly once the subscription's token is
///   cancelled.
/// - Inputs are not restartable: a second `subscribe` should fail with
///   [`PluginError::NotReady`].
///
/// # Example
///
/// ```ignore
/// struct Ticker;
///
/// #[async_trait]
/// impl Input for Ticker {
///     fn name(&self) -> &str {
///         "ticker"
///     }
///
///     async fn subscribe(
///         &self,
///         observer: Arc<dyn EventObserver>,
///     ) -> Result<Subscription, PluginError> {
///         let cancel = CancellationToken::new();
///         let token = cancel.clone();
///         let task = tokio::spawn(async move {
///             while !token.is_cancelled() {
///                 observer.on_event(Event::new("ticker", Level::Verbose)).await;
///                 tokio::time::sleep(Duration::from_secs(1)).await;
///             }
///         });
///         Ok(Subscription::new(cancel, task))
///     }
/// }
/// ```
#[async_trait]
pub trait Input: Send + Sync {
    /// Instance name, used for health attribution and logging
    fn name(&self) -> &str;

    /// Start producing events into `observer`
    async fn subscribe(&self, observer: Arc<dyn EventObserver>)
        -> Result<Subscription, PluginError>;

    /// Receive the reporter this input should use for its own transient
    /// errors. Called once before `subscribe`; the default ignores it.
    fn bind_health(&self, _reporter: Arc<dyn HealthReporter>) {}
}

/// Handle to a running subscription
///
/// Dropping the handle cancels the producer without waiting for it.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Subscription backed by a spawned producer task
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Subscription with no task of its own (the producer lives elsewhere
    /// and watches the token)
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { cancel, task: None }
    }

    /// The token the producer watches
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the producer and wait up to `grace` for it to exit
    ///
    /// Returns `false` if the producer had to be aborted.
    pub async fn unsubscribe(mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return true;
        };
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                task.abort();
                false
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
