//! Heartbeat input
//!
//! Emits one Informational event per interval so an otherwise idle pipeline
//! still proves end-to-end liveness to its outputs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use virta_core::{Event, EventObserver, Input, Level, PluginError, Subscription};

/// Provider name stamped on every heartbeat event
pub const HEARTBEAT_PROVIDER: &str = "virta.heartbeat";

/// Periodic liveness input
pub struct HeartbeatInput {
    name: String,
    interval: Duration,
    subscribed: AtomicBool,
}

impl HeartbeatInput {
    /// Heartbeat every `interval`; the first event fires one interval after
    /// subscribing
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            subscribed: AtomicBool::new(false),
        }
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Input for HeartbeatInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(
        &self,
        observer: Arc<dyn EventObserver>,
    ) -> Result<Subscription, PluginError> {
        if self.interval.is_zero() {
            return Err(PluginError::Init("heartbeat interval must be positive".into()));
        }
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(PluginError::NotReady);
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = self.name.clone();
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut count: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                count += 1;
                let event = Event::new(HEARTBEAT_PROVIDER, Level::Informational)
                    .with_field("input", name.as_str())
                    .with_field("count", count);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = observer.on_event(event) => {}
                }
            }
            debug!(input = %name, beats = count, "Heartbeat stopped");
        });

        Ok(Subscription::new(cancel, task))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventObserver for Collect {
        async fn on_event(&self, event: Event) {
            self.events.lock().push(event);
        }

        fn on_error(&self, _error: PluginError) {}
    }

    #[tokio::test(start_paused = true)]
    async fn emits_counted_beats_per_interval() {
        let input = HeartbeatInput::new("beat", Duration::from_secs(1));
        let observer = Arc::new(Collect::default());
        let sub = input.subscribe(observer.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(sub.unsubscribe(Duration::from_secs(1)).await);

        let events = observer.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].provider_name, HEARTBEAT_PROVIDER);
        assert_eq!(events[2].field("count").and_then(|v| v.as_u64()), Some(3));
        assert_eq!(events[0].field("input").and_then(|v| v.as_str()), Some("beat"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_subscribe_is_rejected() {
        let input = HeartbeatInput::new("beat", Duration::from_secs(1));
        let _sub = input.subscribe(Arc::new(Collect::default())).await.unwrap();
        let err = input.subscribe(Arc::new(Collect::default())).await.unwrap_err();
        assert_eq!(err, PluginError::NotReady);
    }

    #[tokio::test]
    async fn zero_interval_fails_to_start() {
        let input = HeartbeatInput::new("beat", Duration::ZERO);
        let err = input.subscribe(Arc::new(Collect::default())).await.unwrap_err();
        assert!(matches!(err, PluginError::Init(_)));
    }
}
