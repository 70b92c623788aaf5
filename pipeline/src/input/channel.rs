//! In-process channel input
//!
//! For embedding hosts that already have events in hand: create the input,
//! give it to the pipeline, and push through the cloneable handle.
//!
//! ```ignore
//! let (input, handle) = ChannelInput::new("app", 1024);
//! let pipeline = Pipeline::builder().input(Arc::new(input)) /* ... */ .build()?;
//! pipeline.start().await?;
//! handle.send(Event::new("app", Level::Warning)).await?;
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use virta_core::{Event, EventObserver, Input, PluginError, Subscription};

/// Input fed by [`ChannelInputHandle`]s
pub struct ChannelInput {
    name: String,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
}

/// Producer side of a [`ChannelInput`]
#[derive(Clone)]
pub struct ChannelInputHandle {
    sender: mpsc::Sender<Event>,
}

impl ChannelInput {
    /// Input plus its handle; `capacity` bounds events waiting for the
    /// pipeline to pick them up
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, ChannelInputHandle) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let input = Self {
            name: name.into(),
            receiver: Mutex::new(Some(receiver)),
        };
        (input, ChannelInputHandle { sender })
    }
}

impl ChannelInputHandle {
    /// Send one event, waiting for room
    ///
    /// Fails with [`PluginError::Shutdown`] once the input has stopped.
    pub async fn send(&self, event: Event) -> Result<(), PluginError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| PluginError::Shutdown("channel input closed".into()))
    }

    /// Send without waiting
    ///
    /// Fails with [`PluginError::NotReady`] when the channel is full.
    pub fn try_send(&self, event: Event) -> Result<(), PluginError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PluginError::NotReady,
            mpsc::error::TrySendError::Closed(_) => {
                PluginError::Shutdown("channel input closed".into())
            }
        })
    }

    /// Whether the input side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl Input for ChannelInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(
        &self,
        observer: Arc<dyn EventObserver>,
    ) -> Result<Subscription, PluginError> {
        let mut receiver = self.receiver.lock().take().ok_or(PluginError::NotReady)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            let mut forwarded = 0u64;
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = observer.on_event(event) => forwarded += 1,
                }
            }
            receiver.close();
            debug!(input = %name, forwarded, "Channel input stopped");
        });

        Ok(Subscription::new(cancel, task))
    }
}
