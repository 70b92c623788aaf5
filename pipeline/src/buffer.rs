//! Bounded per-sink queue with overflow policies
//!
//! Each sink owns one [`SinkQueue`]. Producers (input tasks) push into it,
//! the sink's dispatch task drains it in batches. Every entry remembers when
//! it was enqueued so the dispatcher can release a partial batch once the
//! oldest event has waited `max_batch_delay`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use virta_core::Event;

/// What to do when a sink queue is full
///
/// There is no default: every pipeline must choose one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Producer waits for room (backpressure reaches the inputs)
    Block,
    /// Evict the oldest buffered event to make room
    DropOldest,
    /// Reject the incoming event
    DropNewest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverflowPolicy::Block => "block",
            OverflowPolicy::DropOldest => "dropOldest",
            OverflowPolicy::DropNewest => "dropNewest",
        })
    }
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Event buffered
    Queued,
    /// Event buffered after evicting the oldest one
    EvictedOldest,
    /// Queue full, incoming event rejected
    RejectedNewest,
    /// Blocked longer than the block timeout, incoming event rejected
    BlockTimedOut,
    /// Queue closed for shutdown, incoming event rejected
    Closed,
}

struct Queued {
    event: Event,
    enqueued_at: Instant,
}

struct QueueState {
    events: VecDeque<Queued>,
    closed: bool,
}

/// Point-in-time view of a queue for the dispatcher
#[derive(Debug, Clone, Copy)]
pub struct QueueSnapshot {
    pub len: usize,
    pub oldest: Option<Instant>,
    pub closed: bool,
}

/// Bounded FIFO of events for one sink
pub struct SinkQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: OverflowPolicy,
    block_timeout: Option<Duration>,
    /// Signalled on every push and on close
    data_ready: Notify,
    /// Signalled when the dispatcher frees room, and on close
    space_free: Notify,
}

impl SinkQueue {
    /// Create a queue
    pub fn new(capacity: usize, policy: OverflowPolicy, block_timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            capacity,
            policy,
            block_timeout,
            data_ready: Notify::new(),
            space_free: Notify::new(),
        }
    }

    /// Push one event according to the overflow policy
    ///
    /// Only suspends under [`OverflowPolicy::Block`] while the queue is full.
    pub async fn push(&self, event: Event) -> PushOutcome {
        match self.policy {
            OverflowPolicy::Block => self.push_blocking(event).await,
            OverflowPolicy::DropOldest | OverflowPolicy::DropNewest => self.push_dropping(event),
        }
    }

    fn push_dropping(&self, event: Event) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            let full = state.events.len() >= self.capacity;
            match (full, self.policy) {
                (true, OverflowPolicy::DropNewest) => return PushOutcome::RejectedNewest,
                (true, _) => {
                    state.events.pop_front();
                    state.events.push_back(Queued::now(event));
                    PushOutcome::EvictedOldest
                }
                (false, _) => {
                    state.events.push_back(Queued::now(event));
                    PushOutcome::Queued
                }
            }
        };
        self.data_ready.notify_one();
        outcome
    }

    async fn push_blocking(&self, event: Event) -> PushOutcome {
        let deadline = self.block_timeout.map(|t| Instant::now() + t);
        let mut pending = Some(event);

        loop {
            // Register interest before checking, so a drain between the
            // check and the await is not missed
            let notified = self.space_free.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return PushOutcome::Closed;
                }
                if state.events.len() < self.capacity {
                    if let Some(event) = pending.take() {
                        state.events.push_back(Queued::now(event));
                    }
                    drop(state);
                    self.data_ready.notify_one();
                    return PushOutcome::Queued;
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return PushOutcome::BlockTimedOut;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Remove up to `max` events from the front
    pub fn drain(&self, max: usize) -> Vec<Event> {
        let drained: Vec<Event> = {
            let mut state = self.state.lock();
            let n = max.min(state.events.len());
            state.events.drain(..n).map(|q| q.event).collect()
        };
        if !drained.is_empty() {
            self.space_free.notify_waiters();
        }
        drained
    }

    /// Remove everything
    pub fn drain_all(&self) -> Vec<Event> {
        self.drain(usize::MAX)
    }

    /// Stop accepting events and wake everyone waiting on the queue
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.data_ready.notify_one();
        self.space_free.notify_waiters();
    }

    /// Wait until something was pushed or the queue was closed
    ///
    /// A notification that arrived while nobody was waiting is kept, so a
    /// push between [`SinkQueue::snapshot`] and this call is not lost.
    pub async fn data_ready(&self) {
        self.data_ready.notified().await;
    }

    /// Length, oldest enqueue instant and closed flag under one lock
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            len: state.events.len(),
            oldest: state.events.front().map(|q| q.enqueued_at),
            closed: state.closed,
        }
    }

    /// Current number of buffered events
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Whether [`SinkQueue::close`] was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Maximum number of buffered events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured overflow policy
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

impl Queued {
    fn now(event: Event) -> Self {
        Self {
            event,
            enqueued_at: Instant::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use virta_core::Level;

    fn ev(i: usize) -> Event {
        Event::new("test", Level::Informational).with_field("i", i)
    }

    fn ids(events: &[Event]) -> Vec<u64> {
        events
            .iter()
            .map(|e| e.field("i").and_then(|v| v.as_u64()).unwrap())
            .collect()
    }

    // ==========================================================================
    // Drop policies
    // ==========================================================================

    #[tokio::test]
    async fn drop_oldest_keeps_newest_capacity_events() {
        let queue = SinkQueue::new(3, OverflowPolicy::DropOldest, None);
        let mut evicted = 0;
        for i in 0..5 {
            if queue.push(ev(i)).await == PushOutcome::EvictedOldest {
                evicted += 1;
            }
        }
        assert_eq!(evicted, 2);
        assert_eq!(ids(&queue.drain_all()), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn drop_newest_keeps_first_capacity_events() {
        let queue = SinkQueue::new(2, OverflowPolicy::DropNewest, None);
        assert_eq!(queue.push(ev(0)).await, PushOutcome::Queued);
        assert_eq!(queue.push(ev(1)).await, PushOutcome::Queued);
        assert_eq!(queue.push(ev(2)).await, PushOutcome::RejectedNewest);
        assert_eq!(ids(&queue.drain_all()), vec![0, 1]);
    }

    #[tokio::test]
    async fn closed_queue_rejects_pushes() {
        let queue = SinkQueue::new(2, OverflowPolicy::DropOldest, None);
        queue.close();
        assert_eq!(queue.push(ev(0)).await, PushOutcome::Closed);
        assert!(queue.is_empty());
    }

    // ==========================================================================
    // Block policy (DST: time is paused)
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn block_waits_for_drain() {
        let queue = Arc::new(SinkQueue::new(1, OverflowPolicy::Block, None));
        queue.push(ev(0)).await;

        let q = Arc::clone(&queue);
        let producer = tokio::spawn(async move { q.push(ev(1)).await });

        tokio::task::yield_now().await;
        assert!(!producer.is_finished(), "producer should be blocked");

        assert_eq!(ids(&queue.drain(1)), vec![0]);
        assert_eq!(producer.await.unwrap(), PushOutcome::Queued);
        assert_eq!(ids(&queue.drain_all()), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn block_times_out() {
        let queue = SinkQueue::new(1, OverflowPolicy::Block, Some(Duration::from_millis(200)));
        queue.push(ev(0)).await;

        let start = Instant::now();
        assert_eq!(queue.push(ev(1)).await, PushOutcome::BlockTimedOut);
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_blocked_producer() {
        let queue = Arc::new(SinkQueue::new(1, OverflowPolicy::Block, None));
        queue.push(ev(0)).await;

        let q = Arc::clone(&queue);
        let producer = tokio::spawn(async move { q.push(ev(1)).await });
        tokio::task::yield_now().await;

        queue.close();
        assert_eq!(producer.await.unwrap(), PushOutcome::Closed);
    }

    // ==========================================================================
    // Snapshot / notification
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn snapshot_tracks_oldest_entry() {
        let queue = SinkQueue::new(10, OverflowPolicy::DropNewest, None);
        assert!(queue.snapshot().oldest.is_none());

        let first = Instant::now();
        queue.push(ev(0)).await;
        tokio::time::advance(Duration::from_millis(50)).await;
        queue.push(ev(1)).await;

        let snap = queue.snapshot();
        assert_eq!(snap.len, 2);
        assert_eq!(snap.oldest, Some(first));
        assert!(!snap.closed);
    }

    #[tokio::test]
    async fn push_before_wait_is_not_lost() {
        let queue = SinkQueue::new(10, OverflowPolicy::DropNewest, None);
        queue.push(ev(0)).await;
        // Permit stored by the push completes this immediately
        tokio::time::timeout(Duration::from_secs(1), queue.data_ready())
            .await
            .expect("notification should be stored");
    }
}
