//! Buffering engine - turns a live event stream into per-sink batches
//!
//! The engine owns one lane per sink. A lane is a bounded [`SinkQueue`] plus
//! a dispatch task that drains it:
//!
//! ```text
//!                    ┌─► lane A: queue ──► dispatch task ──► Output A
//! publish(event) ────┤
//!                    └─► lane B: queue ──► dispatch task ──► Output B
//! ```
//!
//! A batch is released when the lane holds `max_batch_size` events, or when
//! the oldest buffered event has waited `max_batch_delay`, whichever comes
//! first. Lanes never wait on each other: a stuck output only stalls its own
//! dispatch task, and its queue overflows according to the overflow policy.
//!
//! # Shutdown
//!
//! 1. Queues are closed; dispatch tasks flush what is left
//! 2. The engine waits up to `drain_timeout` for them
//! 3. Then the cancellation token fires: in-flight sends are abandoned and
//!    remaining events discarded, each reported as a problem

use crate::buffer::{OverflowPolicy, PushOutcome, SinkQueue};
use crate::error::{panic_message, ConfigError};
use crate::filter::FilterChain;
use crate::health::HealthRegistry;
use crate::sink::Sink;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use virta_core::{Event, HealthReporter, Output, PluginError};

/// How long dispatch tasks get to observe cancellation before being aborted
const ABORT_GRACE: Duration = Duration::from_millis(100);

/// Batching and backpressure parameters, shared by every sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Release a batch once this many events are buffered
    pub max_batch_size: usize,
    /// Release a partial batch once its oldest event has waited this long
    pub max_batch_delay: Duration,
    /// Per-sink queue bound
    pub queue_capacity: usize,
    /// What to do when a sink queue is full
    pub overflow_policy: OverflowPolicy,
    /// Under `block`, give up on an event after waiting this long
    pub block_timeout: Option<Duration>,
    /// A send running longer than this counts as failed
    pub send_timeout: Duration,
    /// Grace period for flushing buffered and in-flight batches on stop
    pub drain_timeout: Duration,
}

impl BatchSettings {
    /// Defaults for everything except the overflow policy, which is always
    /// an explicit choice
    pub fn new(overflow_policy: OverflowPolicy) -> Self {
        Self {
            max_batch_size: 100,
            max_batch_delay: Duration::from_secs(1),
            queue_capacity: 10_000,
            overflow_policy,
            block_timeout: None,
            send_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn max_batch_delay(mut self, delay: Duration) -> Self {
        self.max_batch_delay = delay;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = Some(timeout);
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Reject out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid_value("maxBatchSize", "must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid_value("queueCapacity", "must be positive"));
        }
        if self.queue_capacity < self.max_batch_size {
            return Err(ConfigError::invalid_value(
                "queueCapacity",
                format!(
                    "{} is smaller than maxBatchSize {}",
                    self.queue_capacity, self.max_batch_size
                ),
            ));
        }
        if self.max_batch_delay.is_zero() {
            return Err(ConfigError::invalid_value("maxBatchDelay", "must be positive"));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::invalid_value("sendTimeout", "must be positive"));
        }
        if self.drain_timeout.is_zero() {
            return Err(ConfigError::invalid_value("drainTimeout", "must be positive"));
        }
        if self.block_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::invalid_value("blockTimeout", "must be positive"));
        }
        Ok(())
    }
}

/// Counters for one sink
#[derive(Default)]
struct LaneStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    events_delivered: AtomicU64,
    next_sequence: AtomicU64,
}

/// Snapshot of a sink's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStats {
    pub name: String,
    /// Events accepted into the queue
    pub enqueued: u64,
    /// Events lost to overflow, block timeouts or shutdown
    pub dropped: u64,
    /// Events discarded by sink filters
    pub filtered: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub events_delivered: u64,
    /// Sequence number the next batch will carry
    pub next_sequence: u64,
    /// Events currently buffered
    pub queued: usize,
}

/// Queue, filters, output and bookkeeping for one sink
struct SinkLane {
    name: String,
    queue: SinkQueue,
    output: Arc<dyn Output>,
    filters: FilterChain,
    health: Arc<dyn HealthReporter>,
    stats: LaneStats,
}

impl SinkLane {
    fn new(sink: Sink, settings: &BatchSettings, health: Arc<dyn HealthReporter>) -> Self {
        Self {
            queue: SinkQueue::new(
                settings.queue_capacity,
                settings.overflow_policy,
                settings.block_timeout,
            ),
            name: sink.name().to_string(),
            output: Arc::clone(sink.output()),
            filters: sink.filters().clone(),
            health,
            stats: LaneStats::default(),
        }
    }

    /// Push one event, reporting overflow to health
    async fn enqueue(&self, event: Event) {
        match self.queue.push(event).await {
            PushOutcome::Queued => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::EvictedOldest => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                let total = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(sink = %self.name, total_dropped = total, "Queue full, oldest event evicted");
                self.health.report_warning(
                    &format!(
                        "sink '{}' queue full (capacity {}), dropped oldest event; {total} dropped so far",
                        self.name,
                        self.queue.capacity()
                    ),
                    None,
                );
            }
            PushOutcome::RejectedNewest => {
                let total = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(sink = %self.name, total_dropped = total, "Queue full, incoming event rejected");
                self.health.report_warning(
                    &format!(
                        "sink '{}' queue full (capacity {}), rejected incoming event; {total} dropped so far",
                        self.name,
                        self.queue.capacity()
                    ),
                    None,
                );
            }
            PushOutcome::BlockTimedOut => {
                let total = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(sink = %self.name, total_dropped = total, "Blocked on full queue past timeout, event dropped");
                self.health.report_problem(
                    &format!(
                        "sink '{}' blocked on a full queue past the block timeout, dropped event; {total} dropped so far",
                        self.name
                    ),
                    None,
                );
            }
            PushOutcome::Closed => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(sink = %self.name, "Queue closed, event dropped");
            }
        }
    }

    /// Dispatch loop: batch, filter, send, until closed and drained or
    /// cancelled
    async fn run(self: Arc<Self>, settings: BatchSettings, cancel: CancellationToken) {
        debug!(sink = %self.name, "Dispatch loop started");

        loop {
            if cancel.is_cancelled() {
                self.discard_remaining();
                break;
            }

            let snap = self.queue.snapshot();
            let full = snap.len >= settings.max_batch_size;
            let flush_rest = snap.closed && snap.len > 0;

            if !full && !flush_rest {
                if snap.closed {
                    break;
                }
                match snap.oldest {
                    Some(oldest) => {
                        let deadline = oldest + settings.max_batch_delay;
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => {}
                            _ = self.queue.data_ready() => continue,
                            _ = cancel.cancelled() => continue,
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = self.queue.data_ready() => {}
                            _ = cancel.cancelled() => {}
                        }
                        continue;
                    }
                }
            }

            let raw = self.queue.drain(settings.max_batch_size);
            if raw.is_empty() {
                continue;
            }
            let raw_len = raw.len();
            let batch: Vec<Event> = raw
                .into_iter()
                .filter_map(|event| self.filters.apply(event, self.health.as_ref()))
                .collect();
            let filtered = (raw_len - batch.len()) as u64;
            if filtered > 0 {
                self.stats.filtered.fetch_add(filtered, Ordering::Relaxed);
            }
            if batch.is_empty() {
                continue;
            }

            let sequence = self.stats.next_sequence.fetch_add(1, Ordering::Relaxed);
            self.deliver(batch, sequence, &settings, &cancel).await;
        }

        debug!(sink = %self.name, "Dispatch loop stopped");
    }

    async fn deliver(
        &self,
        batch: Vec<Event>,
        sequence: u64,
        settings: &BatchSettings,
        cancel: &CancellationToken,
    ) {
        let count = batch.len();
        // A panicking output fails this batch only; the lane keeps running
        let guarded = AssertUnwindSafe(self.output.send(&batch, sequence, cancel))
            .catch_unwind()
            .map(|outcome| {
                outcome.unwrap_or_else(|payload| {
                    Err(PluginError::Send(format!(
                        "output panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                })
            });
        let send = tokio::time::timeout(settings.send_timeout, guarded);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PluginError::Cancelled),
            outcome = send => outcome.unwrap_or_else(|_| Err(PluginError::timeout(settings.send_timeout))),
        };

        match result {
            Ok(()) => {
                self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .events_delivered
                    .fetch_add(count as u64, Ordering::Relaxed);
                debug!(sink = %self.name, sequence, count, "Batch sent");
            }
            Err(e) => {
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                let message = if cancel.is_cancelled() {
                    format!(
                        "sink '{}' abandoned batch {sequence} ({count} events) at shutdown: {e}",
                        self.name
                    )
                } else {
                    format!(
                        "sink '{}' failed to send batch {sequence} ({count} events): {e}",
                        self.name
                    )
                };
                warn!(sink = %self.name, sequence, count, error = %e, "Batch lost");
                self.health.report_problem(&message, None);
            }
        }
    }

    fn discard_remaining(&self) {
        let leftover = self.queue.drain_all().len();
        if leftover > 0 {
            self.stats
                .dropped
                .fetch_add(leftover as u64, Ordering::Relaxed);
            warn!(sink = %self.name, count = leftover, "Discarding buffered events at shutdown");
            self.health.report_problem(
                &format!(
                    "sink '{}' discarded {leftover} buffered events at shutdown",
                    self.name
                ),
                None,
            );
        }
    }

    fn report_dead(&self, error: &tokio::task::JoinError) {
        error!(sink = %self.name, error = %error, "Dispatch task died");
        self.health.report_problem(
            &format!("sink '{}' dispatch task died: {error}", self.name),
            None,
        );
    }

    fn snapshot(&self) -> SinkStats {
        SinkStats {
            name: self.name.clone(),
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            filtered: self.stats.filtered.load(Ordering::Relaxed),
            batches_sent: self.stats.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.stats.batches_failed.load(Ordering::Relaxed),
            events_delivered: self.stats.events_delivered.load(Ordering::Relaxed),
            next_sequence: self.stats.next_sequence.load(Ordering::Relaxed),
            queued: self.queue.len(),
        }
    }
}

/// Outcome of [`BufferingEngine::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Every lane flushed within the drain timeout
    pub drained: bool,
    /// Lanes that had to be aborted after cancellation
    pub aborted: usize,
}

/// Per-sink queues and dispatch tasks
pub struct BufferingEngine {
    lanes: Vec<Arc<SinkLane>>,
    settings: BatchSettings,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BufferingEngine {
    /// Build lanes for `sinks`; nothing runs until [`BufferingEngine::start`]
    pub fn new(sinks: Vec<Sink>, settings: BatchSettings, health: &HealthRegistry) -> Self {
        let lanes = sinks
            .into_iter()
            .map(|sink| {
                let reporter: Arc<dyn HealthReporter> = health.for_sink(sink.name());
                Arc::new(SinkLane::new(sink, &settings, reporter))
            })
            .collect();
        Self {
            lanes,
            settings,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one dispatch task per sink
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        for lane in &self.lanes {
            let lane = Arc::clone(lane);
            let settings = self.settings.clone();
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(lane.run(settings, cancel)));
        }
        info!(
            sinks = self.lanes.len(),
            max_batch_size = self.settings.max_batch_size,
            queue_capacity = self.settings.queue_capacity,
            overflow_policy = %self.settings.overflow_policy,
            "Buffering engine started"
        );
    }

    /// Fan an event out to every sink
    ///
    /// Each sink gets its own copy: N-1 clones, the last sink receives the
    /// original. Suspends only under the `block` policy.
    pub async fn publish(&self, event: Event) {
        let Some((last, rest)) = self.lanes.split_last() else {
            return;
        };
        for lane in rest {
            lane.enqueue(event.clone()).await;
        }
        last.enqueue(event).await;
    }

    /// Close queues, drain within the timeout, then cancel and abandon
    pub async fn shutdown(&self) -> ShutdownSummary {
        for lane in &self.lanes {
            lane.queue.close();
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drain_timeout = self.settings.drain_timeout;

        let drained = match tokio::time::timeout(drain_timeout, join_all(tasks.iter_mut())).await {
            Ok(results) => {
                for (lane, result) in self.lanes.iter().zip(results) {
                    if let Err(e) = result {
                        lane.report_dead(&e);
                    }
                }
                true
            }
            Err(_) => false,
        };

        let mut aborted = 0;
        if !drained {
            warn!(
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "Drain timeout elapsed, cancelling in-flight sends"
            );
            self.cancel.cancel();
            let _ = tokio::time::timeout(
                ABORT_GRACE,
                join_all(tasks.iter_mut().filter(|t| !t.is_finished())),
            )
            .await;
            for task in &tasks {
                if !task.is_finished() {
                    task.abort();
                    aborted += 1;
                }
            }
        }
        // Lanes never started still hold events
        for lane in &self.lanes {
            lane.discard_remaining();
        }

        self.cancel.cancel();
        info!(drained, aborted, "Buffering engine stopped");
        ShutdownSummary { drained, aborted }
    }

    /// Counters for every sink, in sink order
    pub fn stats(&self) -> Vec<SinkStats> {
        self.lanes.iter().map(|lane| lane.snapshot()).collect()
    }

    /// Active settings
    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Outputs in sink order, for shutdown hooks
    pub fn outputs(&self) -> Vec<(String, Arc<dyn Output>)> {
        self.lanes
            .iter()
            .map(|lane| (lane.name.clone(), Arc::clone(&lane.output)))
            .collect()
    }
}

impl Drop for BufferingEngine {
    fn drop(&mut self) {
        // Dispatch tasks outlive a dropped engine otherwise
        self.cancel.cancel();
    }
}
