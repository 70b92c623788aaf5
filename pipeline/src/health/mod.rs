//! Self-health reporting with flood control
//!
//! Every component that reports health gets its own [`ThrottledReporter`]
//! from the [`HealthRegistry`], keyed by source (`pipeline`, `input:<name>`,
//! `sink:<name>`). Each one forwards at most one report per window to the
//! shared backend and silently coalesces the rest, so a sink failing on every
//! batch cannot drown out an input that breaks once.
//!
//! ```text
//! input:stdin ──► Throttle ──┐
//! sink:console ─► Throttle ──┼──► backend (tracing / csv / memory)
//! pipeline ─────► Throttle ──┘
//! ```

mod backends;

pub use backends::{CsvHealthReporter, MemoryHealthReporter, TracingHealthReporter};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use virta_core::{HealthReport, HealthReporter};

/// Default throttle window
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// One-emission-per-window gate
///
/// Thread-safe: the last emission instant sits behind a mutex held only for
/// the comparison, suppressed calls are counted atomically.
///
/// A zero window lets every call through.
pub struct Throttle {
    window: Duration,
    last_emit: Mutex<Option<Instant>>,
    /// Calls suppressed since the last emission
    suppressed: AtomicU64,
    /// Calls suppressed over the throttle's lifetime
    total_suppressed: AtomicU64,
}

impl Throttle {
    /// Create a throttle with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: Mutex::new(None),
            suppressed: AtomicU64::new(0),
            total_suppressed: AtomicU64::new(0),
        }
    }

    /// Try to open the gate
    ///
    /// Returns `Some(n)` when the caller may emit, where `n` is the number of
    /// calls suppressed since the previous emission. Returns `None` when the
    /// call falls inside an open window.
    pub fn try_acquire(&self) -> Option<u64> {
        if self.window.is_zero() {
            return Some(0);
        }

        let admitted = {
            let mut last = self.last_emit.lock();
            let now = Instant::now();
            match *last {
                Some(prev) if now.duration_since(prev) < self.window => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };

        if admitted {
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            self.total_suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Calls suppressed over the throttle's lifetime
    pub fn total_suppressed(&self) -> u64 {
        self.total_suppressed.load(Ordering::Relaxed)
    }
}

/// A reporter for one source, throttled and forwarding to a shared backend
pub struct ThrottledReporter {
    source: String,
    throttle: Throttle,
    backend: Arc<dyn HealthReporter>,
}

impl ThrottledReporter {
    /// Wrap `backend` for `source`
    pub fn new(source: impl Into<String>, window: Duration, backend: Arc<dyn HealthReporter>) -> Self {
        Self {
            source: source.into(),
            throttle: Throttle::new(window),
            backend,
        }
    }

    /// Source key this reporter attributes reports to
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Reports dropped by the throttle so far
    pub fn suppressed(&self) -> u64 {
        self.throttle.total_suppressed()
    }
}

impl HealthReporter for ThrottledReporter {
    fn report(&self, mut report: HealthReport) {
        let Some(suppressed) = self.throttle.try_acquire() else {
            tracing::trace!(
                source = %self.source,
                severity = %report.severity,
                "health report throttled"
            );
            return;
        };

        if report.category.is_none() {
            report.category = Some(self.source.clone());
        }
        if suppressed > 0 {
            report.message = format!("{} ({suppressed} earlier reports suppressed)", report.message);
        }
        self.backend.report(report);
    }
}

/// Hands out one throttled reporter per source
///
/// Reporters are created on first use and cached, so every caller asking for
/// the same source shares one throttle window.
pub struct HealthRegistry {
    backend: Arc<dyn HealthReporter>,
    window: Duration,
    reporters: RwLock<HashMap<String, Arc<ThrottledReporter>>>,
}

impl HealthRegistry {
    /// Create a registry over `backend` with the given throttle window
    pub fn new(backend: Arc<dyn HealthReporter>, window: Duration) -> Self {
        Self {
            backend,
            window,
            reporters: RwLock::new(HashMap::new()),
        }
    }

    /// Reporter for `source`, created on first request
    pub fn reporter(&self, source: &str) -> Arc<ThrottledReporter> {
        // Fast path: read lock only
        if let Some(existing) = self.reporters.read().get(source) {
            return Arc::clone(existing);
        }

        let mut reporters = self.reporters.write();
        // Double-check after acquiring write lock
        let entry = reporters.entry(source.to_string()).or_insert_with(|| {
            Arc::new(ThrottledReporter::new(
                source,
                self.window,
                Arc::clone(&self.backend),
            ))
        });
        Arc::clone(entry)
    }

    /// Reporter for an input
    pub fn for_input(&self, name: &str) -> Arc<ThrottledReporter> {
        self.reporter(&format!("input:{name}"))
    }

    /// Reporter for a sink
    pub fn for_sink(&self, name: &str) -> Arc<ThrottledReporter> {
        self.reporter(&format!("sink:{name}"))
    }

    /// Reporter for the orchestrator itself
    pub fn for_pipeline(&self) -> Arc<ThrottledReporter> {
        self.reporter("pipeline")
    }

    /// Shared backend, unthrottled
    pub fn backend(&self) -> &Arc<dyn HealthReporter> {
        &self.backend
    }

    /// Throttle window applied to every source
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of sources seen so far
    pub fn source_count(&self) -> usize {
        self.reporters.read().len()
    }
}
