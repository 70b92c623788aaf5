//! Pipeline - the orchestrator
//!
//! Owns the inputs, the global filter chain, the buffering engine and the
//! sinks, and drives them through one lifecycle:
//!
//! ```text
//! Created ──start()──► Running ──stop()──► Stopping ──► Stopped
//!    └──────────────────stop()─────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use virta_pipeline::{BatchSettings, OverflowPolicy, Pipeline, Sink};
//!
//! let pipeline = Pipeline::builder()
//!     .input(Arc::new(HeartbeatInput::new("beat", Duration::from_secs(5))))
//!     .filter(Arc::new(LevelFilter::new(Level::Warning)))
//!     .sink(Sink::new("console", Arc::new(StdoutOutput::json("console"))))
//!     .settings(BatchSettings::new(OverflowPolicy::DropOldest).max_batch_size(50))
//!     .build()?;
//!
//! pipeline.start().await?;
//! // ...
//! pipeline.stop().await;
//! ```

use crate::engine::{BatchSettings, BufferingEngine, SinkStats};
use crate::error::{panic_message, ConfigError, PipelineError, Result};
use crate::filter::FilterChain;
use crate::health::{HealthRegistry, ThrottledReporter, TracingHealthReporter, DEFAULT_THROTTLE_WINDOW};
use crate::sink::Sink;
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use virta_core::{Event, EventObserver, Filter, HealthReporter, Input, PluginError, Subscription};

/// Default bound on waiting for an input to stop after unsubscribing
const DEFAULT_UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on all output shutdown hooks together
const OUTPUT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline lifecycle; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Created => "Created",
            LifecycleState::Running => "Running",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Stopped => "Stopped",
        })
    }
}

/// Builder for [`Pipeline`]
///
/// All validation happens in [`PipelineBuilder::build`], so a pipeline that
/// exists is always startable.
pub struct PipelineBuilder {
    inputs: Vec<Arc<dyn Input>>,
    filters: FilterChain,
    sinks: Vec<Sink>,
    settings: Option<BatchSettings>,
    health: Option<Arc<dyn HealthReporter>>,
    throttle_window: Duration,
    unsubscribe_timeout: Duration,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            inputs: Vec::new(),
            filters: FilterChain::new(),
            sinks: Vec::new(),
            settings: None,
            health: None,
            throttle_window: DEFAULT_THROTTLE_WINDOW,
            unsubscribe_timeout: DEFAULT_UNSUBSCRIBE_TIMEOUT,
        }
    }

    /// Add an input
    pub fn input(mut self, input: Arc<dyn Input>) -> Self {
        self.inputs.push(input);
        self
    }

    /// Append a filter to the global chain
    ///
    /// Global filters run once per event, before fan-out.
    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the global chain
    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Add a sink
    pub fn sink(mut self, sink: Sink) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Batching and overflow settings (required)
    pub fn settings(mut self, settings: BatchSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Health backend
    ///
    /// Default: [`TracingHealthReporter`].
    pub fn health_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.health = Some(reporter);
        self
    }

    /// Per-source health throttle window
    ///
    /// Default is 1 second. Zero disables throttling.
    pub fn health_throttle(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }

    /// How long to wait for each input to stop before aborting it
    ///
    /// Default is 1 second.
    pub fn unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.unsubscribe_timeout = timeout;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when settings are missing or out of range,
    /// or when two sinks share a name.
    pub fn build(self) -> Result<Pipeline> {
        let settings = self.settings.ok_or_else(|| {
            ConfigError::invalid_value("settings", "batch settings with an overflow policy are required")
        })?;
        settings.validate()?;

        let mut seen = HashSet::new();
        for sink in &self.sinks {
            if !seen.insert(sink.name().to_string()) {
                return Err(ConfigError::DuplicateSink(sink.name().to_string()).into());
            }
        }
        if self.sinks.is_empty() {
            warn!("No sinks configured - events will be filtered and dropped");
        }
        if self.inputs.is_empty() {
            warn!("No inputs configured - the pipeline will idle");
        }

        let backend = self
            .health
            .unwrap_or_else(|| Arc::new(TracingHealthReporter));
        let health = Arc::new(HealthRegistry::new(backend, self.throttle_window));

        for input in &self.inputs {
            input.bind_health(health.for_input(input.name()));
        }
        for sink in &self.sinks {
            sink.output().bind_health(health.for_sink(sink.name()));
        }

        let sink_names = self.sinks.iter().map(|s| s.name().to_string()).collect();
        let engine = Arc::new(BufferingEngine::new(self.sinks, settings, &health));

        Ok(Pipeline {
            inputs: self.inputs,
            filters: self.filters,
            sink_names,
            engine,
            health,
            unsubscribe_timeout: self.unsubscribe_timeout,
            state: Mutex::new(LifecycleState::Created),
            lifecycle: tokio::sync::Mutex::new(()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }
}

/// The running pipeline
pub struct Pipeline {
    inputs: Vec<Arc<dyn Input>>,
    filters: FilterChain,
    sink_names: Vec<String>,
    engine: Arc<BufferingEngine>,
    health: Arc<HealthRegistry>,
    unsubscribe_timeout: Duration,
    state: Mutex<LifecycleState>,
    /// Serializes start/stop
    lifecycle: tokio::sync::Mutex<()>,
    subscriptions: Mutex<Vec<(String, Subscription)>>,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Start the engine and subscribe to every input
    ///
    /// An input that fails to subscribe is reported to health and skipped;
    /// the pipeline runs with the others.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidState`] unless the pipeline is `Created`.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Created {
                return Err(PipelineError::InvalidState {
                    operation: "start",
                    state: *state,
                });
            }
            *state = LifecycleState::Running;
        }

        self.engine.start();

        let mut started = 0usize;
        for input in &self.inputs {
            let name = input.name().to_string();
            let reporter = self.health.for_input(&name);
            let observer = Arc::new(PipelineObserver {
                input: name.clone(),
                filters: self.filters.clone(),
                engine: Arc::clone(&self.engine),
                health: Arc::clone(&reporter),
            });

            let subscribed = AssertUnwindSafe(input.subscribe(observer))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(PluginError::Init(format!(
                        "panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            match subscribed {
                Ok(subscription) => {
                    debug!(input = %name, "Input subscribed");
                    self.subscriptions.lock().push((name, subscription));
                    started += 1;
                }
                Err(e) => {
                    error!(input = %name, error = %e, "Input failed to start");
                    reporter.report_problem(&format!("input '{name}' failed to start: {e}"), None);
                }
            }
        }

        info!(
            inputs = started,
            failed_inputs = self.inputs.len() - started,
            sinks = self.sink_names.len(),
            global_filters = self.filters.len(),
            "Pipeline started"
        );
        self.health.for_pipeline().report_healthy();
        Ok(())
    }

    /// Stop intake, drain sinks within the drain timeout, shut outputs down
    ///
    /// Idempotent: stopping a stopped (or stopping) pipeline does nothing,
    /// stopping a pipeline that never started moves it straight to
    /// `Stopped`. Never fails; whatever goes wrong is reported to health.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Created => {
                    *state = LifecycleState::Stopped;
                    return;
                }
                LifecycleState::Stopping | LifecycleState::Stopped => return,
                LifecycleState::Running => *state = LifecycleState::Stopping,
            }
        }
        info!("Pipeline stopping, unsubscribing inputs...");

        // 1. No new intake
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        let grace = self.unsubscribe_timeout;
        let unsubscribed = join_all(subscriptions.into_iter().map(|(name, subscription)| async move {
            (subscription.unsubscribe(grace).await, name)
        }))
        .await;
        for (stopped, name) in unsubscribed {
            if !stopped {
                warn!(input = %name, "Input did not stop in time, aborted");
                self.health.for_input(&name).report_warning(
                    &format!(
                        "input '{name}' did not stop within {}ms and was aborted",
                        grace.as_millis()
                    ),
                    None,
                );
            }
        }

        // 2. Flush what is buffered
        let summary = self.engine.shutdown().await;

        // 3. Output shutdown hooks, all under one deadline
        let outputs = self.engine.outputs();
        let deadline = tokio::time::Instant::now() + OUTPUT_SHUTDOWN_TIMEOUT;
        let hooks = join_all(outputs.iter().map(|(_, output)| {
            tokio::time::timeout_at(
                deadline,
                AssertUnwindSafe(output.shutdown()).catch_unwind(),
            )
        }))
        .await;
        for ((name, _), hook) in outputs.iter().zip(hooks) {
            let failure = match hook {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => format!("sink '{name}' shutdown failed: {e}"),
                Ok(Err(payload)) => format!(
                    "sink '{name}' shutdown panicked: {}",
                    panic_message(payload.as_ref())
                ),
                Err(_) => format!("sink '{name}' shutdown timed out"),
            };
            warn!(sink = %name, "{failure}");
            self.health.for_sink(name).report_problem(&failure, None);
        }

        *self.state.lock() = LifecycleState::Stopped;
        info!(
            drained = summary.drained,
            aborted = summary.aborted,
            "Pipeline stopped"
        );
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Per-sink counters, in sink order
    pub fn sink_stats(&self) -> Vec<SinkStats> {
        self.engine.stats()
    }

    /// Sink names, in sink order
    pub fn sink_names(&self) -> &[String] {
        &self.sink_names
    }

    /// Input names, in configuration order
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|i| i.name()).collect()
    }

    /// Health registry (per-source throttled reporters)
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Active batch settings
    pub fn settings(&self) -> &BatchSettings {
        self.engine.settings()
    }
}

/// Callback registered with each input
///
/// Runs the global chain on the input's own task, then hands surviving
/// events to the engine.
struct PipelineObserver {
    input: String,
    filters: FilterChain,
    engine: Arc<BufferingEngine>,
    health: Arc<ThrottledReporter>,
}

#[async_trait]
impl EventObserver for PipelineObserver {
    async fn on_event(&self, event: Event) {
        if let Some(event) = self.filters.apply(event, self.health.as_ref()) {
            self.engine.publish(event).await;
        }
    }

    fn on_error(&self, error: PluginError) {
        debug!(input = %self.input, error = %error, "Input reported error");
        self.health
            .report_problem(&format!("input '{}' error: {error}", self.input), None);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::buffer::OverflowPolicy;
    use crate::health::MemoryHealthReporter;
    use virta_core::{CancellationToken, HealthSeverity, Output};

    struct NullOutput;

    #[async_trait]
    impl Output for NullOutput {
        fn name(&self) -> &str {
            "null"
        }

        async fn send(
            &self,
            _batch: &[Event],
            _sequence: u64,
            _cancel: &CancellationToken,
        ) -> std::result::Result<(), PluginError> {
            Ok(())
        }
    }

    struct BrokenInput;

    #[async_trait]
    impl Input for BrokenInput {
        fn name(&self) -> &str {
            "broken"
        }

        async fn subscribe(
            &self,
            _observer: Arc<dyn EventObserver>,
        ) -> std::result::Result<Subscription, PluginError> {
            Err(PluginError::Init("device not found".into()))
        }
    }

    struct PanickingInput;

    #[async_trait]
    #[allow(clippy::panic)]
    impl Input for PanickingInput {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn subscribe(
            &self,
            _observer: Arc<dyn EventObserver>,
        ) -> std::result::Result<Subscription, PluginError> {
            panic!("driver table missing");
        }
    }

    /// Producer that never looks at its cancellation token
    struct DeafInput(&'static str);

    #[async_trait]
    impl Input for DeafInput {
        fn name(&self) -> &str {
            self.0
        }

        async fn subscribe(
            &self,
            _observer: Arc<dyn EventObserver>,
        ) -> std::result::Result<Subscription, PluginError> {
            let task = tokio::spawn(async {
                loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            });
            Ok(Subscription::new(CancellationToken::new(), task))
        }
    }

    /// Output whose shutdown hook never finishes in time
    struct HangingShutdownOutput;

    #[async_trait]
    impl Output for HangingShutdownOutput {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn send(
            &self,
            _batch: &[Event],
            _sequence: u64,
            _cancel: &CancellationToken,
        ) -> std::result::Result<(), PluginError> {
            Ok(())
        }

        async fn shutdown(&self) -> std::result::Result<(), PluginError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn settings() -> BatchSettings {
        BatchSettings::new(OverflowPolicy::DropOldest)
    }

    // ========================================================================
    // Build validation
    // ========================================================================

    #[test]
    fn build_requires_settings() {
        let err = Pipeline::builder()
            .sink(Sink::new("a", Arc::new(NullOutput)))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(ConfigError::InvalidValue { field: "settings", .. })));
    }

    #[test]
    fn build_rejects_duplicate_sink_names() {
        let err = Pipeline::builder()
            .sink(Sink::new("a", Arc::new(NullOutput)))
            .sink(Sink::new("a", Arc::new(NullOutput)))
            .settings(settings())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(ConfigError::DuplicateSink(ref n)) if n == "a"));
    }

    #[test]
    fn build_rejects_non_positive_batch_size() {
        let result = Pipeline::builder()
            .sink(Sink::new("a", Arc::new(NullOutput)))
            .settings(settings().max_batch_size(0))
            .build();
        assert!(result.is_err());
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn lifecycle_transitions() {
        let pipeline = Pipeline::builder()
            .sink(Sink::new("a", Arc::new(NullOutput)))
            .settings(settings())
            .build()
            .unwrap();
        assert_eq!(pipeline.state(), LifecycleState::Created);

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state(), LifecycleState::Running);

        let again = pipeline.start().await;
        assert!(matches!(
            again,
            Err(PipelineError::InvalidState { state: LifecycleState::Running, .. })
        ));

        pipeline.stop().await;
        assert_eq!(pipeline.state(), LifecycleState::Stopped);

        // No-op on a terminal state
        pipeline.stop().await;
        assert_eq!(pipeline.state(), LifecycleState::Stopped);
        assert!(pipeline.start().await.is_err());
    }

    #[tokio::test]
    async fn stop_before_start_is_terminal() {
        let pipeline = Pipeline::builder()
            .settings(settings())
            .build()
            .unwrap();
        pipeline.stop().await;
        assert_eq!(pipeline.state(), LifecycleState::Stopped);
        assert!(pipeline.start().await.is_err());
    }

    #[tokio::test]
    async fn failing_input_is_reported_and_not_fatal() {
        let memory = Arc::new(MemoryHealthReporter::new());
        let pipeline = Pipeline::builder()
            .input(Arc::new(BrokenInput))
            .sink(Sink::new("a", Arc::new(NullOutput)))
            .settings(settings())
            .health_reporter(memory.clone())
            .build()
            .unwrap();

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state(), LifecycleState::Running);

        let problems = memory.with_severity(HealthSeverity::Problem);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("input 'broken' failed to start"));
        assert_eq!(problems[0].category.as_deref(), Some("input:broken"));
        assert_eq!(memory.count(HealthSeverity::Healthy), 1);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn panicking_subscribe_is_reported_and_not_fatal() {
        let memory = Arc::new(MemoryHealthReporter::new());
        let pipeline = Pipeline::builder()
            .input(Arc::new(PanickingInput))
            .sink(Sink::new("a", Arc::new(NullOutput)))
            .settings(settings())
            .health_reporter(memory.clone())
            .build()
            .unwrap();

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state(), LifecycleState::Running);

        let problems = memory.with_severity(HealthSeverity::Problem);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("input 'panicky' failed to start"));
        assert!(problems[0].message.contains("driver table missing"));

        pipeline.stop().await;
        assert_eq!(pipeline.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_on_inputs_and_outputs_concurrently() {
        let memory = Arc::new(MemoryHealthReporter::new());
        let pipeline = Pipeline::builder()
            .input(Arc::new(DeafInput("deaf-1")))
            .input(Arc::new(DeafInput("deaf-2")))
            .sink(Sink::new("h1", Arc::new(HangingShutdownOutput)))
            .sink(Sink::new("h2", Arc::new(HangingShutdownOutput)))
            .settings(settings())
            .health_reporter(memory.clone())
            .build()
            .unwrap();
        pipeline.start().await.unwrap();

        let began = tokio::time::Instant::now();
        pipeline.stop().await;
        let elapsed = began.elapsed();

        // One unsubscribe grace plus one shutdown deadline, not one per item
        assert!(elapsed >= DEFAULT_UNSUBSCRIBE_TIMEOUT + OUTPUT_SHUTDOWN_TIMEOUT);
        assert!(elapsed < DEFAULT_UNSUBSCRIBE_TIMEOUT + OUTPUT_SHUTDOWN_TIMEOUT + Duration::from_millis(500));

        assert_eq!(memory.count(HealthSeverity::Warning), 2);
        let problems = memory.with_severity(HealthSeverity::Problem);
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().all(|p| p.message.contains("shutdown timed out")));
        assert_eq!(pipeline.state(), LifecycleState::Stopped);
    }
}
