//! Filters and filter chains
//!
//! A [`FilterChain`] is an ordered list of [`Filter`]s. The pipeline holds
//! one global chain (applied once per event, on the input's task) and one
//! chain per sink (applied to that sink's own copy of each event).
//!
//! # Event Flow
//!
//! ```text
//! Input ──► global chain ──► engine ──┬─► sink A chain ──► Output A
//!                                     └─► sink B chain ──► Output B
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut chain = FilterChain::new();
//! chain.push(Arc::new(LevelFilter::new(Level::Warning)));
//! chain.push(Arc::new(DropFilter::parse("providerName == noisy-lib")?));
//! ```

pub mod expression;

pub use expression::{Expression, ExpressionError};

use crate::error::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;
use virta_core::{Context, Event, Filter, HealthReporter, Level, PluginError};

/// Ordered sequence of filters
///
/// Cloning a chain is cheap: filters are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Append a filter
    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    /// Builder-style append
    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Run `event` through every filter in order
    ///
    /// Stops at the first filter that discards the event. A filter error or
    /// panic drops the event and is reported as a problem naming the filter;
    /// it never reaches the caller.
    pub fn apply(&self, event: Event, health: &dyn HealthReporter) -> Option<Event> {
        let mut current = event;
        for filter in &self.filters {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| filter.apply(current)))
                .unwrap_or_else(|payload| {
                    Err(PluginError::Filter(format!(
                        "panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            match outcome {
                Ok(Some(next)) => current = next,
                Ok(None) => return None,
                Err(e) => {
                    debug!(filter = filter.name(), error = %e, "Filter failed, event dropped");
                    health.report_problem(
                        &format!("filter '{}' failed: {e}", filter.name()),
                        Some(&format!("filter:{}", filter.name())),
                    );
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Check if the chain is empty
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Number of filters in the chain
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Names of all filters in chain order
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FromIterator<Arc<dyn Filter>> for FilterChain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Filter>>>(iter: I) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

/// Keeps events for which a predicate returns `true`
///
/// # Example
///
/// ```ignore
/// let filter = Predicate::new("only-orders", |e: &Event| e.provider_name == "orders");
/// ```
pub struct Predicate<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    name: String,
    predicate: F,
}

impl<F> Predicate<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    /// Create a predicate filter
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Filter for Predicate<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, event: Event) -> Result<Option<Event>, PluginError> {
        Ok((self.predicate)(&event).then_some(event))
    }
}

/// Rebuilds each event with a fallible function
///
/// # Example
///
/// ```ignore
/// let stamp = Transform::new("stamp", |e: Event| Ok(e.with_context("host", "a1")));
/// ```
pub struct Transform<F>
where
    F: Fn(Event) -> Result<Event, PluginError> + Send + Sync,
{
    name: String,
    transform_fn: F,
}

impl<F> Transform<F>
where
    F: Fn(Event) -> Result<Event, PluginError> + Send + Sync,
{
    /// Create a transform filter
    pub fn new(name: impl Into<String>, transform_fn: F) -> Self {
        Self {
            name: name.into(),
            transform_fn,
        }
    }
}

impl<F> Filter for Transform<F>
where
    F: Fn(Event) -> Result<Event, PluginError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, event: Event) -> Result<Option<Event>, PluginError> {
        (self.transform_fn)(event).map(Some)
    }
}

/// Discards events below a minimum level
#[derive(Debug, Clone)]
pub struct LevelFilter {
    min: Level,
}

impl LevelFilter {
    /// Keep events at `min` or above
    pub fn new(min: Level) -> Self {
        Self { min }
    }
}

impl Filter for LevelFilter {
    fn name(&self) -> &str {
        "level"
    }

    fn apply(&self, event: Event) -> Result<Option<Event>, PluginError> {
        Ok((event.level >= self.min).then_some(event))
    }
}

/// Discards events matching an expression
#[derive(Debug, Clone)]
pub struct DropFilter {
    expression: Expression,
}

impl DropFilter {
    /// Wrap a parsed expression
    pub fn new(expression: Expression) -> Self {
        Self { expression }
    }

    /// Parse and wrap
    pub fn parse(expression: &str) -> Result<Self, ExpressionError> {
        Expression::parse(expression).map(Self::new)
    }
}

impl Filter for DropFilter {
    fn name(&self) -> &str {
        "drop"
    }

    fn apply(&self, event: Event) -> Result<Option<Event>, PluginError> {
        Ok((!self.expression.matches(&event)).then_some(event))
    }
}

/// Keeps only events matching an expression
#[derive(Debug, Clone)]
pub struct IncludeFilter {
    expression: Expression,
}

impl IncludeFilter {
    /// Wrap a parsed expression
    pub fn new(expression: Expression) -> Self {
        Self { expression }
    }

    /// Parse and wrap
    pub fn parse(expression: &str) -> Result<Self, ExpressionError> {
        Expression::parse(expression).map(Self::new)
    }
}

impl Filter for IncludeFilter {
    fn name(&self) -> &str {
        "include"
    }

    fn apply(&self, event: Event) -> Result<Option<Event>, PluginError> {
        Ok(self.expression.matches(&event).then_some(event))
    }
}

/// Adds context entries to events, optionally only to those matching an
/// expression
///
/// Existing context keys are overwritten.
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    entries: Context,
    when: Option<Expression>,
}

impl MetadataFilter {
    /// Add `entries` to every event
    pub fn new(entries: Context) -> Self {
        Self {
            entries,
            when: None,
        }
    }

    /// Only enrich events matching `expression`
    pub fn when(mut self, expression: Expression) -> Self {
        self.when = Some(expression);
        self
    }
}

impl Filter for MetadataFilter {
    fn name(&self) -> &str {
        "metadata"
    }

    fn apply(&self, event: Event) -> Result<Option<Event>, PluginError> {
        if self.when.as_ref().is_some_and(|w| !w.matches(&event)) {
            return Ok(Some(event));
        }
        let mut enriched = event;
        enriched
            .context
            .extend(self.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(Some(enriched))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::health::MemoryHealthReporter;
    use virta_core::HealthSeverity;

    fn event(provider: &str, level: Level) -> Event {
        Event::new(provider, level).with_field("msg", "hello")
    }

    struct Failing;

    impl Filter for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn apply(&self, _event: Event) -> Result<Option<Event>, PluginError> {
            Err(PluginError::Filter("lookup table unavailable".into()))
        }
    }

    // ==========================================================================
    // FilterChain
    // ==========================================================================

    #[test]
    fn empty_chain_passes_event_unchanged() {
        let health = MemoryHealthReporter::new();
        let ev = event("x", Level::Verbose);
        let out = FilterChain::new().apply(ev.clone(), &health).unwrap();
        assert_eq!(out, ev);
    }

    #[test]
    fn chain_applies_in_order() {
        let health = MemoryHealthReporter::new();
        let chain = FilterChain::new()
            .with(Transform::new("first", |e: Event| Ok(e.with_context("step", "1"))))
            .with(Transform::new("second", |e: Event| {
                let prev = e.context("step").unwrap_or_default().to_string();
                Ok(e.with_context("step", format!("{prev}2")))
            }));

        let out = chain.apply(event("x", Level::Warning), &health).unwrap();
        assert_eq!(out.context("step"), Some("12"));
        assert_eq!(chain.names(), vec!["first", "second"]);
    }

    #[test]
    fn chain_stops_at_first_discard() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let health = MemoryHealthReporter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let chain = FilterChain::new()
            .with(LevelFilter::new(Level::Warning))
            .with(Predicate::new("count", move |_: &Event| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }));

        assert!(chain.apply(event("x", Level::Verbose), &health).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn filter_error_drops_event_and_reports_problem() {
        let health = MemoryHealthReporter::new();
        let chain = FilterChain::new()
            .with(Failing)
            .with(LevelFilter::new(Level::Verbose));

        assert!(chain.apply(event("x", Level::Error), &health).is_none());

        let problems = health.with_severity(HealthSeverity::Problem);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("filter 'failing' failed"));
        assert_eq!(problems[0].category.as_deref(), Some("filter:failing"));
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_filter_drops_event_and_reports_problem() {
        let health = MemoryHealthReporter::new();
        let chain = FilterChain::new().with(Transform::new("explodes", |e: Event| {
            if e.provider_name == "bad" {
                panic!("index out of range");
            }
            Ok(e)
        }));

        assert!(chain.apply(event("bad", Level::Error), &health).is_none());
        assert!(chain.apply(event("good", Level::Error), &health).is_some());

        let problems = health.with_severity(HealthSeverity::Problem);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("filter 'explodes' failed"));
        assert!(problems[0].message.contains("index out of range"));
    }

    #[test]
    fn filter_error_does_not_affect_next_event() {
        let health = MemoryHealthReporter::new();
        let chain = FilterChain::new().with(Transform::new("odd", |e: Event| {
            if e.provider_name == "bad" {
                Err(PluginError::Filter("bad provider".into()))
            } else {
                Ok(e)
            }
        }));

        assert!(chain.apply(event("bad", Level::Error), &health).is_none());
        assert!(chain.apply(event("good", Level::Error), &health).is_some());
    }

    // ==========================================================================
    // Built-in filters
    // ==========================================================================

    #[test]
    fn level_filter_keeps_threshold_and_above() {
        let f = LevelFilter::new(Level::Warning);
        assert!(f.apply(event("x", Level::Informational)).unwrap().is_none());
        assert!(f.apply(event("x", Level::Warning)).unwrap().is_some());
        assert!(f.apply(event("x", Level::Critical)).unwrap().is_some());
    }

    #[test]
    fn drop_and_include_are_complements() {
        let drop = DropFilter::parse("providerName == noisy").unwrap();
        let include = IncludeFilter::parse("providerName == noisy").unwrap();

        assert!(drop.apply(event("noisy", Level::Error)).unwrap().is_none());
        assert!(drop.apply(event("quiet", Level::Error)).unwrap().is_some());
        assert!(include.apply(event("noisy", Level::Error)).unwrap().is_some());
        assert!(include.apply(event("quiet", Level::Error)).unwrap().is_none());
    }

    #[test]
    fn metadata_filter_enriches_matching_events_only() {
        let mut entries = Context::new();
        entries.insert("team".into(), "payments".into());
        let f = MetadataFilter::new(entries).when(Expression::parse("level >= Error").unwrap());

        let tagged = f.apply(event("x", Level::Error)).unwrap().unwrap();
        let untouched = f.apply(event("x", Level::Warning)).unwrap().unwrap();

        assert_eq!(tagged.context("team"), Some("payments"));
        assert_eq!(untouched.context("team"), None);
        assert_eq!(tagged.payload, untouched.payload);
    }
}
