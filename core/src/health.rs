//! Health reporting contract
//!
//! The pipeline reports its own operational state (failed sends, dropped
//! events, broken inputs) through a [`HealthReporter`]. Backends implement
//! the single [`HealthReporter::report`] method; the four convenience methods
//! callers actually use are provided on top of it.
//!
//! Reporting is fire-and-forget. Implementations must not block the caller
//! beyond a short lock, because every input, sink and the orchestrator
//! itself report from their own hot paths.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Severity of a health report, least severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSeverity {
    /// Everything works
    Healthy,
    /// Informational status change
    Message,
    /// Degraded but functional (e.g. events dropped on overflow)
    Warning,
    /// Something failed (e.g. a batch was lost)
    Problem,
}

impl HealthSeverity {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthSeverity::Healthy => "healthy",
            HealthSeverity::Message => "message",
            HealthSeverity::Warning => "warning",
            HealthSeverity::Problem => "problem",
        }
    }
}

impl fmt::Display for HealthSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One health report
///
/// Never persisted by the pipeline itself, only forwarded to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// How bad it is
    pub severity: HealthSeverity,
    /// Human-readable description
    pub message: String,
    /// Component the report is about (e.g. `sink:console`)
    pub category: Option<String>,
    /// When the report was created
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// New report stamped with the current time
    pub fn new(severity: HealthSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            category: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Destination for health reports
///
/// Must be cheap to call from many tasks at once.
pub trait HealthReporter: Send + Sync {
    /// Forward one report
    fn report(&self, report: HealthReport);

    /// Report that the component is healthy
    fn report_healthy(&self) {
        self.report(HealthReport::new(HealthSeverity::Healthy, "healthy"));
    }

    /// Report an informational message
    fn report_message(&self, text: &str, category: Option<&str>) {
        self.report(build(HealthSeverity::Message, text, category));
    }

    /// Report a degraded condition
    fn report_warning(&self, text: &str, category: Option<&str>) {
        self.report(build(HealthSeverity::Warning, text, category));
    }

    /// Report a failure
    fn report_problem(&self, text: &str, category: Option<&str>) {
        self.report(build(HealthSeverity::Problem, text, category));
    }
}

fn build(severity: HealthSeverity, text: &str, category: Option<&str>) -> HealthReport {
    let report = HealthReport::new(severity, text);
    match category {
        Some(c) => report.with_category(c),
        None => report,
    }
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHealthReporter;

impl HealthReporter for NullHealthReporter {
    fn report(&self, _report: HealthReport) {}
}
