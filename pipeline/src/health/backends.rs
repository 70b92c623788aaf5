//! Health reporting backends

use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};
use virta_core::{HealthReport, HealthReporter, HealthSeverity};

/// Forwards health reports to `tracing`
///
/// Healthy and message reports log at INFO, warnings at WARN, problems at
/// ERROR. This is the default backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHealthReporter;

impl HealthReporter for TracingHealthReporter {
    fn report(&self, report: HealthReport) {
        let category = report.category.as_deref().unwrap_or("-");
        match report.severity {
            HealthSeverity::Healthy | HealthSeverity::Message => {
                info!(category, severity = %report.severity, "{}", report.message)
            }
            HealthSeverity::Warning => {
                warn!(category, "{}", report.message)
            }
            HealthSeverity::Problem => {
                error!(category, "{}", report.message)
            }
        }
    }
}

/// Rows buffered between reporters and the CSV writer
const CSV_QUEUE_CAPACITY: usize = 1024;

/// Appends health reports to a CSV file
///
/// Columns: `timestamp,severity,category,message`. The header is written
/// when the file is empty. Reporting only formats the row and queues it; a
/// writer thread owns the file, so a slow disk never stalls a dispatch loop.
/// When the queue is full the row is dropped and counted. Dropping the
/// reporter flushes whatever is queued.
pub struct CsvHealthReporter {
    path: PathBuf,
    rows: Option<mpsc::Sender<String>>,
    writer: Option<JoinHandle<()>>,
    dropped: AtomicU64,
}

impl CsvHealthReporter {
    /// Open (or create) `path` for appending and start the writer
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let empty = file.metadata()?.len() == 0;

        let mut out = LineWriter::new(file);
        if empty {
            writeln!(out, "timestamp,severity,category,message")?;
        }

        let (tx, mut rx) = mpsc::channel::<String>(CSV_QUEUE_CAPACITY);
        let path_display = path.display().to_string();
        let writer = thread::Builder::new()
            .name("virta-health-csv".into())
            .spawn(move || {
                while let Some(row) = rx.blocking_recv() {
                    if let Err(e) = writeln!(out, "{row}") {
                        warn!(path = %path_display, error = %e, "Failed to write health report");
                    }
                }
                if let Err(e) = out.flush() {
                    warn!(path = %path_display, error = %e, "Failed to flush health reports");
                }
            })?;

        Ok(Self {
            path,
            rows: Some(tx),
            writer: Some(writer),
            dropped: AtomicU64::new(0),
        })
    }

    /// File being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows lost because the writer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl HealthReporter for CsvHealthReporter {
    fn report(&self, report: HealthReport) {
        let Some(rows) = &self.rows else {
            return;
        };
        let row = format!(
            "{},{},{},{}",
            report.timestamp.to_rfc3339(),
            report.severity,
            escape(report.category.as_deref().unwrap_or("")),
            escape(&report.message),
        );
        match rows.try_send(row) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(path = %self.path.display(), total_dropped = total, "Health CSV queue full, report dropped");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(path = %self.path.display(), "Health CSV writer gone, report dropped");
            }
        }
    }
}

impl Drop for CsvHealthReporter {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit
        self.rows.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!(path = %self.path.display(), "Health CSV writer panicked");
            }
        }
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Keeps reports in memory
///
/// For embedding hosts that surface health themselves, and for tests.
#[derive(Default)]
pub struct MemoryHealthReporter {
    reports: Mutex<Vec<HealthReport>>,
}

impl MemoryHealthReporter {
    /// Create an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every report received so far
    pub fn reports(&self) -> Vec<HealthReport> {
        self.reports.lock().clone()
    }

    /// Reports with the given severity
    pub fn with_severity(&self, severity: HealthSeverity) -> Vec<HealthReport> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .cloned()
            .collect()
    }

    /// Number of reports with the given severity
    pub fn count(&self, severity: HealthSeverity) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }

    /// Discard everything received so far
    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl HealthReporter for MemoryHealthReporter {
    fn report(&self, report: HealthReport) {
        self.reports.lock().push(report);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn csv_writes_header_once_and_escapes_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.csv");

        {
            let reporter = CsvHealthReporter::open(&path).unwrap();
            reporter.report_problem("send failed, status \"503\"", Some("sink:http"));
        }
        {
            let reporter = CsvHealthReporter::open(&path).unwrap();
            reporter.report_healthy();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,severity,category,message");
        assert!(lines[1].ends_with(",problem,sink:http,\"send failed, status \"\"503\"\"\""));
        assert!(lines[2].ends_with(",healthy,,healthy"));
    }

    #[test]
    fn csv_rows_are_flushed_when_reporter_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.csv");

        let reporter = CsvHealthReporter::open(&path).unwrap();
        for i in 0..50 {
            reporter.report_warning(&format!("queue full {i}"), Some("sink:a"));
        }
        assert_eq!(reporter.dropped(), 0);
        drop(reporter);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 51);
        assert!(text.lines().last().unwrap().ends_with(",warning,sink:a,queue full 49"));
    }

    #[test]
    fn memory_counts_by_severity() {
        let memory = MemoryHealthReporter::new();
        memory.report_warning("a", None);
        memory.report_warning("b", None);
        memory.report_problem("c", None);

        assert_eq!(memory.count(HealthSeverity::Warning), 2);
        assert_eq!(memory.with_severity(HealthSeverity::Problem)[0].message, "c");

        memory.clear();
        assert!(memory.reports().is_empty());
    }

    #[test]
    #[tracing_test::traced_test]
    fn tracing_reporter_logs_each_severity() {
        let reporter = TracingHealthReporter;
        reporter.report_healthy();
        reporter.report_warning("queue full, dropped 3", Some("sink:a"));
        reporter.report_problem("batch 7 lost", Some("sink:b"));

        assert!(logs_contain("healthy"));
        assert!(logs_contain("queue full, dropped 3"));
        assert!(logs_contain("batch 7 lost"));
        assert!(logs_contain("sink:b"));
    }
}
