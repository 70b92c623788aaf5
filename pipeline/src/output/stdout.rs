//! Stdout output for debugging
//!
//! Prints batches to stdout either as JSON lines (one event per line) or in
//! a human-readable block format.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use virta_core::{Event, Output, PluginError};

/// How [`StdoutOutput`] renders events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdoutFormat {
    /// One serialized event per line
    #[default]
    Json,
    /// Boxed, human-readable batch
    Pretty,
}

/// Stdout output - prints batches for debugging
pub struct StdoutOutput {
    name: String,
    format: StdoutFormat,
    /// Count of events written
    emitted_count: AtomicU64,
}

impl StdoutOutput {
    /// Create a stdout output
    pub fn new(name: impl Into<String>, format: StdoutFormat) -> Self {
        Self {
            name: name.into(),
            format,
            emitted_count: AtomicU64::new(0),
        }
    }

    /// JSON lines output
    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, StdoutFormat::Json)
    }

    /// Pretty output
    pub fn pretty(name: impl Into<String>) -> Self {
        Self::new(name, StdoutFormat::Pretty)
    }

    /// Get total events written
    pub fn emitted_count(&self) -> u64 {
        self.emitted_count.load(Ordering::Relaxed)
    }

    /// Render a batch; stops early if `cancel` fires between events
    fn render(
        &self,
        batch: &[Event],
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<String, PluginError> {
        let mut out = String::new();
        if self.format == StdoutFormat::Pretty {
            let _ = writeln!(
                out,
                "┌─ {} batch {sequence} ({} events) ─────────────────────",
                self.name,
                batch.len()
            );
        }

        for event in batch {
            if cancel.is_cancelled() {
                return Err(PluginError::Cancelled);
            }
            match self.format {
                StdoutFormat::Json => {
                    let line = serde_json::to_string(event)
                        .map_err(|e| PluginError::Send(format!("serialize failed: {e}")))?;
                    out.push_str(&line);
                    out.push('\n');
                }
                StdoutFormat::Pretty => {
                    let payload = serde_json::Value::Object(event.payload.clone());
                    let _ = writeln!(
                        out,
                        "│ {} {:<13} {}  {}",
                        event.timestamp.to_rfc3339(),
                        event.level.as_str(),
                        event.provider_name,
                        payload
                    );
                    if !event.context.is_empty() {
                        let _ = writeln!(out, "│   context: {:?}", event.context);
                    }
                }
            }
        }

        if self.format == StdoutFormat::Pretty {
            let _ = writeln!(
                out,
                "└─────────────────────────────────────────────────────"
            );
        }
        Ok(out)
    }
}

#[async_trait]
impl Output for StdoutOutput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        batch: &[Event],
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<(), PluginError> {
        let rendered = self.render(batch, sequence, cancel)?;

        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(rendered.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| PluginError::Send(format!("stdout write failed: {e}")))?;

        self.emitted_count
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use virta_core::Level;

    fn batch() -> Vec<Event> {
        vec![
            Event::new("X", Level::Warning).with_field("msg", "a"),
            Event::new("X", Level::Error)
                .with_field("msg", "b")
                .with_context("region", "eu"),
        ]
    }

    #[test]
    fn json_renders_one_line_per_event() {
        let output = StdoutOutput::json("console");
        let text = output
            .render(&batch(), 0, &CancellationToken::new())
            .unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let decoded: Event = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(decoded, batch()[1].clone().with_timestamp(decoded.timestamp));
    }

    #[test]
    fn pretty_renders_batch_header_and_context() {
        let output = StdoutOutput::pretty("console");
        let text = output
            .render(&batch(), 7, &CancellationToken::new())
            .unwrap();

        assert!(text.contains("console batch 7 (2 events)"));
        assert!(text.contains("Warning"));
        assert!(text.contains(r#"{"msg":"b"}"#));
        assert!(text.contains("region"));
    }

    #[test]
    fn cancelled_render_stops() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = StdoutOutput::json("console")
            .render(&batch(), 0, &cancel)
            .unwrap_err();
        assert_eq!(err, PluginError::Cancelled);
    }

    #[tokio::test]
    async fn send_counts_events() {
        let output = StdoutOutput::json("console");
        output
            .send(&batch(), 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.emitted_count(), 2);
    }
}
