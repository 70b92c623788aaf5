//! Newline-delimited JSON input
//!
//! Reads one event per line from stdin (or any async reader). Each line is
//! the serialized [`Event`] shape:
//!
//! ```json
//! {"providerName":"orders","level":"Warning","payload":{"msg":"slow query"}}
//! ```
//!
//! `timestamp` defaults to ingestion time and `level` to Informational. A
//! malformed line is reported through `on_error` and skipped; it never ends
//! the subscription.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use virta_core::{Event, EventObserver, Input, PluginError, Subscription};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// NDJSON input over an async reader
pub struct JsonLinesInput {
    name: String,
    reader: Mutex<Option<BoxedReader>>,
}

impl JsonLinesInput {
    /// Read from the process's stdin
    pub fn stdin(name: impl Into<String>) -> Self {
        Self::from_reader(name, tokio::io::stdin())
    }

    /// Read from any async reader
    pub fn from_reader(name: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            reader: Mutex::new(Some(Box::new(reader))),
        }
    }
}

/// Parse one raw line into an event; `None` for a blank line
fn decode_line(raw: &[u8], line_no: u64) -> Result<Option<Event>, PluginError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| PluginError::Decode(format!("line {line_no}: {e}")))?
        .trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| PluginError::Decode(format!("line {line_no}: {e}")))
}

#[async_trait]
impl Input for JsonLinesInput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(
        &self,
        observer: Arc<dyn EventObserver>,
    ) -> Result<Subscription, PluginError> {
        let reader = self.reader.lock().take().ok_or(PluginError::NotReady)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            // Raw segments, so bad UTF-8 costs one line rather than the stream
            let mut lines = BufReader::new(reader).split(b'\n');
            let mut line_no = 0u64;
            let mut decoded = 0u64;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = lines.next_segment() => next,
                };
                let raw = match next {
                    Ok(Some(raw)) => raw,
                    Ok(None) => {
                        info!(input = %name, lines = line_no, "End of input reached");
                        break;
                    }
                    Err(e) => {
                        observer.on_error(PluginError::Connection(format!("read failed: {e}")));
                        break;
                    }
                };
                line_no += 1;

                match decode_line(&raw, line_no) {
                    Ok(Some(event)) => {
                        decoded += 1;
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = observer.on_event(event) => {}
                        }
                    }
                    Ok(None) => {}
                    Err(e) => observer.on_error(e),
                }
            }
            debug!(input = %name, decoded, "JSON lines input stopped");
        });

        Ok(Subscription::new(cancel, task))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use virta_core::Level;

    #[derive(Default)]
    struct Collect {
        events: Mutex<Vec<Event>>,
        errors: Mutex<Vec<PluginError>>,
    }

    #[async_trait]
    impl EventObserver for Collect {
        async fn on_event(&self, event: Event) {
            self.events.lock().push(event);
        }

        fn on_error(&self, error: PluginError) {
            self.errors.lock().push(error);
        }
    }

    async fn run(input: &str) -> Arc<Collect> {
        run_bytes(input.as_bytes()).await
    }

    async fn run_bytes(input: &[u8]) -> Arc<Collect> {
        let input = JsonLinesInput::from_reader("lines", std::io::Cursor::new(input.to_vec()));
        let observer = Arc::new(Collect::default());
        let sub = input.subscribe(observer.clone()).await.unwrap();
        // EOF ends the producer on its own
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.unsubscribe(Duration::from_secs(1)).await);
        observer
    }

    #[tokio::test]
    async fn decodes_each_line() {
        let observer = run(concat!(
            r#"{"providerName":"X","level":"Warning","payload":{"msg":"a"}}"#,
            "\n",
            r#"{"providerName":"X","level":"Error","payload":{"msg":"b"}}"#,
            "\n",
        ))
        .await;

        let events = observer.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, Level::Warning);
        assert_eq!(events[1].field("msg").and_then(|v| v.as_str()), Some("b"));
        assert!(observer.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_line_goes_to_on_error_and_is_skipped() {
        let observer = run(concat!(
            "not json\n",
            "\n",
            r#"{"providerName":"X"}"#,
            "\n",
        ))
        .await;

        assert_eq!(observer.events.lock().len(), 1);
        let errors = observer.errors.lock();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            PluginError::Decode(msg) => assert!(msg.starts_with("line 1:"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_skipped_and_reading_continues() {
        let mut bytes = b"\xff\xfe bad\n".to_vec();
        bytes.extend_from_slice(br#"{"providerName":"X"}"#);
        bytes.push(b'\n');
        let observer = run_bytes(&bytes).await;

        let events = observer.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].provider_name, "X");
        let errors = observer.errors.lock();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            PluginError::Decode(msg) => assert!(msg.starts_with("line 1:"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn crlf_and_unterminated_last_line_decode() {
        let observer = run("{\"providerName\":\"A\"}\r\n{\"providerName\":\"B\"}").await;
        let events = observer.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].provider_name, "B");
        assert!(observer.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_level_defaults_to_informational() {
        let observer = run("{\"providerName\":\"X\",\"payload\":{}}\n").await;
        assert_eq!(observer.events.lock()[0].level, Level::Informational);
    }

    #[tokio::test]
    async fn reader_is_consumed_by_first_subscribe() {
        let input = JsonLinesInput::from_reader("lines", std::io::Cursor::new(Vec::new()));
        let _sub = input.subscribe(Arc::new(Collect::default())).await.unwrap();
        let err = input.subscribe(Arc::new(Collect::default())).await.unwrap_err();
        assert_eq!(err, PluginError::NotReady);
    }
}
