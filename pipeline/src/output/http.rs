//! HTTP output
//!
//! POSTs each batch as a JSON array of events. The batch sequence number
//! travels in the [`SEQUENCE_HEADER`] header so a receiver can discard
//! duplicates or spot gaps.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use virta_core::{Event, Output, PluginError};

/// Header carrying the per-sink batch sequence number
pub const SEQUENCE_HEADER: &str = "x-virta-sequence";

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Batch-per-request HTTP output
pub struct HttpOutput {
    name: String,
    endpoint: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
    client: Client,
}

impl HttpOutput {
    /// Output posting to `endpoint` with the default request timeout
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Result<Self, PluginError> {
        Self::with_timeout(name, endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Output posting to `endpoint`, each request bounded by `timeout`
    pub fn with_timeout(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PluginError> {
        let endpoint = endpoint.into();
        reqwest::Url::parse(&endpoint)
            .map_err(|e| PluginError::Init(format!("invalid endpoint '{endpoint}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PluginError::Init(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            endpoint,
            headers: Vec::new(),
            timeout,
            client,
        })
    }

    /// Add a static header sent with every request
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Target URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Output for HttpOutput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        batch: &[Event],
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<(), PluginError> {
        if cancel.is_cancelled() {
            return Err(PluginError::Cancelled);
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(SEQUENCE_HEADER, sequence.to_string())
            .json(batch);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PluginError::Cancelled),
            response = request.send() => response,
        };

        let response = response.map_err(|e| {
            if e.is_timeout() {
                PluginError::timeout(self.timeout)
            } else if e.is_connect() {
                PluginError::Connection(format!("{}: {e}", self.endpoint))
            } else {
                PluginError::Send(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::Send(format!(
                "{} responded with {status}",
                self.endpoint
            )));
        }

        debug!(
            output = %self.name,
            sequence,
            events = batch.len(),
            status = status.as_u16(),
            "Batch posted"
        );
        Ok(())
    }
}
