//! Retry output with exponential backoff
//!
//! Wraps an output to retry failed sends with configurable backoff. The
//! engine never retries on its own, so this is where redelivery lives when a
//! destination wants it. Each failed attempt is reported as a health warning;
//! only the final failure reaches the engine, which reports it as a problem.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use virta_core::{Event, HealthReporter, Output, PluginError};

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    #[serde(rename = "initialDelayMs", with = "millis")]
    pub initial_delay: Duration,
    /// Cap on any single delay
    #[serde(rename = "maxDelayMs", with = "millis")]
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Retries after the first attempt (0 = no retries)
    pub max_attempts: u32,
    /// Randomizes each delay by +/- this fraction (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 3,
            jitter_factor: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Delay before `attempt` (0 is the first try and never waits)
    ///
    /// `sample` in [0.0, 1.0] places the delay in the jitter band: 0.5 keeps
    /// the exponential base, 0.0 and 1.0 are the band edges.
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let Some(retry) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let cap_us = self.max_delay.as_micros() as f64;
        let base_us = (self.initial_delay.as_micros() as f64 * self.multiplier.powi(exponent)).min(cap_us);

        let band_us = base_us * self.jitter_factor.clamp(0.0, 1.0);
        let jittered_us = base_us + band_us * (sample.clamp(0.0, 1.0) * 2.0 - 1.0);
        Duration::from_micros(jittered_us.max(1.0) as u64)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Output wrapper that retries failed sends
pub struct RetryOutput {
    inner: Arc<dyn Output>,
    config: BackoffConfig,
    /// Randomly keyed per output, so concurrent retries spread apart
    jitter: RandomState,
    health: OnceLock<Arc<dyn HealthReporter>>,
    /// Total retry attempts
    retry_count: AtomicU64,
    /// Sends that succeeded after at least one failure
    recovered_count: AtomicU64,
}

impl RetryOutput {
    /// Wrap `inner`
    pub fn new(inner: Arc<dyn Output>, config: BackoffConfig) -> Self {
        Self {
            inner,
            config,
            jitter: RandomState::new(),
            health: OnceLock::new(),
            retry_count: AtomicU64::new(0),
            recovered_count: AtomicU64::new(0),
        }
    }

    /// Wrap `inner` with default backoff
    pub fn with_defaults(inner: Arc<dyn Output>) -> Self {
        Self::new(inner, BackoffConfig::default())
    }

    /// Total retry attempts
    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Sends that recovered after failing
    pub fn recovered_count(&self) -> u64 {
        self.recovered_count.load(Ordering::Relaxed)
    }

    /// Jitter sample in [0.0, 1.0] for one retry of one batch
    fn jitter_sample(&self, sequence: u64, attempt: u32) -> f64 {
        self.jitter.hash_one((sequence, attempt)) as f64 / u64::MAX as f64
    }

    fn report_transient(&self, sequence: u64, attempt: u32, error: &PluginError) {
        if let Some(health) = self.health.get() {
            health.report_warning(
                &format!(
                    "output '{}' batch {sequence} attempt {} failed, retrying: {error}",
                    self.inner.name(),
                    attempt + 1
                ),
                None,
            );
        }
    }
}

#[async_trait]
impl Output for RetryOutput {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(
        &self,
        batch: &[Event],
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<(), PluginError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_attempts {
            let delay = self
                .config
                .delay(attempt, self.jitter_sample(sequence, attempt));
            if !delay.is_zero() {
                self.retry_count.fetch_add(1, Ordering::Relaxed);
                debug!(
                    output = self.inner.name(),
                    sequence,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying send"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PluginError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.inner.send(batch, sequence, cancel).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_count.fetch_add(1, Ordering::Relaxed);
                        info!(
                            output = self.inner.name(),
                            sequence,
                            attempt,
                            "Send recovered after retry"
                        );
                    }
                    return Ok(());
                }
                Err(PluginError::Cancelled) => return Err(PluginError::Cancelled),
                Err(e) => {
                    warn!(
                        output = self.inner.name(),
                        sequence,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Send failed"
                    );
                    if attempt < self.config.max_attempts {
                        self.report_transient(sequence, attempt, &e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PluginError::Send("all retries exhausted".into())))
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        self.inner.shutdown().await
    }

    fn bind_health(&self, reporter: Arc<dyn HealthReporter>) {
        let _ = self.health.set(Arc::clone(&reporter));
        self.inner.bind_health(reporter);
    }
}
