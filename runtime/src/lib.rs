//! virta runtime - process glue around the pipeline
//!
//! Provides [`run()`] for zero-boilerplate startup from environment and a
//! configuration file, and [`RuntimeBuilder`] for hosts that register their
//! own plugin kinds.
//!
//! # Quick start
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     virta_runtime::run().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod prelude;

pub use config::{LogFormat, RuntimeConfig};

use anyhow::Context as _;
use std::future::Future;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use virta_pipeline::{ItemRegistry, Pipeline, PipelineConfig};

/// Run a pipeline with default settings.
///
/// Loads runtime settings from environment variables, initialises tracing,
/// builds the pipeline described by `VIRTA_CONFIG` with the built-in plugin
/// kinds, then runs until SIGINT or SIGTERM.
pub async fn run() -> anyhow::Result<()> {
    RuntimeBuilder::new().run().await
}

/// Builder for controlling runtime behaviour.
///
/// # Example
///
/// ```ignore
/// let mut registry = ItemRegistry::with_builtins();
/// registry.register_output("kafka", kafka_factory);
///
/// RuntimeBuilder::new()
///     .config_path("/etc/virta/pipeline.json")
///     .registry(registry)
///     .run()
///     .await
/// ```
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    registry: ItemRegistry,
}

impl RuntimeBuilder {
    /// Builder with the built-in plugin kinds
    pub fn new() -> Self {
        Self {
            config_path: None,
            registry: ItemRegistry::with_builtins(),
        }
    }

    /// Override the pipeline configuration file.
    ///
    /// Default: `VIRTA_CONFIG` env var, or `virta.json`.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Replace the plugin registry
    pub fn registry(mut self, registry: ItemRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Load everything and run to completion.
    ///
    /// This is the terminal method; it returns after shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        // ── 1. Load runtime settings from env ────────────────────
        let runtime = RuntimeConfig::from_env()?;

        // ── 2. Init tracing ──────────────────────────────────────
        init_tracing(&runtime)?;

        // ── 3. Load and build the pipeline ───────────────────────
        let path = self.config_path.unwrap_or(runtime.config_path);
        info!(config = %path.display(), "Starting virta");

        let document = PipelineConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?;
        let pipeline = self
            .registry
            .build_pipeline(&document)
            .with_context(|| format!("building pipeline from {}", path.display()))?;

        // ── 4. Run until a signal arrives ────────────────────────
        serve(&pipeline, shutdown_signal()).await?;
        info!("virta shutdown complete");
        Ok(())
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Start `pipeline`, wait for `shutdown`, then stop it.
///
/// Stopping drains sinks within the configured drain timeout.
pub async fn serve(pipeline: &Pipeline, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    pipeline.start().await?;
    info!(
        inputs = ?pipeline.input_names(),
        sinks = ?pipeline.sink_names(),
        "Pipeline running, waiting for shutdown signal"
    );

    shutdown.await;

    pipeline.stop().await;
    for stats in pipeline.sink_stats() {
        info!(
            sink = %stats.name,
            delivered = stats.events_delivered,
            batches = stats.batches_sent,
            failed = stats.batches_failed,
            dropped = stats.dropped,
            "Sink summary"
        );
    }
    Ok(())
}

/// Initialise the tracing subscriber based on config.
fn init_tracing(config: &RuntimeConfig) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    // Fails only when the embedding process already installed a subscriber
    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already set, keeping it");
    }
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
