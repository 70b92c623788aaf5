//! `virta` binary
//!
//! ```bash
//! VIRTA_CONFIG=pipeline.json VIRTA_LOG_FORMAT=json virta
//! virta path/to/pipeline.json
//! ```
//!
//! A path given as the first argument takes precedence over `VIRTA_CONFIG`.

use virta_runtime::RuntimeBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut builder = RuntimeBuilder::new();
    if let Some(path) = std::env::args_os().nth(1) {
        builder = builder.config_path(path);
    }
    builder.run().await
}
