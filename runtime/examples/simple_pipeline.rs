//! Programmatic pipeline, no configuration file.
//!
//! ```bash
//! cargo run -p virta-runtime --example simple_pipeline
//! ```

use std::sync::Arc;
use std::time::Duration;
use virta_runtime::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (input, handle) = ChannelInput::new("app", 256);

    let pipeline = Pipeline::builder()
        .input(Arc::new(input))
        .input(Arc::new(HeartbeatInput::new("beat", Duration::from_secs(1))))
        .filter(Arc::new(LevelFilter::new(Level::Informational)))
        .sink(Sink::new("console", Arc::new(StdoutOutput::pretty("console"))))
        .settings(
            BatchSettings::new(OverflowPolicy::DropOldest)
                .max_batch_size(10)
                .max_batch_delay(Duration::from_millis(500)),
        )
        .build()?;

    serve(&pipeline, async move {
        for i in 0..5 {
            let _ = handle
                .send(Event::new("example", Level::Warning).with_field("i", i))
                .await;
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
    })
    .await
}
