//! Runtime with an extra plugin kind registered.
//!
//! ```bash
//! cargo run -p virta-runtime --example custom_runtime -- pipeline.json
//! ```
//!
//! `pipeline.json` can then use `{ "type": "uppercase", "field": "msg" }` as
//! a filter.

use std::sync::Arc;
use virta_runtime::prelude::*;

#[derive(serde::Deserialize)]
struct UppercaseSettings {
    field: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut registry = ItemRegistry::with_builtins();
    registry.register_filter("uppercase", |item| {
        let settings: UppercaseSettings = parse_settings(item)?;
        Ok(Arc::new(Transform::new("uppercase", move |mut event: Event| {
            if let Some(serde_json::Value::String(text)) = event.payload.get_mut(&settings.field) {
                *text = text.to_uppercase();
            }
            Ok(event)
        })))
    });

    let mut builder = RuntimeBuilder::new().registry(registry);
    if let Some(path) = std::env::args_os().nth(1) {
        builder = builder.config_path(path);
    }
    builder.run().await
}
