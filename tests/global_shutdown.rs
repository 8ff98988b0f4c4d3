//! The global subscriber never drops its layer, so queued events only reach
//! the sink through `LayerHandle::shutdown`.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Duration;
use tracing_json_file::init::{init_tracing_with_config, LayerConfig};
use tracing_json_file::noop_sink::MemorySink;
use tracing_json_file::{JsonFileTarget, TargetConfig};

#[tokio::test]
async fn test_shutdown_exports_events_from_global_subscriber() {
    let sink = MemorySink::new();
    let target = Arc::new(JsonFileTarget::new(TargetConfig::default(), sink.clone()));
    let handle = init_tracing_with_config(
        Arc::clone(&target),
        LayerConfig {
            flush_interval: Duration::from_secs(60),
            ..LayerConfig::default()
        },
    )
    .unwrap();

    tracing::error!(order = 17, "last words before exit");
    handle.shutdown().await;

    let lines: Vec<Value> = sink
        .lines()
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["message"], json!("last words before exit"));
    assert_eq!(lines[0]["order"], json!(17));
    assert_eq!(lines[0]["level"], json!("error"));
    assert!(target.is_empty());
}
