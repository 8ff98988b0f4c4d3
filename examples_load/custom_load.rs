use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tracing::error;

use tracing_json_file::init::{init_tracing_with_config, LayerConfig};
use tracing_json_file::noop_sink::NoopSink;
use tracing_json_file::{JsonFileTarget, StaticContext, TargetConfig};

#[tokio::main]
async fn main() {
    let target_config = TargetConfig {
        export_interval: 5_000,
        log_vars: vec!["region".to_string()],
        ..TargetConfig::default()
    };
    let context = StaticContext::new("load-test").with_variable("region", "eu-west");
    let target = Arc::new(JsonFileTarget::new(target_config, NoopSink).with_context(context));

    let layer_config = LayerConfig {
        channel_buffer: 50_000,
        batch_size: 1_000,
        flush_interval: Duration::from_millis(200),
        enable_stdout: false,
    };

    let handle = init_tracing_with_config(Arc::clone(&target), layer_config).expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    handle.shutdown().await;
    println!("{:?}", target.stats());
}
