use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use tracing_json_file::init::init_tracing;
use tracing_json_file::noop_sink::NoopSink;
use tracing_json_file::{JsonFileTarget, TargetConfig};

#[tokio::main]
async fn main() {
    let target = Arc::new(JsonFileTarget::new(TargetConfig::default(), NoopSink));
    let handle = init_tracing(Arc::clone(&target)).expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Drain the channel and export what is left
    handle.shutdown().await;
    println!("{:?}", target.stats());
}
