use std::sync::Arc;
use tracing::{error, info, warn};

use tracing_json_file::init::{init_tracing_with_config, LayerConfig};
use tracing_json_file::{EnvironmentContext, FileConfig, FileSink, JsonFileTarget, TargetConfig};

#[tokio::main]
async fn main() {
    let sink = FileSink::new(FileConfig {
        path: "logs/app.log".into(),
        max_file_size_kb: 1024,
        max_log_files: 3,
        ..FileConfig::default()
    });
    let config = TargetConfig {
        export_interval: 100,
        except: vec!["tracing_json_file*".to_string()],
        log_vars: vec!["env.HOSTNAME".to_string(), "env.USER".to_string()],
        ..TargetConfig::default()
    };
    let target = Arc::new(
        JsonFileTarget::new(config, sink).with_context(EnvironmentContext::new("app-log-demo")),
    );

    let handle = init_tracing_with_config(
        Arc::clone(&target),
        LayerConfig { enable_stdout: true, ..LayerConfig::default() },
    )
    .expect("install subscriber");

    info!("starting service");
    warn!(queue = "orders", depth = 1200, "queue is backing up");
    error!(
        user_id = 42,
        reason = "invalid password",
        "authentication failed"
    );

    handle.shutdown().await;
    println!("{:?}", target.stats());
}
