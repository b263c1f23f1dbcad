//! ModelForge server binary.

use clap::Parser;
use modelforge::config::ServeConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "modelforge-server")]
#[command(about = "ModelForge model serving core")]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, env = "MODELFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long, env = "MODELFORGE_BIND_ADDR")]
    bind_addr: Option<SocketAddr>,

    /// Directory for model artifacts
    #[arg(long, env = "MODELFORGE_ARTIFACT_ROOT")]
    artifact_root: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "MODELFORGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "MODELFORGE_JSON_LOGS")]
    json_logs: bool,

    /// Number of job workers
    #[arg(long, env = "MODELFORGE_WORKERS")]
    workers: Option<usize>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "MODELFORGE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = args.config {
        ServeConfig::from_file(&config_path)?
    } else {
        ServeConfig::development()
    };

    if let Some(bind_addr) = args.bind_addr {
        config.server.bind_addr = bind_addr;
    }
    if let Some(artifact_root) = args.artifact_root {
        config.storage.artifact_root = artifact_root;
    }
    if let Some(log_level) = args.log_level {
        config.observability.log_level = log_level;
    }
    if args.json_logs {
        config.observability.json_logs = true;
    }
    if let Some(workers) = args.workers {
        config.jobs.workers = workers;
    }
    if let Some(metrics_addr) = args.metrics_addr {
        config.observability.metrics_enabled = true;
        config.observability.metrics_addr = metrics_addr;
    }

    modelforge::run(config).await?;
    Ok(())
}
