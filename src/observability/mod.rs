//! Observability module for ModelForge.
//!
//! Provides logging initialization, the Prometheus exporter and the counters
//! recorded by the serving paths.

pub mod histograms;

use crate::config::ObservabilityConfig;
use crate::error::{Result, ServeError};
use crate::shutdown::ShutdownCoordinator;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging. `RUST_LOG` overrides the configured level.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ServeError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ServeError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server until shutdown.
pub async fn run_metrics_server(config: ObservabilityConfig, shutdown: ShutdownCoordinator) -> Result<()> {
    let handle = PrometheusBuilder::new()
        .set_buckets(&histograms::LATENCY_BUCKETS)
        .map_err(|e| ServeError::Internal(format!("Invalid histogram buckets: {}", e)))?
        .install_recorder()
        .map_err(|e| ServeError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .map_err(|e| ServeError::Internal(format!("Metrics server failed: {}", e)))?;

    Ok(())
}

/// Register standard metrics so they appear before the first event.
fn register_metrics() {
    counter!("modelforge_predictions_total").absolute(0);
    counter!("modelforge_jobs_submitted_total").absolute(0);
    counter!("modelforge_job_retries_total").absolute(0);
    counter!("modelforge_retention_deleted_total").absolute(0);
    gauge!("modelforge_sessions_loaded").set(0.0);
}

/// Record a synchronous prediction.
pub fn record_prediction(cache_status: &str) {
    counter!(
        "modelforge_predictions_total",
        "cache" => cache_status.to_string()
    )
    .increment(1);
}

/// Record a model status transition.
pub fn record_lifecycle_transition(from: &str, to: &str) {
    counter!(
        "modelforge_model_transitions_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record an accepted job.
pub fn record_job_submitted() {
    counter!("modelforge_jobs_submitted_total").increment(1);
}

/// Record a job reaching a terminal status.
pub fn record_job_finished(status: &str) {
    counter!("modelforge_jobs_finished_total", "status" => status.to_string()).increment(1);
}

/// Record a job retry.
pub fn record_job_retry() {
    counter!("modelforge_job_retries_total").increment(1);
}

/// Record jobs removed by the retention sweep.
pub fn record_retention_deleted(count: usize) {
    counter!("modelforge_retention_deleted_total").increment(count as u64);
}

/// Update the loaded session gauge.
pub fn update_session_gauge(loaded: usize) {
    gauge!("modelforge_sessions_loaded").set(loaded as f64);
}
