//! Background retention loop for finished jobs.

use super::coordinator::JobCoordinator;
use crate::shutdown::ShutdownCoordinator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Run the retention sweep every `interval` until shutdown.
///
/// The first sweep happens one interval after start.
pub async fn run_retention_loop(
    coordinator: Arc<JobCoordinator>,
    interval: Duration,
    shutdown: ShutdownCoordinator,
) {
    info!(interval_secs = interval.as_secs(), "Job retention loop started");
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = coordinator.run_retention_sweep(Utc::now()).await {
                    error!(error = %e, "Job retention sweep failed");
                }
            }
            _ = shutdown.wait_for_shutdown() => {
                info!("Job retention loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsConfig;
    use crate::scheduling::MemoryJobQueue;
    use crate::store::RecordStore;
    use crate::testing::{committed_model, lifecycle_fixture, wait_for};
    use crate::types::JobPriority;
    use serde_json::json;

    #[tokio::test]
    async fn test_loop_sweeps_and_stops_on_shutdown() {
        let fixture = lifecycle_fixture();
        let config = JobsConfig {
            retention: Duration::from_secs(60),
            ..JobsConfig::default()
        };
        let coordinator = Arc::new(JobCoordinator::new(
            fixture.records.clone(),
            fixture.lifecycle.clone(),
            Arc::new(MemoryJobQueue::new(8)),
            config,
        ));
        let model_id = committed_model(&fixture).await;
        let job = coordinator
            .submit(model_id, json!({}), JobPriority::Low)
            .await
            .unwrap();
        coordinator.cancel(job.id).await.unwrap();
        let mut aged = fixture.records.get_job(job.id).await.unwrap().unwrap();
        aged.completed_at = Some(Utc::now() - chrono::Duration::minutes(5));
        fixture.records.update_job(aged).await.unwrap();

        let shutdown = ShutdownCoordinator::new();
        let handle = tokio::spawn(run_retention_loop(
            Arc::clone(&coordinator),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        let job_id = job.id;
        wait_for(|| {
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.get(job_id).await.is_err() }
        })
        .await;

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
