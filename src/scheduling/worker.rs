//! Worker pool executing queued jobs.

use super::coordinator::JobCoordinator;
use super::queue::QueuedTask;
use crate::observability::histograms;
use crate::resilience::{cancelled, sleep_or_cancel, with_timeout, RetryConfig};
use crate::shutdown::ShutdownCoordinator;
use crate::types::{Job, JobId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A fixed set of worker tasks draining the job queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks. They stop taking new work on shutdown.
    pub fn spawn(coordinator: Arc<JobCoordinator>, workers: usize, shutdown: &ShutdownCoordinator) -> Self {
        let handles = (0..workers.max(1))
            .map(|n| {
                let worker_id = format!("worker-{}", n);
                tokio::spawn(worker_loop(worker_id, Arc::clone(&coordinator), shutdown.clone()))
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Job worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(worker_id: String, coordinator: Arc<JobCoordinator>, shutdown: ShutdownCoordinator) {
    info!(worker_id = %worker_id, "Job worker started");
    let queue = Arc::clone(coordinator.queue());

    loop {
        let task = tokio::select! {
            task = queue.dequeue() => task,
            _ = shutdown.wait_for_shutdown() => {
                info!(worker_id = %worker_id, "Job worker shutting down");
                break;
            }
        };
        let Some(task) = task else {
            info!(worker_id = %worker_id, "Job queue closed");
            break;
        };
        process(&coordinator, &worker_id, task).await;
    }
}

/// Claim and run one task. Execution runs in its own task so a panic fails
/// the job without taking the worker down.
async fn process(coordinator: &Arc<JobCoordinator>, worker_id: &str, task: QueuedTask) {
    let (job, cancel) = match coordinator.start(&task, worker_id).await {
        Ok(Some(claimed)) => claimed,
        Ok(None) => return,
        Err(e) => {
            error!(job_id = %task.job_id, worker_id, error = %e, "Failed to start job");
            return;
        }
    };

    let job_id = job.id;
    let guard = RunningGuard::new(Arc::clone(coordinator), job_id);
    let runner = Arc::clone(coordinator);
    let handle = tokio::spawn(async move {
        let mut guard = guard;
        execute(&runner, job, cancel).await;
        guard.disarm();
    });

    if let Err(e) = handle.await {
        error!(job_id = %job_id, worker_id, error = %e, "Job execution panicked");
    }
}

/// Run the attempts of one job until it succeeds, fails for good, or is
/// cancelled.
async fn execute(coordinator: &JobCoordinator, job: Job, mut cancel: watch::Receiver<bool>) {
    let retry = RetryConfig {
        max_attempts: job.max_retries + 1,
        ..coordinator.config().retry_config()
    };
    let timeout = coordinator.config().execution_timeout;
    let executor = Arc::clone(coordinator.executor());
    let mut attempts = Vec::new();
    let mut attempt = job.retries + 1;

    loop {
        if *cancel.borrow() {
            debug!(job_id = %job.id, "Job cancelled before attempt");
            return;
        }

        let start = Instant::now();
        let run = with_timeout(timeout, || executor.execute(job.model_id, &job.input_data));
        let result = tokio::select! {
            result = run => result,
            _ = cancelled(&mut cancel) => {
                info!(job_id = %job.id, attempt, "Job cancelled during execution");
                return;
            }
        };

        let err = match result {
            Ok((output, inference_time_ms)) => {
                histograms::record_job_execution_latency("completed", start.elapsed());
                match coordinator.complete(job.id, output, inference_time_ms).await {
                    Ok(true) => info!(job_id = %job.id, attempt, inference_time_ms, "Job completed"),
                    Ok(false) => debug!(job_id = %job.id, "Job result discarded"),
                    Err(e) => error!(job_id = %job.id, error = %e, "Failed to store job result"),
                }
                return;
            }
            Err(e) => e,
        };

        attempts.push(format!("attempt {}: {}", attempt, err));
        let retryable = err.is_retryable() && !err.is_permanent();

        if retryable && retry.has_attempts_left(attempt) {
            let delay = retry.delay_for_attempt(attempt);
            warn!(
                job_id = %job.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Job attempt failed, retrying"
            );
            match coordinator.record_retry(job.id, attempt).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => warn!(job_id = %job.id, error = %e, "Failed to record retry"),
            }
            if sleep_or_cancel(delay, &mut cancel).await {
                info!(job_id = %job.id, "Job cancelled during backoff");
                return;
            }
            attempt += 1;
            continue;
        }

        histograms::record_job_execution_latency("failed", start.elapsed());
        if err.is_invariant_violation() {
            error!(job_id = %job.id, model_id = %job.model_id, error = %err, "Committed model cannot be served");
        } else {
            warn!(job_id = %job.id, attempt, retryable, error = %err, "Job failed");
        }
        let traceback = attempts.join("\n");
        if let Err(e) = coordinator.fail(job.id, &err.to_string(), Some(traceback)).await {
            error!(job_id = %job.id, error = %e, "Failed to store job failure");
        }
        return;
    }
}

/// Marks the job failed if execution ends without reaching a verdict.
struct RunningGuard {
    coordinator: Arc<JobCoordinator>,
    job_id: JobId,
    armed: bool,
}

impl RunningGuard {
    fn new(coordinator: Arc<JobCoordinator>, job_id: JobId) -> Self {
        Self {
            coordinator,
            job_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let coordinator = Arc::clone(&self.coordinator);
        let job_id = self.job_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match coordinator
                        .fail(job_id, "Job execution was interrupted", None)
                        .await
                    {
                        Ok(true) => warn!(job_id = %job_id, "Interrupted job marked failed"),
                        Ok(false) => {}
                        Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark interrupted job"),
                    }
                });
            }
            Err(_) => error!(job_id = %job_id, "No runtime to mark interrupted job failed"),
        }
    }
}
