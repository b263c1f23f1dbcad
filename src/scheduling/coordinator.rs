//! Job coordinator: submission, status tracking, cancellation and cleanup.
//!
//! Every status write happens under the per-job lock and goes through
//! [`JobStatus::can_transition_to`], so a job never leaves a terminal state
//! and a result that arrives after cancellation is dropped.

use super::queue::{JobQueue, QueuedTask};
use crate::config::JobsConfig;
use crate::error::{Result, ServeError};
use crate::lifecycle::LifecycleController;
use crate::lock::LockTable;
use crate::observability::{self, histograms};
use crate::store::{JobFilter, RecordStore};
use crate::types::{Job, JobId, JobPriority, JobStatus, ModelId, Page, PageRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Upper bound on how long a result request may block.
pub const MAX_RESULT_WAIT: Duration = Duration::from_secs(30);

/// Interval between status checks while waiting for a result.
pub const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the inference behind a job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Execute one attempt, returning the output and inference time in ms.
    async fn execute(&self, model_id: ModelId, input: &Value) -> Result<(Value, f64)>;
}

/// Executes jobs on the same path as synchronous prediction.
pub struct InferenceExecutor {
    lifecycle: Arc<LifecycleController>,
}

impl InferenceExecutor {
    pub fn new(lifecycle: Arc<LifecycleController>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl JobExecutor for InferenceExecutor {
    async fn execute(&self, model_id: ModelId, input: &Value) -> Result<(Value, f64)> {
        let model = self.lifecycle.assert_committed(model_id).await?;
        let engine = self.lifecycle.engine();
        let session = engine
            .get_or_load_session(&model, self.lifecycle.artifacts().as_ref())
            .await?;
        engine.run_blocking(session, input.clone()).await
    }
}

/// What a result request observed.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        output: Value,
        inference_time_ms: Option<f64>,
        completed_at: Option<DateTime<Utc>>,
    },
    Failed {
        error: String,
        traceback: Option<String>,
        completed_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        completed_at: Option<DateTime<Utc>>,
    },
    /// Still processing when the wait elapsed.
    Pending { status: JobStatus },
}

impl JobOutcome {
    fn from_job(job: &Job) -> Self {
        match job.status {
            JobStatus::Completed => JobOutcome::Completed {
                output: job.output_data.clone().unwrap_or(Value::Null),
                inference_time_ms: job.inference_time_ms,
                completed_at: job.completed_at,
            },
            JobStatus::Failed => JobOutcome::Failed {
                error: job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
                traceback: job.error_traceback.clone(),
                completed_at: job.completed_at,
            },
            JobStatus::Cancelled => JobOutcome::Cancelled {
                completed_at: job.completed_at,
            },
            status => JobOutcome::Pending { status },
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
            JobOutcome::Cancelled { .. } => JobStatus::Cancelled,
            JobOutcome::Pending { status } => *status,
        }
    }
}

/// Coordinates asynchronous inference jobs.
pub struct JobCoordinator {
    records: Arc<dyn RecordStore>,
    lifecycle: Arc<LifecycleController>,
    queue: Arc<dyn JobQueue>,
    executor: Arc<dyn JobExecutor>,
    config: JobsConfig,
    locks: LockTable<JobId>,
    cancel_flags: Mutex<HashMap<JobId, watch::Sender<bool>>>,
}

impl JobCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        lifecycle: Arc<LifecycleController>,
        queue: Arc<dyn JobQueue>,
        config: JobsConfig,
    ) -> Self {
        let executor = Arc::new(InferenceExecutor::new(Arc::clone(&lifecycle)));
        Self {
            records,
            lifecycle,
            queue,
            executor,
            config,
            locks: LockTable::new(),
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the executor, e.g. to inject failures.
    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn executor(&self) -> &Arc<dyn JobExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// Submit a job for a committed model.
    ///
    /// The job is persisted as `PENDING` first. If the queue rejects it, it
    /// stays `PENDING` and the error is returned as `Unavailable`.
    pub async fn submit(&self, model_id: ModelId, input: Value, priority: JobPriority) -> Result<Job> {
        // The commitment check and the insert must not straddle a model delete.
        let model_guard = self.lifecycle.lock_model(model_id).await;
        self.lifecycle.assert_committed(model_id).await?;
        let job = self
            .records
            .insert_job(Job::new(model_id, input, priority, self.config.max_retries))
            .await?;
        drop(model_guard);
        let job_id = job.id;

        // Held across enqueue so a fast worker cannot observe the job before
        // it is marked queued.
        let _guard = self.locks.lock(job_id).await;
        self.cancel_flags.lock().insert(job_id, watch::channel(false).0);

        let task_id = match self.queue.enqueue(job_id, priority).await {
            Ok(task_id) => task_id,
            Err(e) => {
                self.cancel_flags.lock().remove(&job_id);
                warn!(job_id = %job_id, error = %e, "Failed to enqueue job");
                return Err(match e {
                    ServeError::Unavailable(_) => e,
                    other => ServeError::Unavailable(other.to_string()),
                });
            }
        };

        let mut job = self.load(job_id).await?;
        transition(&mut job, JobStatus::Queued)?;
        job.task_id = Some(task_id);
        let job = self.records.update_job(job).await?;

        observability::record_job_submitted();
        info!(
            job_id = %job.id,
            model_id = %model_id,
            priority = ?priority,
            task_id = job.task_id.as_deref().unwrap_or(""),
            "Job queued"
        );
        Ok(job)
    }

    /// Cancel a job that has not finished.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        let _guard = self.locks.lock(job_id).await;
        let mut job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Err(ServeError::AlreadyTerminal {
                job_id,
                status: job.status.to_string(),
            });
        }

        let previous = job.status;
        transition(&mut job, JobStatus::Cancelled)?;
        job.output_data = None;
        let job = self.records.update_job(job).await?;

        if let Some(flag) = self.cancel_flags.lock().remove(&job_id) {
            let _ = flag.send(true);
        }

        observability::record_job_finished(JobStatus::Cancelled.as_str());
        info!(job_id = %job_id, from = %previous, "Job cancelled");
        Ok(job)
    }

    pub async fn get(&self, job_id: JobId) -> Result<Job> {
        self.load(job_id).await
    }

    pub async fn list(&self, filter: JobFilter, page: PageRequest) -> Result<Page<Job>> {
        self.records.list_jobs(filter, page).await
    }

    /// Result of a job, optionally waiting up to [`MAX_RESULT_WAIT`] for it
    /// to finish.
    pub async fn get_result(&self, job_id: JobId, wait: Duration) -> Result<JobOutcome> {
        let deadline = tokio::time::Instant::now() + wait.min(MAX_RESULT_WAIT);
        loop {
            let job = self.load(job_id).await?;
            let now = tokio::time::Instant::now();
            if job.status.is_terminal() || now >= deadline {
                return Ok(JobOutcome::from_job(&job));
            }
            tokio::time::sleep(RESULT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Delete a finished job.
    pub async fn delete(&self, job_id: JobId) -> Result<()> {
        let _guard = self.locks.lock(job_id).await;
        let job = self.load(job_id).await?;
        if !job.status.is_terminal() {
            return Err(ServeError::InvalidState(format!(
                "Job {} is {} and can only be deleted once finished",
                job_id, job.status
            )));
        }
        self.records.delete_job(job_id).await?;
        self.cancel_flags.lock().remove(&job_id);
        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// Jobs referencing a model that have not finished.
    pub async fn count_active_for_model(&self, model_id: ModelId) -> Result<usize> {
        self.records.count_active_jobs(model_id).await
    }

    /// Delete terminal jobs that finished before `now - retention`.
    pub async fn run_retention_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| ServeError::Internal(format!("Invalid retention window: {}", e)))?;
        let cutoff = now - retention;

        let mut deleted = 0;
        for job_id in self.records.expired_jobs(cutoff).await? {
            let _guard = self.locks.lock(job_id).await;
            let Some(job) = self.records.get_job(job_id).await? else {
                continue;
            };
            let expired = job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff);
            if expired && self.records.delete_job(job_id).await? {
                deleted += 1;
            }
        }

        if deleted > 0 {
            observability::record_retention_deleted(deleted);
            info!(deleted, cutoff = %cutoff, "Retention sweep removed jobs");
        } else {
            debug!(cutoff = %cutoff, "Retention sweep found nothing to remove");
        }
        Ok(deleted)
    }

    /// Claim a dequeued job for execution: `QUEUED -> RUNNING`.
    ///
    /// Returns `None` when the job was cancelled or removed while queued.
    pub(crate) async fn start(
        &self,
        task: &QueuedTask,
        worker_id: &str,
    ) -> Result<Option<(Job, watch::Receiver<bool>)>> {
        let _guard = self.locks.lock(task.job_id).await;
        let Some(mut job) = self.records.get_job(task.job_id).await? else {
            debug!(job_id = %task.job_id, "Dequeued job no longer exists");
            return Ok(None);
        };
        if job.status != JobStatus::Queued {
            debug!(job_id = %job.id, status = %job.status, "Skipping job that is no longer queued");
            return Ok(None);
        }

        let cancel = self
            .cancel_flags
            .lock()
            .entry(job.id)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe();
        if *cancel.borrow() {
            return Ok(None);
        }

        let now = Utc::now();
        transition(&mut job, JobStatus::Running)?;
        job.started_at = Some(now);
        job.queue_time_ms = Some(elapsed_ms(job.created_at, now));
        job.worker_id = Some(worker_id.to_string());
        let job = self.records.update_job(job).await?;

        histograms::record_job_queue_time(task.enqueued_at.elapsed());
        debug!(job_id = %job.id, worker_id, "Job started");
        Ok(Some((job, cancel)))
    }

    /// Record that another attempt is about to run.
    ///
    /// Returns `false` when the job is no longer running.
    pub(crate) async fn record_retry(&self, job_id: JobId, retries: u32) -> Result<bool> {
        let _guard = self.locks.lock(job_id).await;
        let Some(mut job) = self.records.get_job(job_id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.retries = retries;
        self.records.update_job(job).await?;
        observability::record_job_retry();
        Ok(true)
    }

    /// Store a successful result. Returns `false` if it arrived too late.
    pub(crate) async fn complete(&self, job_id: JobId, output: Value, inference_time_ms: f64) -> Result<bool> {
        let _guard = self.locks.lock(job_id).await;
        let Some(mut job) = self.running_job(job_id).await? else {
            return Ok(false);
        };
        transition(&mut job, JobStatus::Completed)?;
        job.output_data = Some(output);
        job.inference_time_ms = Some(inference_time_ms);
        job.error_message = None;
        job.error_traceback = None;
        self.records.update_job(job).await?;
        self.finish(job_id, JobStatus::Completed);
        Ok(true)
    }

    /// Store a failure. Returns `false` if the job had already finished.
    pub(crate) async fn fail(&self, job_id: JobId, message: &str, traceback: Option<String>) -> Result<bool> {
        let _guard = self.locks.lock(job_id).await;
        let Some(mut job) = self.running_job(job_id).await? else {
            return Ok(false);
        };
        transition(&mut job, JobStatus::Failed)?;
        job.output_data = None;
        job.error_message = Some(message.to_string());
        job.error_traceback = traceback;
        self.records.update_job(job).await?;
        self.finish(job_id, JobStatus::Failed);
        Ok(true)
    }

    async fn running_job(&self, job_id: JobId) -> Result<Option<Job>> {
        match self.records.get_job(job_id).await? {
            Some(job) if job.status == JobStatus::Running => Ok(Some(job)),
            Some(job) => {
                debug!(job_id = %job_id, status = %job.status, "Discarding result for job that is no longer running");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn finish(&self, job_id: JobId, status: JobStatus) {
        self.cancel_flags.lock().remove(&job_id);
        observability::record_job_finished(status.as_str());
    }

    async fn load(&self, job_id: JobId) -> Result<Job> {
        self.records
            .get_job(job_id)
            .await?
            .ok_or_else(|| ServeError::NotFound(format!("Job {} not found", job_id)))
    }
}

fn transition(job: &mut Job, next: JobStatus) -> Result<()> {
    if !job.status.can_transition_to(next) {
        return Err(ServeError::InvalidState(format!(
            "Job {} cannot move from {} to {}",
            job.id, job.status, next
        )));
    }
    job.status = next;
    if next.is_terminal() {
        job.completed_at = Some(Utc::now());
    }
    Ok(())
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .to_std()
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}
