//! Asynchronous inference jobs.
//!
//! [`JobCoordinator`] owns the job state machine, [`WorkerPool`] drains the
//! [`JobQueue`] with retry and cancellation, and [`run_retention_loop`]
//! removes finished jobs once they age out.

mod coordinator;
mod queue;
mod retention;
mod worker;

pub use coordinator::{
    InferenceExecutor, JobCoordinator, JobExecutor, JobOutcome, MAX_RESULT_WAIT,
    RESULT_POLL_INTERVAL,
};
pub use queue::{JobQueue, MemoryJobQueue, QueuedTask};
pub use retention::run_retention_loop;
pub use worker::WorkerPool;
