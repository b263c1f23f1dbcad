//! Job queue seam and the in-process implementation.

use crate::error::{Result, ServeError};
use crate::types::{JobId, JobPriority};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// A unit of queued work.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub job_id: JobId,
    pub priority: JobPriority,
    pub enqueued_at: Instant,
}

/// Transport between job submission and the worker pool.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job and return the task id assigned to it.
    async fn enqueue(&self, job_id: JobId, priority: JobPriority) -> Result<String>;

    /// Wait for the next task. `None` once the queue is closed.
    async fn dequeue(&self) -> Option<QueuedTask>;

    /// Tasks waiting for a worker.
    fn depth(&self) -> usize;

    /// Check the queue accepts work.
    async fn ping(&self) -> Result<()>;
}

struct Lanes {
    high: mpsc::Receiver<QueuedTask>,
    normal: mpsc::Receiver<QueuedTask>,
    low: mpsc::Receiver<QueuedTask>,
}

/// Bounded mpsc queue with one lane per priority.
///
/// Workers always drain `high` before `normal` before `low`.
pub struct MemoryJobQueue {
    high: mpsc::Sender<QueuedTask>,
    normal: mpsc::Sender<QueuedTask>,
    low: mpsc::Sender<QueuedTask>,
    lanes: Mutex<Lanes>,
    depth: AtomicUsize,
    available: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (high, high_rx) = mpsc::channel(capacity);
        let (normal, normal_rx) = mpsc::channel(capacity);
        let (low, low_rx) = mpsc::channel(capacity);
        Self {
            high,
            normal,
            low,
            lanes: Mutex::new(Lanes {
                high: high_rx,
                normal: normal_rx,
                low: low_rx,
            }),
            depth: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a broker outage. Enqueue and ping fail while unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServeError::Unavailable("job queue is unavailable".into()))
        }
    }

    fn lane(&self, priority: JobPriority) -> &mpsc::Sender<QueuedTask> {
        match priority {
            JobPriority::High => &self.high,
            JobPriority::Normal => &self.normal,
            JobPriority::Low => &self.low,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job_id: JobId, priority: JobPriority) -> Result<String> {
        self.check()?;
        let task = QueuedTask {
            task_id: Uuid::new_v4().to_string(),
            job_id,
            priority,
            enqueued_at: Instant::now(),
        };
        let task_id = task.task_id.clone();

        // Counted before the send so a consumer can never decrement first.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.lane(priority).try_send(task) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    ServeError::Unavailable("job queue is full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ServeError::Unavailable("job queue is closed".into())
                }
            });
        }
        Ok(task_id)
    }

    async fn dequeue(&self) -> Option<QueuedTask> {
        let mut lanes = self.lanes.lock().await;
        let Lanes { high, normal, low } = &mut *lanes;
        let task = tokio::select! {
            biased;
            Some(task) = high.recv() => Some(task),
            Some(task) = normal.recv() => Some(task),
            Some(task) = low.recv() => Some(task),
            else => None,
        };
        if task.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        task
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_high_priority_dequeued_first() {
        let queue = MemoryJobQueue::new(8);
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.enqueue(low, JobPriority::Low).await.unwrap();
        queue.enqueue(high, JobPriority::High).await.unwrap();
        assert_eq!(queue.depth(), 2);

        assert_eq!(queue.dequeue().await.unwrap().job_id, high);
        assert_eq!(queue.dequeue().await.unwrap().job_id, low);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_full_lane_is_unavailable() {
        let queue = MemoryJobQueue::new(1);
        queue.enqueue(Uuid::new_v4(), JobPriority::Normal).await.unwrap();
        let err = queue
            .enqueue(Uuid::new_v4(), JobPriority::Normal)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_depth_never_underflows_under_concurrent_dequeue() {
        const TASKS: usize = 500;
        let queue = Arc::new(MemoryJobQueue::new(2));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for _ in 0..TASKS {
                    queue.dequeue().await.unwrap();
                    assert!(queue.depth() <= 7, "depth wrapped to {}", queue.depth());
                }
            })
        };

        let mut sent = 0;
        while sent < TASKS {
            match queue.enqueue(Uuid::new_v4(), JobPriority::Normal).await {
                Ok(_) => sent += 1,
                Err(_) => tokio::task::yield_now().await,
            }
            assert!(queue.depth() <= 7, "depth wrapped to {}", queue.depth());
        }

        consumer.await.unwrap();
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_outage_rejects_enqueue() {
        let queue = MemoryJobQueue::new(4);
        queue.set_available(false);
        assert!(queue.ping().await.is_err());
        assert!(matches!(
            queue.enqueue(Uuid::new_v4(), JobPriority::Normal).await,
            Err(ServeError::Unavailable(_))
        ));

        queue.set_available(true);
        assert!(queue.ping().await.is_ok());
    }
}
