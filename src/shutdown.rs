//! Graceful shutdown handling for ModelForge.
//!
//! A single [`ShutdownCoordinator`] is cloned into the HTTP servers, the job
//! worker pool and the retention loop. [`SignalHandler`] trips it on
//! SIGINT/SIGTERM, and [`ShutdownManager`] waits for the background tasks to
//! drain within the configured timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Maximum time to wait for background tasks before giving up on them.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown coordinator shared by every long-running task.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_watch: watch::Receiver<bool>,
    shutdown_watch_tx: Arc<watch::Sender<bool>>,
    is_shutting_down: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (shutdown_watch_tx, shutdown_watch) = watch::channel(false);

        Self {
            shutdown_tx,
            shutdown_watch,
            shutdown_watch_tx: Arc::new(shutdown_watch_tx),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Subscribe to the shutdown broadcast.
    ///
    /// Receivers created after [`shutdown`](Self::shutdown) never see the
    /// signal; prefer [`wait_for_shutdown`](Self::wait_for_shutdown) for
    /// tasks spawned late.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown");
            let _ = self.shutdown_watch_tx.send(true);
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Resolves once shutdown has been initiated, even if that happened
    /// before the call.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_watch.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Trips the coordinator on an OS signal.
pub struct SignalHandler {
    coordinator: ShutdownCoordinator,
}

impl SignalHandler {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    /// Wait for SIGTERM or SIGINT, then initiate shutdown.
    #[cfg(unix)]
    pub async fn run(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                    self.run_ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = self.coordinator.wait_for_shutdown() => return,
        }

        self.coordinator.shutdown();
    }

    #[cfg(not(unix))]
    pub async fn run(self) {
        self.run_ctrl_c().await;
    }

    async fn run_ctrl_c(&self) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                info!("Received Ctrl+C");
                self.coordinator.shutdown();
            }
            _ = self.coordinator.wait_for_shutdown() => {}
        }
    }
}

/// Waits for registered background tasks once shutdown starts.
pub struct ShutdownManager {
    coordinator: ShutdownCoordinator,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl ShutdownManager {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            tasks: Vec::new(),
        }
    }

    /// Track a background task that exits on its own after shutdown.
    pub fn register(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        info!(task = %name, "Registered task for managed shutdown");
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Initiate shutdown if needed and wait for every task, newest first.
    ///
    /// Tasks still running when the timeout elapses are aborted.
    pub async fn drain(mut self) {
        self.coordinator.shutdown();
        let timeout = self.coordinator.timeout();
        info!(tasks = self.tasks.len(), "Draining background tasks");

        let deadline = tokio::time::Instant::now() + timeout;
        while let Some((name, mut handle)) = self.tasks.pop() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => info!(task = %name, "Task stopped"),
                Ok(Err(e)) => error!(task = %name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    warn!(task = %name, timeout_ms = timeout.as_millis() as u64, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}
