//! ModelForge - a model serving core with a hard commitment boundary.
//!
//! Models move through an explicit lifecycle and become servable only after
//! validation commits them. Committed models serve synchronous predictions
//! through a fail-open result cache and asynchronous jobs through a worker
//! pool with retry and cancellation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HTTP: models | predict | jobs | cache | health             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Orchestration: lifecycle | serving | scheduling            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Execution: compute (graph runtime, session cache)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Collaborators: record store | artifact store | cache       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use modelforge::config::ServeConfig;
//!
//! #[tokio::main]
//! async fn main() -> modelforge::Result<()> {
//!     let config = ServeConfig::development();
//!     modelforge::run(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod api;
pub mod cache;
pub mod compute;
pub mod health;
pub mod lifecycle;
pub mod lock;
pub mod observability;
pub mod resilience;
pub mod scheduling;
pub mod serving;
pub mod shutdown;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, ServeError};
pub use types::*;

use crate::api::AppState;
use crate::cache::{MemoryCacheBackend, ModelCache, PredictionCache};
use crate::compute::InferenceEngine;
use crate::config::ServeConfig;
use crate::health::{ArtifactStoreProbe, CacheProbe, HealthChecker, JobQueueProbe, RecordStoreProbe};
use crate::lifecycle::LifecycleController;
use crate::scheduling::{run_retention_loop, JobCoordinator, MemoryJobQueue, WorkerPool};
use crate::serving::PredictionService;
use crate::shutdown::{ShutdownCoordinator, ShutdownManager, SignalHandler};
use crate::store::{FsArtifactStore, MemoryRecordStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Crate version reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Every component of a running server, wired together.
///
/// Concrete collaborator types are kept so callers can inspect or degrade
/// them, e.g. to exercise a cache outage.
pub struct Services {
    pub config: ServeConfig,
    pub records: Arc<MemoryRecordStore>,
    pub artifacts: Arc<FsArtifactStore>,
    pub cache_backend: Arc<MemoryCacheBackend>,
    pub queue: Arc<MemoryJobQueue>,
    pub engine: Arc<InferenceEngine>,
    pub cache: Arc<PredictionCache>,
    pub model_cache: Arc<ModelCache>,
    pub lifecycle: Arc<LifecycleController>,
    pub predictions: Arc<PredictionService>,
    pub jobs: Arc<JobCoordinator>,
    pub health: Arc<HealthChecker>,
}

impl Services {
    /// Build all components from configuration.
    pub async fn build(config: ServeConfig) -> Result<Self> {
        let records = Arc::new(MemoryRecordStore::new());
        let artifacts = Arc::new(FsArtifactStore::new(&config.storage.artifact_root)?);
        let cache_backend = Arc::new(MemoryCacheBackend::new(config.cache.max_entries));
        let queue = Arc::new(MemoryJobQueue::new(config.jobs.queue_capacity));
        let engine = Arc::new(InferenceEngine::new());

        let cache = Arc::new(PredictionCache::new(
            cache_backend.clone(),
            config.cache.enabled,
            config.cache.ttl,
        ));
        let model_cache = Arc::new(ModelCache::new(
            cache_backend.clone(),
            config.cache.enabled,
            config.cache.model_ttl,
        ));
        let lifecycle = Arc::new(
            LifecycleController::new(
                records.clone(),
                artifacts.clone(),
                engine.clone(),
                cache.clone(),
                config.storage.clone(),
            )
            .with_warmup(config.inference.warmup_on_commit)
            .with_model_cache(model_cache.clone()),
        );
        let predictions = Arc::new(PredictionService::new(
            lifecycle.clone(),
            cache.clone(),
            records.clone(),
        ));
        let jobs = Arc::new(JobCoordinator::new(
            records.clone(),
            lifecycle.clone(),
            queue.clone(),
            config.jobs.clone(),
        ));

        let health = Arc::new(HealthChecker::new(VERSION, config.environment.clone()));
        health.register(Arc::new(RecordStoreProbe(records.clone()))).await;
        health.register(Arc::new(ArtifactStoreProbe(artifacts.clone()))).await;
        health.register(Arc::new(CacheProbe(cache.clone()))).await;
        health.register(Arc::new(JobQueueProbe(queue.clone()))).await;

        Ok(Self {
            config,
            records,
            artifacts,
            cache_backend,
            queue,
            engine,
            cache,
            model_cache,
            lifecycle,
            predictions,
            jobs,
            health,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            lifecycle: self.lifecycle.clone(),
            predictions: self.predictions.clone(),
            jobs: self.jobs.clone(),
            cache: self.cache.clone(),
            health: self.health.clone(),
            max_artifact_bytes: self.config.storage.max_artifact_bytes,
        }
    }

    pub fn router(&self) -> axum::Router {
        api::router(self.app_state(), &self.config.server.api_prefix)
    }

    /// Start the worker pool and the retention loop.
    pub fn spawn_background(&self, shutdown: &ShutdownCoordinator, manager: &mut ShutdownManager) {
        let pool = WorkerPool::spawn(self.jobs.clone(), self.config.jobs.workers, shutdown);
        info!(workers = pool.len(), "Job worker pool started");
        manager.register("job-workers", tokio::spawn(pool.join()));

        manager.register(
            "job-retention",
            tokio::spawn(run_retention_loop(
                self.jobs.clone(),
                self.config.jobs.retention_interval,
                shutdown.clone(),
            )),
        );
    }
}

/// Run the ModelForge server until a shutdown signal arrives.
pub async fn run(config: ServeConfig) -> Result<()> {
    observability::init(&config.observability)?;
    config.validate()?;
    info!(environment = %config.environment, version = VERSION, "Starting ModelForge");

    let services = Services::build(config).await?;
    let config = &services.config;

    let coordinator = ShutdownCoordinator::new();
    let mut manager = ShutdownManager::new(coordinator.clone());
    services.spawn_background(&coordinator, &mut manager);

    if config.observability.metrics_enabled {
        info!("Starting metrics server on {}", config.observability.metrics_addr);
        let obs_config = config.observability.clone();
        let metrics_shutdown = coordinator.clone();
        manager.register(
            "metrics",
            tokio::spawn(async move {
                if let Err(e) = observability::run_metrics_server(obs_config, metrics_shutdown).await {
                    error!("Metrics server error: {}", e);
                }
            }),
        );
    }

    tokio::spawn(SignalHandler::new(coordinator.clone()).run());

    let listener = TcpListener::bind(config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, prefix = %config.server.api_prefix, "HTTP API listening");

    let server_shutdown = coordinator.clone();
    let served = axum::serve(
        listener,
        services
            .router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { server_shutdown.wait_for_shutdown().await })
    .await;

    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }
    info!("Shutting down ModelForge gracefully...");
    manager.drain().await;

    served.map_err(|e| ServeError::Internal(format!("HTTP server failed: {}", e)))?;
    info!("ModelForge shutdown complete");
    Ok(())
}
