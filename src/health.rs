//! Health check probes for ModelForge.
//!
//! Provides liveness, readiness and deep health reporting over the
//! serving dependencies. None of these gate the serving core.

use crate::cache::PredictionCache;
use crate::scheduling::JobQueue;
use crate::store::{ArtifactStore, RecordStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy.
    Healthy,
    /// Service is degraded but operational.
    Degraded,
    /// Service is unhealthy.
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code.
    pub fn to_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200, // Still operational
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Combine two statuses (worst wins).
    pub fn combine(&self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Individual component health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: String,
    /// Health status.
    pub status: HealthStatus,
    /// Optional message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Check latency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Additional details.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl ComponentHealth {
    /// Create a healthy component.
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            latency_ms: None,
            details: HashMap::new(),
        }
    }

    /// Create a degraded component.
    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            ..Self::healthy(name)
        }
    }

    /// Create an unhealthy component.
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            ..Self::healthy(name)
        }
    }

    /// Add latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    /// Add detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Full health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Deployment environment.
    pub environment: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Individual component checks.
    pub components: Vec<ComponentHealth>,
    /// Timestamp.
    pub timestamp: String,
}

impl HealthResponse {
    /// Create a new health response.
    pub fn new(version: impl Into<String>, environment: impl Into<String>, start_time: Instant) -> Self {
        Self {
            status: HealthStatus::Healthy,
            version: version.into(),
            environment: environment.into(),
            uptime_seconds: start_time.elapsed().as_secs(),
            components: Vec::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Add a component check.
    pub fn add_component(&mut self, component: ComponentHealth) {
        self.status = self.status.combine(&component.status);
        self.components.push(component);
    }
}

/// Readiness check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Whether the service is ready to accept traffic.
    pub ready: bool,
    /// Reason if not ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Dependencies status.
    pub dependencies: Vec<DependencyStatus>,
}

impl ReadinessResponse {
    /// Create a ready response.
    pub fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
            dependencies: Vec::new(),
        }
    }

    /// Add dependency status.
    pub fn with_dependency(mut self, dep: DependencyStatus) -> Self {
        if !dep.available {
            self.ready = false;
            if self.reason.is_none() {
                self.reason = Some(format!("Dependency '{}' unavailable", dep.name));
            }
        }
        self.dependencies.push(dep);
        self
    }
}

/// Dependency status for readiness checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Dependency name.
    pub name: String,
    /// Whether it's available.
    pub available: bool,
    /// Optional error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Latency to check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl From<&ComponentHealth> for DependencyStatus {
    /// Degraded components still serve traffic.
    fn from(component: &ComponentHealth) -> Self {
        Self {
            name: component.name.clone(),
            available: component.status != HealthStatus::Unhealthy,
            error: component.message.clone(),
            latency_ms: component.latency_ms,
        }
    }
}

/// Liveness check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Whether the service is alive.
    pub alive: bool,
}

impl LivenessResponse {
    /// Create an alive response.
    pub fn alive() -> Self {
        Self { alive: true }
    }
}

/// A dependency that can report its health.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> ComponentHealth;
}

/// Probes the record store.
pub struct RecordStoreProbe(pub Arc<dyn RecordStore>);

#[async_trait]
impl HealthProbe for RecordStoreProbe {
    async fn check(&self) -> ComponentHealth {
        let start = Instant::now();
        match self.0.ping().await {
            Ok(()) => ComponentHealth::healthy("record_store"),
            Err(e) => ComponentHealth::unhealthy("record_store", e.to_string()),
        }
        .with_latency(start.elapsed())
    }
}

/// Probes the artifact store.
pub struct ArtifactStoreProbe(pub Arc<dyn ArtifactStore>);

#[async_trait]
impl HealthProbe for ArtifactStoreProbe {
    async fn check(&self) -> ComponentHealth {
        let start = Instant::now();
        match self.0.ping().await {
            Ok(()) => ComponentHealth::healthy("artifact_store"),
            Err(e) => ComponentHealth::unhealthy("artifact_store", e.to_string()),
        }
        .with_latency(start.elapsed())
    }
}

/// Probes the result cache. An unreachable cache is only degraded.
pub struct CacheProbe(pub Arc<PredictionCache>);

#[async_trait]
impl HealthProbe for CacheProbe {
    async fn check(&self) -> ComponentHealth {
        self.0.health().await
    }
}

/// Probes the job queue.
pub struct JobQueueProbe(pub Arc<dyn JobQueue>);

#[async_trait]
impl HealthProbe for JobQueueProbe {
    async fn check(&self) -> ComponentHealth {
        let start = Instant::now();
        match self.0.ping().await {
            Ok(()) => ComponentHealth::healthy("job_queue").with_detail("depth", self.0.depth().to_string()),
            Err(e) => ComponentHealth::unhealthy("job_queue", e.to_string()),
        }
        .with_latency(start.elapsed())
    }
}

/// Health checker over registered probes.
pub struct HealthChecker {
    /// Service version.
    version: String,
    /// Deployment environment.
    environment: String,
    /// When the service started.
    start_time: Instant,
    /// Registered probes.
    probes: RwLock<Vec<Arc<dyn HealthProbe>>>,
    /// Last health status.
    last_status: RwLock<Option<HealthResponse>>,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(version: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            environment: environment.into(),
            start_time: Instant::now(),
            probes: RwLock::new(Vec::new()),
            last_status: RwLock::new(None),
        }
    }

    /// Register a probe.
    pub async fn register(&self, probe: Arc<dyn HealthProbe>) {
        self.probes.write().await.push(probe);
    }

    async fn run_probes(&self) -> Vec<ComponentHealth> {
        let probes = self.probes.read().await.clone();
        let mut results = Vec::with_capacity(probes.len());
        for probe in probes {
            results.push(probe.check().await);
        }
        results
    }

    /// Run health checks and return response.
    pub async fn check_health(&self) -> HealthResponse {
        let mut response = HealthResponse::new(&self.version, &self.environment, self.start_time);
        for component in self.run_probes().await {
            response.add_component(component);
        }

        // Cache the response
        *self.last_status.write().await = Some(response.clone());

        response
    }

    /// Run readiness checks.
    pub async fn check_readiness(&self) -> ReadinessResponse {
        self.run_probes()
            .await
            .iter()
            .fold(ReadinessResponse::ready(), |response, component| {
                response.with_dependency(DependencyStatus::from(component))
            })
    }

    /// Run liveness check (simple check that the service is responding).
    pub fn check_liveness(&self) -> LivenessResponse {
        LivenessResponse::alive()
    }

    /// Get the last cached health status.
    pub async fn last_status(&self) -> Option<HealthResponse> {
        self.last_status.read().await.clone()
    }

    /// Get uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
