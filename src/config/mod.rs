//! Configuration module for ModelForge.

use crate::error::{Result, ServeError};
use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a ModelForge server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Deployment environment name, reported by the health endpoint.
    #[serde(default = "default_environment")]
    pub environment: String,
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Artifact storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Prediction result cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Inference engine configuration.
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Async job configuration.
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_environment() -> String {
    "production".to_string()
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            inference: InferenceConfig::default(),
            jobs: JobsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServeConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServeError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ServeError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.server.api_prefix.starts_with('/') {
            return Err(ServeError::InvalidConfig {
                field: "server.api_prefix".to_string(),
                reason: "API prefix must start with '/'".to_string(),
            });
        }

        if self.storage.max_artifact_bytes == 0 {
            return Err(ServeError::InvalidConfig {
                field: "storage.max_artifact_bytes".to_string(),
                reason: "Artifact size limit must be non-zero".to_string(),
            });
        }

        if self.storage.allowed_extensions.is_empty() {
            return Err(ServeError::InvalidConfig {
                field: "storage.allowed_extensions".to_string(),
                reason: "At least one artifact extension must be allowed".to_string(),
            });
        }

        if let Some(ext) = self
            .storage
            .allowed_extensions
            .iter()
            .find(|ext| !ext.starts_with('.'))
        {
            return Err(ServeError::InvalidConfig {
                field: "storage.allowed_extensions".to_string(),
                reason: format!("Extension '{}' must start with '.'", ext),
            });
        }

        if self.cache.max_entries == 0 {
            return Err(ServeError::InvalidConfig {
                field: "cache.max_entries".to_string(),
                reason: "Cache must hold at least one entry".to_string(),
            });
        }

        if self.jobs.workers == 0 {
            return Err(ServeError::InvalidConfig {
                field: "jobs.workers".to_string(),
                reason: "At least one worker is required".to_string(),
            });
        }

        if self.jobs.queue_capacity == 0 {
            return Err(ServeError::InvalidConfig {
                field: "jobs.queue_capacity".to_string(),
                reason: "Queue capacity must be non-zero".to_string(),
            });
        }

        if self.jobs.retry_multiplier < 1.0 {
            return Err(ServeError::InvalidConfig {
                field: "jobs.retry_multiplier".to_string(),
                reason: "Backoff multiplier must be at least 1.0".to_string(),
            });
        }

        if self.jobs.retry_initial_delay > self.jobs.retry_max_delay {
            return Err(ServeError::InvalidConfig {
                field: "jobs.retry_initial_delay".to_string(),
                reason: "Initial delay cannot exceed max delay".to_string(),
            });
        }

        if self.jobs.execution_timeout.is_zero() {
            return Err(ServeError::InvalidConfig {
                field: "jobs.execution_timeout".to_string(),
                reason: "Execution timeout must be non-zero".to_string(),
            });
        }

        if self.jobs.retention_interval.is_zero() {
            return Err(ServeError::InvalidConfig {
                field: "jobs.retention_interval".to_string(),
                reason: "Retention sweep interval must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            environment: "development".to_string(),
            server: ServerConfig {
                bind_addr: "127.0.0.1:8000".parse().expect("valid socket address"),
                api_prefix: "/api/v1".to_string(),
            },
            storage: StorageConfig {
                artifact_root: PathBuf::from("/tmp/modelforge/models"),
                ..StorageConfig::default()
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(300),
                ..CacheConfig::default()
            },
            inference: InferenceConfig::default(),
            jobs: JobsConfig {
                workers: 2,
                retry_initial_delay: Duration::from_millis(200),
                retry_max_delay: Duration::from_secs(5),
                retention: Duration::from_secs(24 * 3600),
                ..JobsConfig::default()
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                log_level: "debug".to_string(),
                ..ObservabilityConfig::default()
            },
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the API server.
    pub bind_addr: SocketAddr,
    /// Prefix for all versioned API routes.
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".parse().expect("valid socket address"),
            api_prefix: "/api/v1".to_string(),
        }
    }
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for model artifacts.
    pub artifact_root: PathBuf,
    /// Maximum artifact size in bytes.
    pub max_artifact_bytes: u64,
    /// Accepted upload filename extensions.
    pub allowed_extensions: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("./models"),
            max_artifact_bytes: 500 * 1024 * 1024, // 500MB
            allowed_extensions: vec![".json".to_string(), ".mfg".to_string()],
        }
    }
}

/// Prediction cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether predictions are cached at all.
    pub enabled: bool,
    /// Time-to-live for cached predictions.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of cached predictions.
    pub max_entries: usize,
    /// Time-to-live for cached model records.
    #[serde(default = "default_model_ttl", with = "humantime_serde")]
    pub model_ttl: Duration,
}

fn default_model_ttl() -> Duration {
    Duration::from_secs(300)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            model_ttl: default_model_ttl(),
        }
    }
}

/// Inference engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Run a zero-input inference after a successful commit.
    pub warmup_on_commit: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            warmup_on_commit: true,
        }
    }
}

/// Async job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Bounded queue capacity.
    pub queue_capacity: usize,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub retry_initial_delay: Duration,
    /// Upper bound on retry delay.
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// Backoff multiplier.
    pub retry_multiplier: f64,
    /// Add jitter to retry delays.
    pub retry_jitter: bool,
    /// Hard limit for one inference attempt.
    #[serde(with = "humantime_serde")]
    pub execution_timeout: Duration,
    /// Terminal jobs older than this are swept.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// How often the retention sweep runs.
    #[serde(with = "humantime_serde")]
    pub retention_interval: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_retries: 3,
            retry_initial_delay: Duration::from_secs(60),
            retry_max_delay: Duration::from_secs(600),
            retry_multiplier: 2.0,
            retry_jitter: true,
            execution_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(30 * 24 * 3600),
            retention_interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl JobsConfig {
    /// Backoff policy for job execution.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries + 1,
            initial_delay: self.retry_initial_delay,
            max_delay: self.retry_max_delay,
            multiplier: self.retry_multiplier,
            jitter: self.retry_jitter,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else if let Some(h) = s.strip_suffix('h') {
            h.parse::<u64>()
                .map(|v| Duration::from_secs(v * 3600))
                .map_err(|e| e.to_string())
        } else if let Some(d) = s.strip_suffix('d') {
            d.parse::<u64>()
                .map(|v| Duration::from_secs(v * 86_400))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
