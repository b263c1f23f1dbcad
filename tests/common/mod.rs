//! Common test utilities for integration tests.

pub mod assertions;
pub mod fixtures;

use modelforge::config::ServeConfig;
use modelforge::shutdown::{ShutdownCoordinator, ShutdownManager};
use modelforge::Services;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

// Re-export common types
pub use assertions::*;
pub use fixtures::*;

/// Test environment that manages temporary directories and cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub artifact_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let artifact_dir = temp_dir.path().join("models");
        std::fs::create_dir_all(&artifact_dir).expect("Failed to create artifact dir");

        Self {
            temp_dir,
            artifact_dir,
        }
    }

    /// Creates a sub-directory in the temp dir
    pub fn subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdir");
        path
    }

    /// Server configuration rooted in this environment with fast retries.
    pub fn config(&self) -> ServeConfig {
        let mut config = ServeConfig::development();
        config.environment = "test".to_string();
        config.storage.artifact_root = self.artifact_dir.clone();
        config.jobs.workers = 2;
        config.jobs.retry_initial_delay = Duration::from_millis(10);
        config.jobs.retry_max_delay = Duration::from_millis(50);
        config.jobs.retry_jitter = false;
        config.jobs.execution_timeout = Duration::from_secs(5);
        config.jobs.retention_interval = Duration::from_secs(3600);
        config.observability.metrics_enabled = false;
        config
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// In-process server
// ============================================================================

/// A ModelForge server bound to an ephemeral port.
pub struct TestServer {
    pub env: TestEnv,
    pub services: Services,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    shutdown: ShutdownCoordinator,
}

impl TestServer {
    /// Start a server with running job workers.
    pub async fn start() -> Self {
        let env = TestEnv::new();
        let config = env.config();
        Self::start_with(env, config, true).await
    }

    /// Start a server whose jobs are queued but never picked up.
    pub async fn start_without_workers() -> Self {
        let env = TestEnv::new();
        let config = env.config();
        Self::start_with(env, config, false).await
    }

    pub async fn start_with(env: TestEnv, config: ServeConfig, run_workers: bool) -> Self {
        let services = Services::build(config).await.expect("Failed to build services");
        let shutdown = ShutdownCoordinator::with_timeout(Duration::from_secs(2));
        let mut manager = ShutdownManager::new(shutdown.clone());
        if run_workers {
            services.spawn_background(&shutdown, &mut manager);
        }

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");
        let app = services
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.wait_for_shutdown().await })
                .await;
        });
        let drain_shutdown = shutdown.clone();
        tokio::spawn(async move {
            drain_shutdown.wait_for_shutdown().await;
            manager.drain().await;
        });

        Self {
            env,
            services,
            addr,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    /// URL for a versioned API path such as `/models`.
    pub fn api(&self, path: &str) -> String {
        format!("http://{}{}{}", self.addr, self.services.config.server.api_prefix, path)
    }

    /// URL for a root-level path such as `/health`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn create_model(&self, name: &str, version: &str) -> Value {
        let response = self
            .client
            .post(self.api("/models"))
            .json(&json!({ "name": name, "version": version }))
            .send()
            .await
            .expect("create request failed");
        assert_eq!(response.status(), 201, "model creation failed");
        response.json().await.expect("invalid model body")
    }

    pub async fn upload(&self, model_id: &str, filename: &str, bytes: Vec<u8>) -> reqwest::Response {
        let form = Form::new().part("file", Part::bytes(bytes).file_name(filename.to_string()));
        self.client
            .post(self.api(&format!("/models/{}/upload", model_id)))
            .multipart(form)
            .send()
            .await
            .expect("upload request failed")
    }

    pub async fn validate(&self, model_id: &str) -> reqwest::Response {
        self.client
            .post(self.api(&format!("/models/{}/validate", model_id)))
            .send()
            .await
            .expect("validate request failed")
    }

    /// Register, upload and commit the iris classifier, returning its id.
    pub async fn ready_model(&self, name: &str) -> String {
        let model = self.create_model(name, "1.0.0").await;
        let id = model["id"].as_str().expect("model id").to_string();

        let upload = self.upload(&id, "iris.json", iris_artifact()).await;
        assert_eq!(upload.status(), 200, "upload failed");

        let validated = self.validate(&id).await;
        assert_eq!(validated.status(), 200, "validation failed");
        let body: Value = validated.json().await.expect("invalid validate body");
        assert_eq!(body["status"], "ready");
        id
    }

    pub async fn predict(&self, model_id: &str, input: Value) -> reqwest::Response {
        self.client
            .post(self.api(&format!("/models/{}/predict", model_id)))
            .json(&json!({ "input_data": input }))
            .send()
            .await
            .expect("predict request failed")
    }

    pub async fn submit_job(&self, model_id: &str, input: Value) -> Value {
        let response = self
            .client
            .post(self.api("/jobs"))
            .json(&json!({ "model_id": model_id, "input_data": input }))
            .send()
            .await
            .expect("submit request failed");
        assert_eq!(response.status(), 201, "job submission failed");
        response.json().await.expect("invalid job body")
    }

    pub async fn get_json(&self, url: String) -> (u16, Value) {
        let response = self.client.get(url).send().await.expect("GET request failed");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn job_status(&self, job_id: &str) -> String {
        let (_, body) = self.get_json(self.api(&format!("/jobs/{}", job_id))).await;
        body["status"].as_str().unwrap_or_default().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}
