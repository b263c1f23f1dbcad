//! Core type definitions for ModelForge.
//!
//! This module contains the records shared by the lifecycle controller, the
//! prediction service and the job coordinator.
//!
//! # Key Types
//!
//! - [`Model`]: a registered model version and its committed artifact
//! - [`Prediction`]: an immutable record of one synchronous inference call
//! - [`Job`]: an asynchronous unit of inference work
//! - [`Page`]: one page of a listing
//!
//! # Examples
//!
//! ```rust
//! use modelforge::types::{JobStatus, ModelStatus};
//!
//! assert!(ModelStatus::Uploaded.can_transition_to(ModelStatus::Validating));
//! assert!(!ModelStatus::Ready.can_transition_to(ModelStatus::Uploaded));
//!
//! assert!(JobStatus::Completed.is_terminal());
//! assert!(!JobStatus::Completed.can_transition_to(JobStatus::Cancelled));
//! ```

use crate::compute::TensorSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of a model record.
pub type ModelId = Uuid;

/// Identifier of a job record.
pub type JobId = Uuid;

/// Default version assigned when a registration omits one.
pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

/// Lifecycle status of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    /// Registered, no artifact yet.
    Pending,
    /// Artifact stored, not yet validated.
    Uploaded,
    /// Validation in progress.
    Validating,
    /// Committed and servable.
    Ready,
    /// Validation failed.
    Error,
    /// Retired from serving.
    Archived,
}

impl ModelStatus {
    /// Whether the lifecycle graph permits moving to `next`.
    pub fn can_transition_to(self, next: ModelStatus) -> bool {
        use ModelStatus::*;
        matches!(
            (self, next),
            (Pending, Uploaded)
                | (Error, Uploaded)
                | (Uploaded, Validating)
                | (Validating, Ready)
                | (Validating, Error)
                | (Ready, Archived)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Pending => "pending",
            ModelStatus::Uploaded => "uploaded",
            ModelStatus::Validating => "validating",
            ModelStatus::Ready => "ready",
            ModelStatus::Error => "error",
            ModelStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub status: ModelStatus,
    /// Artifact location, set on upload.
    pub file_path: Option<String>,
    pub file_size_bytes: Option<u64>,
    /// SHA-256 of the artifact, hex encoded.
    pub file_hash: Option<String>,
    /// Declared inputs, set at commit.
    pub input_schema: Option<Vec<TensorSpec>>,
    /// Declared outputs, set at commit.
    pub output_schema: Option<Vec<TensorSpec>>,
    /// Opaque runtime metadata extracted at commit.
    pub model_metadata: Option<HashMap<String, serde_json::Value>>,
    /// Reason recorded when validation fails.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Creates a freshly registered model.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: version.into(),
            description: None,
            status: ModelStatus::Pending,
            file_path: None,
            file_size_bytes: None,
            file_hash: None,
            input_schema: None,
            output_schema: None,
            model_metadata: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets description
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModelStatus::Ready
    }
}

/// Record of one synchronous inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub model_id: ModelId,
    pub input_data: serde_json::Value,
    pub output_data: serde_json::Value,
    pub inference_time_ms: f64,
    pub cached: bool,
    /// Correlation id supplied by or generated for the caller.
    pub request_id: String,
    pub client_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status of an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job graph permits moving to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Queued, Cancelled)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Asynchronous inference job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub model_id: ModelId,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    /// Identifier of the queued unit of work.
    pub task_id: Option<String>,
    pub worker_id: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
    pub queue_time_ms: Option<f64>,
    pub inference_time_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new pending job.
    pub fn new(
        model_id: ModelId,
        input_data: serde_json::Value,
        priority: JobPriority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id,
            status: JobStatus::Pending,
            priority,
            input_data,
            output_data: None,
            error_message: None,
            error_traceback: None,
            task_id: None,
            worker_id: None,
            retries: 0,
            max_retries,
            queue_time_ms: None,
            inference_time_ms: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Paging parameters, clamped to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: usize = 20;
    pub const MAX_PAGE_SIZE: usize = 100;

    /// Creates a request, clamping page to >= 1 and page_size to 1..=100.
    pub fn new(page: Option<usize>, page_size: Option<usize>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(Self::DEFAULT_PAGE_SIZE)
                .clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    /// Number of items to skip.
    pub fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Slices an already filtered and ordered collection.
    pub fn from_vec(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.page_size)
            .collect();
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
            total_pages: total.div_ceil(request.page_size),
        }
    }

    /// Maps the items of this page.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
