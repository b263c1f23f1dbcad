//! Error types for ModelForge.
//!
//! This module provides a unified error type [`ServeError`] for all serving
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Client**: malformed input, wrong lifecycle state, duplicates, size limits
//! - **Transient**: backend unavailable, timeouts, storage I/O
//! - **Execution**: artifact load and inference failures (never retried)
//! - **Invariant**: a committed model whose artifact has vanished
//!
//! # Example
//!
//! ```rust
//! use modelforge::error::{Result, ServeError};
//!
//! fn check_name(name: &str) -> Result<()> {
//!     if name.is_empty() {
//!         return Err(ServeError::InvalidInput("name cannot be empty".into()));
//!     }
//!     Ok(())
//! }
//!
//! fn handle_error(err: &ServeError) {
//!     if err.is_retryable() {
//!         println!("Retrying operation...");
//!     } else {
//!         println!("Giving up: {}", err);
//!     }
//! }
//! ```

use crate::types::ModelStatus;
use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for ModelForge operations.
#[derive(Error, Debug)]
pub enum ServeError {
    // Lookup and client errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Model {name} version {version} already exists")]
    DuplicateVersion { name: String, version: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error(
        "Model {model_id} has not crossed the pipeline commitment boundary. Current status: {status}"
    )]
    NotCommitted { model_id: Uuid, status: ModelStatus },

    #[error("Model {model_id} is referenced by {count} active job(s)")]
    HasActiveJobs { model_id: Uuid, count: usize },

    #[error("Job {job_id} is already in terminal state {status}")]
    AlreadyTerminal { job_id: Uuid, status: String },

    // Execution errors
    #[error("Failed to load model artifact: {0}")]
    LoadError(String),

    #[error("Input does not match model schema: {0}")]
    InputSchemaMismatch(String),

    #[error("Inference failed: {0}")]
    InferenceError(String),

    #[error("Post-commitment invariant violated for model {model_id}: {detail}")]
    PostCommitmentInvariantViolation { model_id: Uuid, detail: String },

    // Infrastructure errors
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServeError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServeError::Timeout(_)
                | ServeError::Unavailable(_)
                | ServeError::StorageFailure(_)
                | ServeError::Io(_)
        )
    }

    /// Execution failures that re-running cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ServeError::LoadError(_)
                | ServeError::InputSchemaMismatch(_)
                | ServeError::InferenceError(_)
                | ServeError::PostCommitmentInvariantViolation { .. }
                | ServeError::NotCommitted { .. }
                | ServeError::NotFound(_)
        )
    }

    /// Whether this error signals a broken commitment guarantee.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ServeError::PostCommitmentInvariantViolation { .. })
    }

    /// Short machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServeError::NotFound(_) => "not_found",
            ServeError::InvalidInput(_) => "invalid_input",
            ServeError::InvalidState(_) => "invalid_state",
            ServeError::DuplicateVersion { .. } => "duplicate_version",
            ServeError::PayloadTooLarge { .. } => "payload_too_large",
            ServeError::NotCommitted { .. } => "not_committed",
            ServeError::HasActiveJobs { .. } => "has_active_jobs",
            ServeError::AlreadyTerminal { .. } => "already_terminal",
            ServeError::LoadError(_) => "load_error",
            ServeError::InputSchemaMismatch(_) => "input_schema_mismatch",
            ServeError::InferenceError(_) => "inference_error",
            ServeError::PostCommitmentInvariantViolation { .. } => "invariant_violation",
            ServeError::StorageFailure(_) => "storage_failure",
            ServeError::Unavailable(_) => "unavailable",
            ServeError::Timeout(_) => "timeout",
            ServeError::Config(_) | ServeError::InvalidConfig { .. } => "config",
            ServeError::Io(_) => "io",
            ServeError::Serialization(_) => "serialization",
            ServeError::Internal(_) => "internal",
        }
    }

    /// Convert to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ServeError::NotFound(_) => 404,
            ServeError::InvalidInput(_)
            | ServeError::InvalidState(_)
            | ServeError::NotCommitted { .. }
            | ServeError::InputSchemaMismatch(_) => 400,
            ServeError::DuplicateVersion { .. }
            | ServeError::HasActiveJobs { .. }
            | ServeError::AlreadyTerminal { .. } => 409,
            ServeError::PayloadTooLarge { .. } => 413,
            ServeError::Unavailable(_) => 503,
            ServeError::Timeout(_) => 504,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for ServeError {
    fn from(e: serde_json::Error) -> Self {
        ServeError::Serialization(e.to_string())
    }
}

/// Result type alias for ModelForge operations.
pub type Result<T> = std::result::Result<T, ServeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ServeError::Timeout(100).is_retryable());
        assert!(ServeError::Unavailable("queue".into()).is_retryable());
        assert!(!ServeError::LoadError("bad".into()).is_retryable());

        assert!(ServeError::InputSchemaMismatch("x".into()).is_permanent());
        assert!(!ServeError::Timeout(100).is_permanent());
    }

    #[test]
    fn test_status_codes() {
        let not_committed = ServeError::NotCommitted {
            model_id: Uuid::new_v4(),
            status: ModelStatus::Uploaded,
        };
        assert_eq!(not_committed.status_code(), 400);
        assert!(not_committed.to_string().contains("Current status: uploaded"));

        let violation = ServeError::PostCommitmentInvariantViolation {
            model_id: Uuid::new_v4(),
            detail: "artifact missing".into(),
        };
        assert_eq!(violation.status_code(), 500);
        assert!(violation.is_invariant_violation());
        assert_eq!(violation.kind(), "invariant_violation");

        assert_eq!(
            ServeError::PayloadTooLarge { size: 10, limit: 5 }.status_code(),
            413
        );
    }
}
