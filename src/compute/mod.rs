//! Model execution for ModelForge
//!
//! Provides the embedded graph runtime:
//! - Artifact format and structural validation
//! - JSON to tensor conversion checked against declared schemas
//! - Session loading and caching keyed by model id
//!
//! This module never decides retries or fallbacks. Callers do.

pub mod inference;
pub mod model;
pub mod tensor;

pub use inference::{InferenceEngine, InferenceStatsSnapshot, Session, ValidatedArtifact};
pub use model::{
    DataType, GraphBuilder, GraphMetadata, GraphNode, ModelGraph, TensorSpec, GRAPH_FORMAT, MAX_DIMENSION,
    MAX_ELEMENTS,
};
pub use tensor::Tensor;
