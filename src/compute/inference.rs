// ML Inference Engine

use super::model::{GraphMetadata, GraphNode, ModelGraph, TensorSpec};
use super::tensor::Tensor;
use crate::error::{Result, ServeError};
use crate::observability;
use crate::store::{compute_hash, ArtifactStore};
use crate::types::{Model, ModelStatus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Schemas and metadata extracted from a validated artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedArtifact {
    pub input_schema: Vec<TensorSpec>,
    pub output_schema: Vec<TensorSpec>,
    pub metadata: HashMap<String, Value>,
}

/// A loaded, immutable runtime session for one model.
#[derive(Debug)]
pub struct Session {
    pub model_id: Uuid,
    pub graph: ModelGraph,
    pub file_hash: String,
    pub loaded_at: DateTime<Utc>,
    inference_count: AtomicU64,
}

impl Session {
    fn new(model_id: Uuid, graph: ModelGraph, file_hash: String) -> Self {
        Self {
            model_id,
            graph,
            file_hash,
            loaded_at: Utc::now(),
            inference_count: AtomicU64::new(0),
        }
    }

    /// Number of inferences executed on this session.
    pub fn inference_count(&self) -> u64 {
        self.inference_count.load(Ordering::Relaxed)
    }

    pub fn metadata(&self) -> &GraphMetadata {
        &self.graph.metadata
    }
}

/// Inference engine statistics
#[derive(Debug, Default)]
pub struct InferenceStats {
    /// Total inferences attempted
    pub total_inferences: AtomicU64,
    /// Successful inferences
    pub successful_inferences: AtomicU64,
    /// Failed inferences
    pub failed_inferences: AtomicU64,
    /// Total execution time in microseconds
    pub total_inference_time_us: AtomicU64,
    /// Sessions loaded from artifacts
    pub sessions_loaded: AtomicU64,
}

/// Point-in-time copy of [`InferenceStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceStatsSnapshot {
    pub total_inferences: u64,
    pub successful_inferences: u64,
    pub failed_inferences: u64,
    pub avg_latency_ms: f64,
    pub sessions_loaded: u64,
    pub loaded_sessions: usize,
}

/// Executes model graphs and caches loaded sessions by model id.
pub struct InferenceEngine {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    /// Bumped by every invalidation. A load that started before the bump
    /// returns its session without caching it.
    generation: AtomicU64,
    stats: InferenceStats,
}

impl InferenceEngine {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            stats: InferenceStats::default(),
        }
    }

    /// Parses artifact bytes in a disposable session and extracts schemas.
    pub fn validate(&self, artifact: &[u8]) -> Result<ValidatedArtifact> {
        let graph = ModelGraph::parse(artifact)?;
        debug!(
            inputs = graph.inputs.len(),
            outputs = graph.outputs.len(),
            nodes = graph.nodes.len(),
            "Artifact validated"
        );
        Ok(ValidatedArtifact {
            metadata: graph.metadata_map(),
            input_schema: graph.inputs,
            output_schema: graph.outputs,
        })
    }

    /// Returns the cached session for `model`, loading it from storage on a miss.
    ///
    /// A committed model whose artifact is gone or altered is an invariant
    /// violation and is reported as such, never reloaded. The artifact is
    /// checked for presence on cache hits too.
    pub async fn get_or_load_session(
        &self,
        model: &Model,
        store: &dyn ArtifactStore,
    ) -> Result<Arc<Session>> {
        let generation = self.generation.load(Ordering::Acquire);
        let committed = model.status == ModelStatus::Ready;
        let violation = |detail: String| {
            error!(model_id = %model.id, detail = %detail, "Post-commitment invariant violated");
            ServeError::PostCommitmentInvariantViolation {
                model_id: model.id,
                detail,
            }
        };

        let path = match model.file_path.as_deref() {
            Some(path) => path,
            None if committed => {
                self.invalidate(model.id);
                return Err(violation("artifact reference is missing".into()));
            }
            None => {
                return Err(ServeError::LoadError(format!(
                    "model {} has no artifact",
                    model.id
                )))
            }
        };

        let cached = self.sessions.read().get(&model.id).cloned();
        if let Some(session) = cached {
            // A session loaded from another artifact is stale; reload below.
            let current = model.file_hash.as_deref().map_or(true, |h| h == session.file_hash);
            if current {
                if !committed || store.exists(path).await? {
                    return Ok(session);
                }
                self.invalidate(model.id);
                return Err(violation(format!("artifact {} is missing from storage", path)));
            }
            debug!(model_id = %model.id, "Cached session is stale");
        }

        let bytes = match store.read(path).await {
            Ok(bytes) => bytes,
            Err(ServeError::NotFound(_)) if committed => {
                return Err(violation(format!("artifact {} is missing from storage", path)))
            }
            Err(ServeError::NotFound(_)) => {
                return Err(ServeError::LoadError(format!("artifact {} not found", path)))
            }
            Err(e @ ServeError::StorageFailure(_)) => return Err(e),
            Err(e) => return Err(ServeError::StorageFailure(e.to_string())),
        };

        let hash = compute_hash(&bytes);
        if committed {
            if let Some(expected) = model.file_hash.as_deref() {
                if expected != hash {
                    return Err(violation(format!(
                        "artifact hash changed from {} to {}",
                        expected, hash
                    )));
                }
            }
        }

        let graph = ModelGraph::parse(&bytes)?;
        let session = Arc::new(Session::new(model.id, graph, hash));

        let mut sessions = self.sessions.write();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(model_id = %model.id, "Session invalidated while loading; not cached");
            return Ok(session);
        }
        let session = match sessions.get(&model.id) {
            Some(existing) if existing.file_hash == session.file_hash => Arc::clone(existing),
            _ => {
                sessions.insert(model.id, Arc::clone(&session));
                session
            }
        };
        observability::update_session_gauge(sessions.len());
        drop(sessions);

        self.stats.sessions_loaded.fetch_add(1, Ordering::Relaxed);
        info!(model_id = %model.id, name = %model.name, version = %model.version, "Session loaded");
        Ok(session)
    }

    /// Runs one inference and returns the output and elapsed milliseconds.
    pub fn run_inference(&self, session: &Session, input: &Value) -> Result<(Value, f64)> {
        let start = Instant::now();
        self.stats.total_inferences.fetch_add(1, Ordering::Relaxed);

        let result = execute(&session.graph, input);
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                self.stats.successful_inferences.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .total_inference_time_us
                    .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
                session.inference_count.fetch_add(1, Ordering::Relaxed);
                observability::histograms::record_inference_latency(elapsed);
            }
            Err(e) => {
                self.stats.failed_inferences.fetch_add(1, Ordering::Relaxed);
                debug!(model_id = %session.model_id, error = %e, "Inference failed");
            }
        }

        result.map(|output| (output, elapsed.as_secs_f64() * 1000.0))
    }

    /// Runs inference on the blocking thread pool.
    pub async fn run_blocking(
        self: &Arc<Self>,
        session: Arc<Session>,
        input: Value,
    ) -> Result<(Value, f64)> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.run_inference(&session, &input))
            .await
            .map_err(|e| ServeError::InferenceError(format!("inference task aborted: {}", e)))?
    }

    /// Runs one inference on zero-filled inputs, dynamic dimensions set to 1.
    pub fn warmup(&self, session: &Session) -> Result<()> {
        let input: Map<String, Value> = session
            .graph
            .inputs
            .iter()
            .map(|spec| {
                let zeros = Tensor::zeros(spec.concrete_shape(1)?)?;
                zeros.to_json(spec.dtype).map(|v| (spec.name.clone(), v))
            })
            .collect::<Result<_>>()?;
        execute(&session.graph, &Value::Object(input))?;
        debug!(model_id = %session.model_id, "Session warmed up");
        Ok(())
    }

    /// Drops the cached session of a model.
    pub fn invalidate(&self, model_id: Uuid) -> bool {
        let mut sessions = self.sessions.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let removed = sessions.remove(&model_id).is_some();
        observability::update_session_gauge(sessions.len());
        drop(sessions);
        if removed {
            debug!(model_id = %model_id, "Session invalidated");
        }
        removed
    }

    /// Drops every cached session.
    pub fn clear(&self) {
        let mut sessions = self.sessions.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        sessions.clear();
        observability::update_session_gauge(0);
    }

    pub fn loaded_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn loaded_models(&self) -> Vec<Uuid> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn stats(&self) -> InferenceStatsSnapshot {
        let successful = self.stats.successful_inferences.load(Ordering::Relaxed);
        let total_us = self.stats.total_inference_time_us.load(Ordering::Relaxed);
        InferenceStatsSnapshot {
            total_inferences: self.stats.total_inferences.load(Ordering::Relaxed),
            successful_inferences: successful,
            failed_inferences: self.stats.failed_inferences.load(Ordering::Relaxed),
            avg_latency_ms: if successful > 0 {
                total_us as f64 / successful as f64 / 1000.0
            } else {
                0.0
            },
            sessions_loaded: self.stats.sessions_loaded.load(Ordering::Relaxed),
            loaded_sessions: self.loaded_count(),
        }
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds the JSON payload to the graph inputs.
///
/// The payload is an object keyed by input name. A graph with a single input
/// also accepts the bare tensor.
fn bind_inputs(graph: &ModelGraph, input: &Value) -> Result<HashMap<String, Tensor>> {
    let mut values = HashMap::new();
    match input {
        Value::Object(fields) => {
            for spec in &graph.inputs {
                let value = fields.get(&spec.name).ok_or_else(|| {
                    ServeError::InputSchemaMismatch(format!("missing input '{}'", spec.name))
                })?;
                values.insert(spec.name.clone(), Tensor::from_json(value, spec)?);
            }
        }
        Value::Array(_) if graph.inputs.len() == 1 => {
            let spec = &graph.inputs[0];
            values.insert(spec.name.clone(), Tensor::from_json(input, spec)?);
        }
        _ => {
            let names: Vec<&str> = graph.inputs.iter().map(|s| s.name.as_str()).collect();
            return Err(ServeError::InputSchemaMismatch(format!(
                "input must be an object with fields {:?}",
                names
            )));
        }
    }
    Ok(values)
}

fn execute(graph: &ModelGraph, input: &Value) -> Result<Value> {
    let mut values = bind_inputs(graph, input)?;

    for node in &graph.nodes {
        let x = values.get(node.input()).ok_or_else(|| {
            ServeError::InferenceError(format!("value '{}' was never computed", node.input()))
        })?;
        let y = apply(node, x)?;
        values.insert(node.output().to_string(), y);
    }

    let mut outputs = Map::new();
    for spec in &graph.outputs {
        let tensor = values.get(&spec.name).ok_or_else(|| {
            ServeError::InferenceError(format!("output '{}' was not produced", spec.name))
        })?;
        outputs.insert(spec.name.clone(), tensor.to_json(spec.dtype)?);
    }
    Ok(Value::Object(outputs))
}

fn apply(node: &GraphNode, x: &Tensor) -> Result<Tensor> {
    match node {
        GraphNode::Dense { weights, bias, .. } => dense(x, weights, bias),
        GraphNode::Relu { .. } => Ok(map(x, |v| v.max(0.0))),
        GraphNode::Sigmoid { .. } => Ok(map(x, |v| 1.0 / (1.0 + (-v).exp()))),
        GraphNode::Identity { .. } => Ok(x.clone()),
        GraphNode::Softmax { .. } => {
            let mut out = x.clone();
            let width = x.last_dim();
            if width > 0 {
                for row in out.data.chunks_mut(width) {
                    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let mut sum = 0.0;
                    for v in row.iter_mut() {
                        *v = (*v - max).exp();
                        sum += *v;
                    }
                    for v in row.iter_mut() {
                        *v /= sum;
                    }
                }
            }
            Ok(out)
        }
        GraphNode::Argmax { .. } => {
            if x.shape.is_empty() {
                return Err(ServeError::InferenceError("argmax on a scalar".into()));
            }
            let width = x.last_dim();
            let shape = x.shape[..x.shape.len() - 1].to_vec();
            if width == 0 {
                return Err(ServeError::InferenceError("argmax over an empty axis".into()));
            }
            let data = x
                .data
                .chunks(width)
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .fold((0usize, f64::NEG_INFINITY), |best, (i, &v)| {
                            if v > best.1 {
                                (i, v)
                            } else {
                                best
                            }
                        })
                        .0 as f64
                })
                .collect();
            Ok(Tensor::new(shape, data))
        }
    }
}

fn dense(x: &Tensor, weights: &[Vec<f64>], bias: &[f64]) -> Result<Tensor> {
    if x.shape.is_empty() {
        return Err(ServeError::InferenceError("dense on a scalar".into()));
    }
    let in_features = x.last_dim();
    if in_features != weights.len() {
        return Err(ServeError::InferenceError(format!(
            "dense expects {} input features, got {}",
            weights.len(),
            in_features
        )));
    }
    let out_features = bias.len();
    let rows = x.rows();
    let mut data = Vec::with_capacity(rows * out_features);
    for r in 0..rows {
        let row = &x.data[r * in_features..(r + 1) * in_features];
        for (j, b) in bias.iter().enumerate() {
            let acc: f64 = row.iter().zip(weights).map(|(v, w)| v * w[j]).sum();
            data.push(acc + b);
        }
    }
    let mut shape = x.shape.clone();
    if let Some(last) = shape.last_mut() {
        *last = out_features;
    }
    Ok(Tensor::new(shape, data))
}

fn map(x: &Tensor, f: impl Fn(f64) -> f64) -> Tensor {
    Tensor::new(x.shape.clone(), x.data.iter().map(|&v| f(v)).collect())
}
