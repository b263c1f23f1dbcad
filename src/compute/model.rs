// Model graph artifact format

use crate::error::{Result, ServeError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Format tag every artifact must carry.
pub const GRAPH_FORMAT: &str = "modelforge.graph/v1";

/// Largest fixed dimension a tensor may declare.
pub const MAX_DIMENSION: i64 = 1 << 20;

/// Largest element count of a declared tensor, dynamic dimensions taken as 1.
pub const MAX_ELEMENTS: usize = 1 << 24;

/// Product of `shape`, or `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Data type for tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float32,
    Float64,
    Int32,
    Int64,
    Bool,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Bool => "bool",
        }
    }

    /// Integer element types
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }
}

/// Tensor specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Tensor name
    pub name: String,
    /// Data type
    pub dtype: DataType,
    /// Shape (`None` for dynamic dimensions)
    pub shape: Vec<Option<i64>>,
}

impl TensorSpec {
    /// Creates a new tensor spec
    pub fn new(name: &str, dtype: DataType, shape: Vec<Option<i64>>) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            shape,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Shape with dynamic dimensions replaced by `fill`.
    ///
    /// Fails when a dimension is not positive or the element count exceeds
    /// [`MAX_ELEMENTS`].
    pub fn concrete_shape(&self, fill: usize) -> Result<Vec<usize>> {
        let shape = self
            .shape
            .iter()
            .map(|d| match d {
                Some(v) => usize::try_from(*v).ok().filter(|v| *v > 0),
                None => Some(fill),
            })
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| {
                ServeError::LoadError(format!("tensor '{}' has an invalid dimension", self.name))
            })?;
        match element_count(&shape) {
            Some(n) if n <= MAX_ELEMENTS => Ok(shape),
            _ => Err(ServeError::LoadError(format!(
                "tensor '{}' declares more than {} elements",
                self.name, MAX_ELEMENTS
            ))),
        }
    }
}

/// A single graph operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphNode {
    /// Affine map over the last axis. `weights` is `[in_features][out_features]`.
    Dense {
        input: String,
        output: String,
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
    },
    Relu { input: String, output: String },
    Sigmoid { input: String, output: String },
    /// Softmax over the last axis
    Softmax { input: String, output: String },
    /// Index of the maximum over the last axis (drops that axis)
    Argmax { input: String, output: String },
    Identity { input: String, output: String },
}

impl GraphNode {
    pub fn input(&self) -> &str {
        match self {
            GraphNode::Dense { input, .. }
            | GraphNode::Relu { input, .. }
            | GraphNode::Sigmoid { input, .. }
            | GraphNode::Softmax { input, .. }
            | GraphNode::Argmax { input, .. }
            | GraphNode::Identity { input, .. } => input,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            GraphNode::Dense { output, .. }
            | GraphNode::Relu { output, .. }
            | GraphNode::Sigmoid { output, .. }
            | GraphNode::Softmax { output, .. }
            | GraphNode::Argmax { output, .. }
            | GraphNode::Identity { output, .. } => output,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GraphNode::Dense { .. } => "dense",
            GraphNode::Relu { .. } => "relu",
            GraphNode::Sigmoid { .. } => "sigmoid",
            GraphNode::Softmax { .. } => "softmax",
            GraphNode::Argmax { .. } => "argmax",
            GraphNode::Identity { .. } => "identity",
        }
    }

    /// Static shape produced from an input of shape `shape`.
    fn infer_shape(&self, shape: &[Option<i64>]) -> std::result::Result<Vec<Option<i64>>, String> {
        match self {
            GraphNode::Dense { weights, .. } => {
                let (last, leading) = shape
                    .split_last()
                    .ok_or_else(|| "dense requires rank >= 1".to_string())?;
                if let Some(features) = last {
                    if *features as usize != weights.len() {
                        return Err(format!(
                            "dense expects {} input features, input provides {}",
                            weights.len(),
                            features
                        ));
                    }
                }
                let out_features = weights.first().map(|row| row.len()).unwrap_or(0);
                let mut out = leading.to_vec();
                out.push(Some(out_features as i64));
                Ok(out)
            }
            GraphNode::Softmax { .. } | GraphNode::Argmax { .. } if shape.is_empty() => {
                Err(format!("{} requires rank >= 1", self.kind()))
            }
            GraphNode::Argmax { .. } => Ok(shape[..shape.len() - 1].to_vec()),
            _ => Ok(shape.to_vec()),
        }
    }
}

/// Descriptive metadata carried by an artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub producer_name: Option<String>,
    pub producer_version: Option<String>,
    pub graph_name: Option<String>,
    pub description: Option<String>,
    pub domain: Option<String>,
    pub version: Option<i64>,
    #[serde(default)]
    pub custom_metadata: HashMap<String, String>,
}

/// A parsed model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelGraph {
    pub format: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

impl ModelGraph {
    /// Parses and structurally checks artifact bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let graph: ModelGraph = serde_json::from_slice(bytes)
            .map_err(|e| ServeError::LoadError(format!("artifact is not a valid model graph: {}", e)))?;
        graph.check()?;
        Ok(graph)
    }

    /// Serializes the graph into artifact bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Structural validation: format tag, wiring, weights and static shapes.
    pub fn check(&self) -> Result<()> {
        let fail = |msg: String| Err(ServeError::LoadError(msg));

        if self.format != GRAPH_FORMAT {
            return fail(format!(
                "unsupported artifact format '{}', expected '{}'",
                self.format, GRAPH_FORMAT
            ));
        }
        if self.inputs.is_empty() {
            return fail("graph declares no inputs".to_string());
        }
        if self.outputs.is_empty() {
            return fail("graph declares no outputs".to_string());
        }

        let mut seen = HashSet::new();
        for spec in self.inputs.iter().chain(self.outputs.iter()) {
            if spec.name.is_empty() {
                return fail("tensor names must be non-empty".to_string());
            }
            if let Some(bad) = spec.shape.iter().flatten().find(|d| **d <= 0 || **d > MAX_DIMENSION) {
                return fail(format!(
                    "tensor '{}' has invalid dimension {}; dimensions must be 1 to {}",
                    spec.name, bad, MAX_DIMENSION
                ));
            }
            spec.concrete_shape(1)?;
        }
        for spec in &self.inputs {
            if !seen.insert(spec.name.as_str()) {
                return fail(format!("duplicate input '{}'", spec.name));
            }
        }

        let mut shapes: HashMap<&str, Vec<Option<i64>>> = self
            .inputs
            .iter()
            .map(|spec| (spec.name.as_str(), spec.shape.clone()))
            .collect();

        for (index, node) in self.nodes.iter().enumerate() {
            if let GraphNode::Dense { weights, bias, .. } = node {
                let out_features = weights.first().map(|row| row.len()).unwrap_or(0);
                if weights.is_empty() || out_features == 0 {
                    return fail(format!("node {} (dense) has empty weights", index));
                }
                if weights.iter().any(|row| row.len() != out_features) {
                    return fail(format!("node {} (dense) has ragged weights", index));
                }
                if bias.len() != out_features {
                    return fail(format!(
                        "node {} (dense) bias has {} values, expected {}",
                        index,
                        bias.len(),
                        out_features
                    ));
                }
                if weights.iter().flatten().chain(bias.iter()).any(|v| !v.is_finite()) {
                    return fail(format!("node {} (dense) has non-finite parameters", index));
                }
            }

            let input_shape = shapes.get(node.input()).ok_or_else(|| {
                ServeError::LoadError(format!(
                    "node {} ({}) consumes undefined value '{}'",
                    index,
                    node.kind(),
                    node.input()
                ))
            })?;
            let output_shape = node
                .infer_shape(input_shape)
                .map_err(|e| ServeError::LoadError(format!("node {}: {}", index, e)))?;
            if shapes.insert(node.output(), output_shape).is_some() {
                return fail(format!("node {} redefines value '{}'", index, node.output()));
            }
        }

        for spec in &self.outputs {
            let produced = shapes.get(spec.name.as_str()).ok_or_else(|| {
                ServeError::LoadError(format!("output '{}' is not produced by the graph", spec.name))
            })?;
            if produced.len() != spec.rank() {
                return fail(format!(
                    "output '{}' declared with rank {}, graph produces rank {}",
                    spec.name,
                    spec.rank(),
                    produced.len()
                ));
            }
            for (axis, (declared, actual)) in spec.shape.iter().zip(produced.iter()).enumerate() {
                if let (Some(d), Some(a)) = (declared, actual) {
                    if d != a {
                        return fail(format!(
                            "output '{}' dimension {} declared as {}, graph produces {}",
                            spec.name, axis, d, a
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Metadata map stored on the model record after validation.
    pub fn metadata_map(&self) -> HashMap<String, serde_json::Value> {
        use serde_json::Value;

        let mut map = HashMap::new();
        let meta = &self.metadata;
        let optional = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);

        map.insert("producer_name".to_string(), optional(&meta.producer_name));
        map.insert("producer_version".to_string(), optional(&meta.producer_version));
        map.insert("graph_name".to_string(), optional(&meta.graph_name));
        map.insert("description".to_string(), optional(&meta.description));
        map.insert("domain".to_string(), optional(&meta.domain));
        map.insert(
            "version".to_string(),
            meta.version.map(Value::from).unwrap_or(Value::Null),
        );
        map.insert(
            "custom_metadata".to_string(),
            serde_json::to_value(&meta.custom_metadata).unwrap_or(Value::Null),
        );
        map.insert("format".to_string(), Value::String(self.format.clone()));
        map.insert("node_count".to_string(), Value::from(self.nodes.len()));
        map
    }
}

/// Builder for model graphs.
pub struct GraphBuilder {
    graph: ModelGraph,
}

impl GraphBuilder {
    /// Creates a new builder
    pub fn new() -> Self {
        Self {
            graph: ModelGraph {
                format: GRAPH_FORMAT.to_string(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                nodes: Vec::new(),
                metadata: GraphMetadata::default(),
            },
        }
    }

    /// Adds input
    pub fn input(mut self, spec: TensorSpec) -> Self {
        self.graph.inputs.push(spec);
        self
    }

    /// Adds output
    pub fn output(mut self, spec: TensorSpec) -> Self {
        self.graph.outputs.push(spec);
        self
    }

    /// Appends a node
    pub fn node(mut self, node: GraphNode) -> Self {
        self.graph.nodes.push(node);
        self
    }

    /// Sets graph name
    pub fn graph_name(mut self, name: &str) -> Self {
        self.graph.metadata.graph_name = Some(name.to_string());
        self
    }

    /// Sets producer
    pub fn producer(mut self, name: &str, version: &str) -> Self {
        self.graph.metadata.producer_name = Some(name.to_string());
        self.graph.metadata.producer_version = Some(version.to_string());
        self
    }

    /// Builds the graph without checking it
    pub fn build(self) -> ModelGraph {
        self.graph
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
