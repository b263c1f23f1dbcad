// Test fixtures and data generators for integration tests

use modelforge::compute::{DataType, GraphBuilder, GraphNode, ModelGraph, TensorSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

/// Labelled iris measurements: sepal length, sepal width, petal length, petal width.
pub const IRIS_SAMPLES: [([f64; 4], i64); 3] = [
    ([5.1, 3.5, 1.4, 0.2], 0),
    ([7.0, 3.2, 4.7, 1.4], 1),
    ([6.3, 3.3, 6.0, 2.5], 2),
];

/// Hand-tuned linear classifier over the iris features.
///
/// Produces `probabilities` (softmax over three classes) and `label`.
pub fn iris_graph() -> ModelGraph {
    GraphBuilder::new()
        .graph_name("iris-linear")
        .producer("modelforge-tests", "1.0")
        .input(TensorSpec::new("features", DataType::Float64, vec![None, Some(4)]))
        .output(TensorSpec::new("probabilities", DataType::Float64, vec![None, Some(3)]))
        .output(TensorSpec::new("label", DataType::Int64, vec![None]))
        .node(GraphNode::Dense {
            input: "features".into(),
            output: "logits".into(),
            weights: vec![
                vec![0.0, 0.0, 0.0],
                vec![0.0, 0.0, 0.0],
                vec![-2.0, 1.0, 1.0],
                vec![-2.0, 0.0, 3.0],
            ],
            bias: vec![8.0, 0.0, -5.0],
        })
        .node(GraphNode::Softmax {
            input: "logits".into(),
            output: "probabilities".into(),
        })
        .node(GraphNode::Argmax {
            input: "logits".into(),
            output: "label".into(),
        })
        .build()
}

pub fn iris_artifact() -> Vec<u8> {
    iris_graph().to_bytes().expect("iris graph serializes")
}

/// Request body for a single iris row.
pub fn iris_input(features: [f64; 4]) -> Value {
    json!({ "features": [features] })
}

/// A well-formed graph whose input declares an unservable shape.
pub fn oversized_artifact() -> Vec<u8> {
    let shape = vec![Some(i64::MAX), Some(4)];
    GraphBuilder::new()
        .input(TensorSpec::new("x", DataType::Float32, shape.clone()))
        .output(TensorSpec::new("y", DataType::Float32, shape))
        .node(GraphNode::Relu {
            input: "x".into(),
            output: "y".into(),
        })
        .build()
        .to_bytes()
        .expect("graph serializes")
}

/// Bytes that are not a model graph.
pub fn invalid_artifact() -> Vec<u8> {
    b"{\"format\": \"not-a-graph\", \"nodes\": 7}".to_vec()
}

/// Deterministic random data generator for reproducible tests
pub struct TestDataGenerator {
    rng: StdRng,
}

impl TestDataGenerator {
    /// Creates a new generator with a fixed seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A plausible iris measurement row.
    pub fn iris_row(&mut self) -> [f64; 4] {
        [
            self.rng.gen_range(4.3..7.9),
            self.rng.gen_range(2.0..4.4),
            self.rng.gen_range(1.0..6.9),
            self.rng.gen_range(0.1..2.5),
        ]
    }

    /// Random bytes of the given length.
    pub fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.rng.fill(&mut bytes[..]);
        bytes
    }
}

impl Default for TestDataGenerator {
    fn default() -> Self {
        Self::new(42)
    }
}
