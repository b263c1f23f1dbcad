//! Benchmarks for graph inference and result-cache keying.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use modelforge::cache::cache_key;
use modelforge::compute::{DataType, GraphBuilder, GraphNode, InferenceEngine, Session, TensorSpec};
use modelforge::store::{ArtifactStore, FsArtifactStore};
use modelforge::types::{Model, ModelStatus};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

const FEATURES: usize = 16;
const CLASSES: usize = 4;

fn classifier() -> Vec<u8> {
    let weights: Vec<Vec<f64>> = (0..FEATURES)
        .map(|i| (0..CLASSES).map(|j| ((i * CLASSES + j) % 7) as f64 * 0.1).collect())
        .collect();
    GraphBuilder::new()
        .input(TensorSpec::new("x", DataType::Float64, vec![None, Some(FEATURES as i64)]))
        .output(TensorSpec::new("probs", DataType::Float64, vec![None, Some(CLASSES as i64)]))
        .node(GraphNode::Dense {
            input: "x".into(),
            output: "logits".into(),
            weights,
            bias: vec![0.0; CLASSES],
        })
        .node(GraphNode::Softmax {
            input: "logits".into(),
            output: "probs".into(),
        })
        .build()
        .to_bytes()
        .unwrap()
}

fn load_session(engine: &InferenceEngine) -> (Arc<Session>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = FsArtifactStore::new(temp_dir.path()).unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let session = runtime.block_on(async {
        let mut model = Model::new("bench", "1.0.0");
        let stored = store.save(model.id, ".json", &classifier()).await.unwrap();
        model.file_path = Some(stored.path);
        model.file_hash = Some(stored.sha256);
        model.status = ModelStatus::Ready;
        engine.get_or_load_session(&model, &store).await.unwrap()
    });
    (session, temp_dir)
}

fn batch(rows: usize) -> Value {
    let rows: Vec<Vec<f64>> = (0..rows)
        .map(|r| (0..FEATURES).map(|c| (r + c) as f64 / 10.0).collect())
        .collect();
    json!({ "x": rows })
}

fn bench_inference(c: &mut Criterion) {
    let engine = InferenceEngine::new();
    let (session, _temp) = load_session(&engine);
    let mut group = c.benchmark_group("inference");

    for rows in [1usize, 32, 256].iter() {
        let input = batch(*rows);
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| engine.run_inference(black_box(&session), black_box(&input)))
        });
    }
    group.finish();
}

fn bench_cache_key(c: &mut Criterion) {
    let model_id = uuid::Uuid::new_v4();
    let mut group = c.benchmark_group("cache_key");

    for rows in [1usize, 256].iter() {
        let input = batch(*rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| cache_key(black_box(model_id), black_box(&input)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_inference, bench_cache_key);
criterion_main!(benches);
