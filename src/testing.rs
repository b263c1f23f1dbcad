//! Shared fixtures for unit tests.

use crate::cache::{MemoryCacheBackend, PredictionCache};
use crate::compute::{DataType, GraphBuilder, GraphNode, InferenceEngine, TensorSpec};
use crate::config::StorageConfig;
use crate::lifecycle::LifecycleController;
use crate::store::{FsArtifactStore, MemoryRecordStore};
use crate::types::ModelId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) struct LifecycleFixture {
    pub _dir: TempDir,
    pub records: Arc<MemoryRecordStore>,
    pub artifacts: Arc<FsArtifactStore>,
    pub cache: Arc<PredictionCache>,
    pub lifecycle: Arc<LifecycleController>,
}

pub(crate) fn lifecycle_fixture() -> LifecycleFixture {
    lifecycle_fixture_with(Arc::new(MemoryRecordStore::new()))
}

pub(crate) fn lifecycle_fixture_with(records: Arc<MemoryRecordStore>) -> LifecycleFixture {
    let dir = TempDir::new().unwrap();
    let artifacts = Arc::new(FsArtifactStore::new(dir.path()).unwrap());
    let cache = Arc::new(PredictionCache::new(
        Arc::new(MemoryCacheBackend::new(100)),
        true,
        Duration::from_secs(60),
    ));
    let lifecycle = Arc::new(LifecycleController::new(
        records.clone(),
        artifacts.clone(),
        Arc::new(InferenceEngine::new()),
        cache.clone(),
        StorageConfig::default(),
    ));
    LifecycleFixture {
        _dir: dir,
        records,
        artifacts,
        cache,
        lifecycle,
    }
}

/// Two inputs summed into one output.
pub(crate) fn sum_artifact() -> Vec<u8> {
    GraphBuilder::new()
        .input(TensorSpec::new("x", DataType::Float64, vec![None, Some(2)]))
        .output(TensorSpec::new("y", DataType::Float64, vec![None, Some(1)]))
        .node(GraphNode::Dense {
            input: "x".into(),
            output: "y".into(),
            weights: vec![vec![1.0], vec![1.0]],
            bias: vec![0.0],
        })
        .build()
        .to_bytes()
        .unwrap()
}

/// Register, upload and commit a model.
pub(crate) async fn committed_model(fixture: &LifecycleFixture) -> ModelId {
    let model = fixture.lifecycle.register("sum", None, None).await.unwrap();
    fixture
        .lifecycle
        .attach_artifact(model.id, "sum.json", &sum_artifact())
        .await
        .unwrap();
    fixture.lifecycle.commit(model.id).await.unwrap();
    model.id
}

/// Poll `check` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
