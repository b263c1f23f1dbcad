//! Result and model record caching for ModelForge.
//!
//! [`PredictionCache`] maps (model id, canonicalized input) to a previously
//! computed output. [`ModelCache`] keeps model records for the read
//! endpoints. Both are optimizations only: every backend failure is logged
//! and degrades to a miss or a no-op.

use crate::error::{Result, ServeError};
use crate::health::ComponentHealth;
use crate::types::{Model, ModelId};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Prefix shared by every prediction key.
pub const KEY_PREFIX: &str = "prediction";

/// Prefix shared by every model record key.
pub const MODEL_KEY_PREFIX: &str = "model";

/// Key-value store with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    /// Removes every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
    async fn ping(&self) -> Result<()>;
}

struct CacheEntry {
    value: String,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// In-process LRU backend.
pub struct MemoryCacheBackend {
    entries: Mutex<LruCache<String, CacheEntry>>,
    offline: AtomicBool,
}

impl MemoryCacheBackend {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates losing the connection to the backend.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Evict expired entries.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServeError::Unavailable("cache backend offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.pop(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries.lock().await.put(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            entries.pop(key);
        }
        Ok(matching.len())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// A cached inference result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPrediction {
    pub output: Value,
    pub inference_time_ms: f64,
}

/// Cache counters as exposed over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate_percent: f64,
    pub enabled: bool,
    pub ttl_seconds: u64,
}

/// Serializes `value` with object keys sorted recursively and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Cache key for a model and input: `prediction:{model_id}:{digest}`.
pub fn cache_key(model_id: ModelId, input: &Value) -> String {
    let digest = hex::encode(Sha256::digest(canonical_json(input).as_bytes()));
    format!("{}:{}:{}", KEY_PREFIX, model_id, &digest[..16])
}

fn model_prefix(model_id: ModelId) -> String {
    format!("{}:{}:", KEY_PREFIX, model_id)
}

/// Fail-open prediction cache.
pub struct PredictionCache {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PredictionCache {
    pub fn new(backend: Arc<dyn CacheBackend>, enabled: bool, ttl: Duration) -> Self {
        Self {
            backend,
            enabled,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Looks up a cached result. Backend errors count as misses.
    pub async fn get(&self, model_id: ModelId, input: &Value) -> Option<CachedPrediction> {
        if !self.enabled {
            return None;
        }
        let key = cache_key(model_id, input);
        let found = match self.backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedPrediction>(&raw) {
                Ok(cached) => Some(cached),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Stores a result with the configured TTL.
    pub async fn put(&self, model_id: ModelId, input: &Value, output: &Value, inference_time_ms: f64) {
        if !self.enabled {
            return;
        }
        let key = cache_key(model_id, input);
        let entry = CachedPrediction {
            output: output.clone(),
            inference_time_ms,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, raw, self.ttl).await {
            warn!(key = %key, error = %e, "Cache write failed, skipping");
        }
    }

    /// Removes every cached result of a model.
    pub async fn invalidate_model(&self, model_id: ModelId) {
        if !self.enabled {
            return;
        }
        match self.backend.delete_prefix(&model_prefix(model_id)).await {
            Ok(removed) => debug!(model_id = %model_id, removed, "Invalidated cached predictions"),
            Err(e) => warn!(model_id = %model_id, error = %e, "Cache invalidation failed"),
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let rate = if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64 * 10_000.0).round() / 100.0
        };
        CacheMetrics {
            hits,
            misses,
            total_requests: total,
            hit_rate_percent: rate,
            enabled: self.enabled,
            ttl_seconds: self.ttl.as_secs(),
        }
    }

    /// Clears the counters, leaving entries in place.
    pub fn reset_metrics(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub async fn health(&self) -> ComponentHealth {
        if !self.enabled {
            return ComponentHealth::healthy("result_cache").with_detail("enabled", "false");
        }
        let start = Instant::now();
        match self.backend.ping().await {
            Ok(()) => ComponentHealth::healthy("result_cache").with_latency(start.elapsed()),
            Err(e) => ComponentHealth::degraded("result_cache", e.to_string())
                .with_latency(start.elapsed())
                .with_detail("mode", "pass-through"),
        }
    }
}

/// Cache key of a model record: `model:{model_id}`.
pub fn model_key(model_id: ModelId) -> String {
    format!("{}:{}", MODEL_KEY_PREFIX, model_id)
}

/// Fail-open cache of model records served by the read endpoints.
///
/// The commitment check never reads from it; it always asks the record
/// store.
pub struct ModelCache {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
    ttl: Duration,
    /// Bumped by every invalidation so a read that raced a write does not
    /// store the record it saw.
    generation: AtomicU64,
}

impl ModelCache {
    pub fn new(backend: Arc<dyn CacheBackend>, enabled: bool, ttl: Duration) -> Self {
        Self {
            backend,
            enabled,
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current invalidation generation, to pass back to [`ModelCache::put`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn get(&self, model_id: ModelId) -> Option<Model> {
        if !self.enabled {
            return None;
        }
        let key = model_key(model_id);
        match self.backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable model entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Model cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Stores a record read at `generation`, unless an invalidation happened since.
    pub async fn put(&self, model: &Model, generation: u64) {
        if !self.enabled || self.generation() != generation {
            return;
        }
        let key = model_key(model.id);
        let raw = match serde_json::to_string(model) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode model entry");
                return;
            }
        };
        if let Err(e) = self.backend.set(&key, raw, self.ttl).await {
            warn!(key = %key, error = %e, "Model cache write failed, skipping");
        }
    }

    pub async fn invalidate(&self, model_id: ModelId) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if !self.enabled {
            return;
        }
        if let Err(e) = self.backend.delete_prefix(&model_key(model_id)).await {
            warn!(model_id = %model_id, error = %e, "Model cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn cache(backend: Arc<MemoryCacheBackend>) -> PredictionCache {
        PredictionCache::new(backend, true, Duration::from_secs(60))
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": [1, {"z": 1, "a": 2}], "a": "x"});
        assert_eq!(canonical_json(&a), r#"{"a":"x","b":[1,{"a":2,"z":1}]}"#);
    }

    #[test]
    fn test_cache_key_format() {
        let id = Uuid::new_v4();
        let key = cache_key(id, &json!({"x": 1, "y": 2}));
        let prefix = format!("prediction:{}:", id);
        assert!(key.starts_with(&prefix));
        assert_eq!(key.len(), prefix.len() + 16);
        assert_eq!(key, cache_key(id, &json!({"y": 2, "x": 1})));
        assert_ne!(key, cache_key(id, &json!({"x": 1, "y": 3})));
    }

    #[tokio::test]
    async fn test_put_get_and_metrics() {
        let cache = cache(Arc::new(MemoryCacheBackend::new(100)));
        let id = Uuid::new_v4();
        let input = json!([[1.0, 2.0]]);

        assert!(cache.get(id, &input).await.is_none());
        cache.put(id, &input, &json!([0]), 1.5).await;
        let hit = cache.get(id, &input).await.unwrap();
        assert_eq!(hit.output, json!([0]));
        assert_eq!(hit.inference_time_ms, 1.5);

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.hit_rate_percent, 50.0);
        assert_eq!(metrics.ttl_seconds, 60);

        cache.reset_metrics();
        assert_eq!(cache.metrics().total_requests, 0);
        assert!(cache.get(id, &input).await.is_some());
    }

    #[tokio::test]
    async fn test_hit_rate_rounding() {
        let cache = cache(Arc::new(MemoryCacheBackend::new(100)));
        let id = Uuid::new_v4();
        let input = json!([1]);
        cache.put(id, &input, &json!([1]), 1.0).await;
        cache.get(id, &input).await;
        cache.get(id, &json!([2])).await;
        cache.get(id, &json!([3])).await;
        assert_eq!(cache.metrics().hit_rate_percent, 33.33);
    }

    #[tokio::test]
    async fn test_invalidate_model_only_touches_that_model() {
        let backend = Arc::new(MemoryCacheBackend::new(100));
        let cache = cache(Arc::clone(&backend));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let input = json!([1]);
        cache.put(a, &input, &json!([1]), 1.0).await;
        cache.put(b, &input, &json!([2]), 1.0).await;

        cache.invalidate_model(a).await;
        assert!(cache.get(a, &input).await.is_none());
        assert!(cache.get(b, &input).await.is_some());
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_backend_outage_fails_open() {
        let backend = Arc::new(MemoryCacheBackend::new(100));
        let cache = cache(Arc::clone(&backend));
        let id = Uuid::new_v4();
        let input = json!([1]);
        cache.put(id, &input, &json!([1]), 1.0).await;

        backend.set_available(false);
        assert!(cache.get(id, &input).await.is_none());
        cache.put(id, &input, &json!([1]), 1.0).await;
        cache.invalidate_model(id).await;
        assert_eq!(cache.metrics().misses, 1);
        assert_eq!(
            cache.health().await.status,
            crate::health::HealthStatus::Degraded
        );

        backend.set_available(true);
        assert!(cache.get(id, &input).await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_cache_is_noop() {
        let backend = Arc::new(MemoryCacheBackend::new(100));
        let cache = PredictionCache::new(backend.clone(), false, Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.put(id, &json!([1]), &json!([1]), 1.0).await;
        assert!(cache.get(id, &json!([1])).await.is_none());
        assert!(backend.is_empty().await);
        let metrics = cache.metrics();
        assert_eq!(metrics.misses, 0);
        assert!(!metrics.enabled);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let backend = MemoryCacheBackend::new(100);
        backend
            .set("k", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.evict_expired().await, 1);
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_model_cache_round_trip_and_invalidate() {
        let backend = Arc::new(MemoryCacheBackend::new(100));
        let models = ModelCache::new(backend.clone(), true, Duration::from_secs(60));
        let model = Model::new("iris", "1.0.0");

        assert!(models.get(model.id).await.is_none());
        models.put(&model, models.generation()).await;
        assert_eq!(models.get(model.id).await.unwrap().name, "iris");

        // Prediction invalidation leaves model records alone.
        cache(backend.clone()).invalidate_model(model.id).await;
        assert!(models.get(model.id).await.is_some());

        models.invalidate(model.id).await;
        assert!(models.get(model.id).await.is_none());
    }

    #[tokio::test]
    async fn test_model_cache_drops_puts_that_raced_an_invalidation() {
        let models = ModelCache::new(Arc::new(MemoryCacheBackend::new(100)), true, Duration::from_secs(60));
        let model = Model::new("iris", "1.0.0");

        let seen = models.generation();
        models.invalidate(model.id).await;
        models.put(&model, seen).await;
        assert!(models.get(model.id).await.is_none());
    }

    #[tokio::test]
    async fn test_lru_bound() {
        let backend = MemoryCacheBackend::new(2);
        for key in ["a", "b", "c"] {
            backend.set(key, key.into(), Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(backend.len().await, 2);
        assert!(backend.get("a").await.unwrap().is_none());
    }
}
