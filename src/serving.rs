//! Synchronous prediction path.
//!
//! Commitment check, result cache, inference, cache write and the
//! prediction audit record, in that order.

use crate::cache::PredictionCache;
use crate::error::Result;
use crate::lifecycle::LifecycleController;
use crate::observability::{self, histograms};
use crate::store::RecordStore;
use crate::types::{ModelId, Page, PageRequest, Prediction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// How the result cache took part in a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// The caller asked to skip the cache.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller context for one prediction.
#[derive(Debug, Clone, Default)]
pub struct PredictRequest {
    pub input: Value,
    pub skip_cache: bool,
    /// Correlation id; generated when absent.
    pub request_id: Option<String>,
    pub client_ip: Option<String>,
}

/// The recorded prediction and how it was served.
#[derive(Debug, Clone)]
pub struct PredictionOutcome {
    pub prediction: Prediction,
    pub cache_status: CacheStatus,
}

/// Serves synchronous predictions for committed models.
pub struct PredictionService {
    lifecycle: Arc<LifecycleController>,
    cache: Arc<PredictionCache>,
    records: Arc<dyn RecordStore>,
}

impl PredictionService {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        cache: Arc<PredictionCache>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            lifecycle,
            cache,
            records,
        }
    }

    /// Runs one prediction and records it.
    pub async fn predict(&self, model_id: ModelId, request: PredictRequest) -> Result<PredictionOutcome> {
        let timer = histograms::predict_timer();
        let model = self.lifecycle.assert_committed(model_id).await?;
        let request_id = request
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if !request.skip_cache {
            if let Some(hit) = self.cache.get(model_id, &request.input).await {
                debug!(model_id = %model_id, request_id = %request_id, "Prediction served from cache");
                let prediction = self
                    .record(
                        model_id,
                        request.input,
                        hit.output,
                        hit.inference_time_ms,
                        true,
                        request_id,
                        request.client_ip,
                    )
                    .await?;
                return Ok(self.finish(prediction, CacheStatus::Hit, timer));
            }
        }

        let engine = self.lifecycle.engine();
        let session = engine
            .get_or_load_session(&model, self.lifecycle.artifacts().as_ref())
            .await
            .map_err(|e| {
                if e.is_invariant_violation() {
                    error!(model_id = %model_id, request_id = %request_id, error = %e, "Committed model cannot be served");
                }
                e
            })?;
        let (output, inference_time_ms) = engine.run_blocking(session, request.input.clone()).await?;

        let cache_status = if request.skip_cache {
            CacheStatus::Bypass
        } else {
            self.cache
                .put(model_id, &request.input, &output, inference_time_ms)
                .await;
            CacheStatus::Miss
        };

        let prediction = self
            .record(
                model_id,
                request.input,
                output,
                inference_time_ms,
                false,
                request_id,
                request.client_ip,
            )
            .await?;
        Ok(self.finish(prediction, cache_status, timer))
    }

    /// Prediction history of a model, newest first.
    pub async fn list_predictions(&self, model_id: ModelId, page: PageRequest) -> Result<Page<Prediction>> {
        self.lifecycle.get(model_id).await?;
        self.records.list_predictions(model_id, page).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        model_id: ModelId,
        input_data: Value,
        output_data: Value,
        inference_time_ms: f64,
        cached: bool,
        request_id: String,
        client_ip: Option<String>,
    ) -> Result<Prediction> {
        self.records
            .insert_prediction(Prediction {
                id: Uuid::new_v4(),
                model_id,
                input_data,
                output_data,
                inference_time_ms,
                cached,
                request_id,
                client_ip,
                created_at: Utc::now(),
            })
            .await
    }

    fn finish(
        &self,
        prediction: Prediction,
        cache_status: CacheStatus,
        timer: histograms::LatencyTimer,
    ) -> PredictionOutcome {
        observability::record_prediction(cache_status.as_str());
        drop(timer.with_label("cache", cache_status.as_str()));
        PredictionOutcome {
            prediction,
            cache_status,
        }
    }
}
