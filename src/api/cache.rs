//! Result cache statistics.

use super::AppState;
use crate::cache::CacheMetrics;
use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
pub struct CacheMetricsResponse {
    pub prediction_cache: CacheMetrics,
}

pub async fn get_metrics(State(state): State<AppState>) -> Json<CacheMetricsResponse> {
    Json(CacheMetricsResponse {
        prediction_cache: state.cache.metrics(),
    })
}

pub async fn reset_metrics(State(state): State<AppState>) -> Json<Value> {
    state.cache.reset_metrics();
    Json(json!({"status": "reset"}))
}
