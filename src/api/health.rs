//! Health, readiness and liveness probes.

use super::AppState;
use crate::health::{HealthResponse, LivenessResponse, ReadinessResponse};
use axum::{extract::State, http::StatusCode, Json};

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let response = state.health.check_health().await;
    let status = StatusCode::from_u16(response.status.to_status_code()).unwrap_or(StatusCode::OK);
    (status, Json(response))
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let response = state.health.check_readiness().await;
    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

pub async fn live(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(state.health.check_liveness())
}
