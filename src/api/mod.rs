//! HTTP surface for ModelForge.
//!
//! Model, prediction, job and cache routes live under the configured API
//! prefix; health probes are mounted at the root.

mod cache;
mod extract;
mod health;
mod jobs;
mod models;
mod predictions;

use crate::cache::PredictionCache;
use crate::error::ServeError;
use crate::health::HealthChecker;
use crate::lifecycle::LifecycleController;
use crate::scheduling::JobCoordinator;
use crate::serving::PredictionService;
use crate::types::PageRequest;
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header::HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{error, info_span, warn, Level};
use uuid::Uuid;

pub use extract::{ApiJson, ApiQuery};

/// Reports how the result cache took part in a response.
pub(crate) const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Correlates a request with its logs; echoed on every response.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Extra room for multipart framing on top of the artifact limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleController>,
    pub predictions: Arc<PredictionService>,
    pub jobs: Arc<JobCoordinator>,
    pub cache: Arc<PredictionCache>,
    pub health: Arc<HealthChecker>,
    pub max_artifact_bytes: u64,
}

/// Build the full application router.
pub fn router(state: AppState, api_prefix: &str) -> Router {
    let body_limit = usize::try_from(state.max_artifact_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let api = Router::new()
        .route("/models", post(models::create_model).get(models::list_models))
        .route("/models/by-name/:name/versions", get(models::list_versions))
        .route("/models/by-name/:name/latest", get(models::latest_version))
        .route(
            "/models/:id",
            get(models::get_model)
                .patch(models::update_model)
                .delete(models::delete_model),
        )
        .route("/models/:id/upload", post(models::upload_model))
        .route("/models/:id/validate", post(models::validate_model))
        .route("/models/:id/archive", post(models::archive_model))
        .route("/models/:id/predict", post(predictions::predict))
        .route("/models/:id/predictions", get(predictions::list_predictions))
        .route("/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job).delete(jobs::delete_job))
        .route("/jobs/:id/result", get(jobs::get_job_result))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/cache/metrics", get(cache::get_metrics))
        .route("/cache/metrics/reset", post(cache::reset_metrics));

    let probes = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live));

    let prefix = api_prefix.trim_end_matches('/');
    let app = if prefix.is_empty() {
        probes.merge(api)
    } else {
        probes.nest(prefix, api)
    };

    // Outermost last: the id is assigned before the trace span opens.
    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
        .with_state(state)
}

fn request_span(request: &Request) -> tracing::Span {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

/// Error body returned by every route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.is_invariant_violation() {
            error!(error = %self, "Invariant violation surfaced to client");
        } else if status.is_server_error() {
            warn!(kind = self.kind(), error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.kind().to_string(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Paging query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl PageQuery {
    pub fn to_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

/// Parse a path id, reporting malformed ids as not found.
pub(crate) fn parse_id(raw: &str, what: &str) -> crate::error::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ServeError::NotFound(format!("{} {} not found", what, raw)))
}
