//! Synchronous prediction routes.

use super::{parse_id, ApiJson, ApiQuery, AppState, PageQuery, X_CACHE, X_REQUEST_ID};
use crate::error::Result;
use crate::serving::PredictRequest;
use crate::types::{Page, Prediction};
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PredictBody {
    pub input_data: Value,
    #[serde(default)]
    pub skip_cache: bool,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction_id: Uuid,
    pub model_id: Uuid,
    pub input_data: Value,
    pub output_data: Value,
    pub inference_time_ms: f64,
    pub cached: bool,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<Prediction> for PredictionResponse {
    fn from(p: Prediction) -> Self {
        Self {
            prediction_id: p.id,
            model_id: p.model_id,
            input_data: p.input_data,
            output_data: p.output_data,
            inference_time_ms: p.inference_time_ms,
            cached: p.cached,
            request_id: p.request_id,
            created_at: p.created_at,
        }
    }
}

pub async fn predict(
    State(state): State<AppState>,
    Path(id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<PredictBody>,
) -> Result<Response> {
    let model_id = parse_id(&id, "Model")?;
    let request_id = body.request_id.or_else(|| {
        headers
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let outcome = state
        .predictions
        .predict(
            model_id,
            PredictRequest {
                input: body.input_data,
                skip_cache: body.skip_cache,
                request_id,
                client_ip: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
            },
        )
        .await?;

    let mut response = Json(PredictionResponse::from(outcome.prediction)).into_response();
    response.headers_mut().insert(
        X_CACHE,
        HeaderValue::from_static(outcome.cache_status.as_str()),
    );
    Ok(response)
}

pub async fn list_predictions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Page<PredictionResponse>>> {
    let page = state
        .predictions
        .list_predictions(parse_id(&id, "Model")?, query.to_request())
        .await?;
    Ok(Json(page.map(PredictionResponse::from)))
}
