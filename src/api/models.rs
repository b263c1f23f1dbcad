//! Model lifecycle routes.

use super::{parse_id, ApiJson, ApiQuery, AppState, X_CACHE};
use crate::compute::TensorSpec;
use crate::error::{Result, ServeError};
use crate::lifecycle::ModelUpdate;
use crate::types::{Model, ModelStatus, PageRequest};
use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

/// Body of `PATCH /models/{id}`. Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdateModelRequest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    /// Rejected when present; status moves only through upload, validate and archive.
    pub status: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListModelsQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub status: Option<ModelStatus>,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    #[serde(default)]
    pub ready_only: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub file_path: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub file_hash: Option<String>,
    pub status: ModelStatus,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub id: Uuid,
    pub valid: bool,
    pub status: ModelStatus,
    pub input_schema: Option<Vec<TensorSpec>>,
    pub output_schema: Option<Vec<TensorSpec>>,
    pub model_metadata: Option<HashMap<String, Value>>,
    pub error_message: Option<String>,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VersionSummary {
    pub id: Uuid,
    pub version: String,
    pub status: ModelStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub name: String,
    pub versions: Vec<VersionSummary>,
    pub total: usize,
    pub latest_version: Option<String>,
}

pub async fn create_model(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateModelRequest>,
) -> Result<(StatusCode, Json<Model>)> {
    let model = state
        .lifecycle
        .register(&request.name, request.version.as_deref(), request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(model)))
}

pub async fn list_models(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListModelsQuery>,
) -> Result<Response> {
    let page = state
        .lifecycle
        .list(query.status, PageRequest::new(query.page, query.page_size))
        .await?;
    Ok(Json(page).into_response())
}

pub async fn get_model(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    let (model, hit) = state.lifecycle.get_cached(parse_id(&id, "Model")?).await?;
    let mut response = Json(model).into_response();
    let headers = response.headers_mut();
    headers.insert(
        X_CACHE,
        HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
    );
    if let Some(models) = state.lifecycle.model_cache() {
        let max_age = format!("max-age={}", models.ttl().as_secs());
        if let Ok(value) = HeaderValue::from_str(&max_age) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }
    Ok(response)
}

pub async fn update_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<UpdateModelRequest>,
) -> Result<Json<Model>> {
    let model_id = parse_id(&id, "Model")?;
    if request.status.is_some() {
        return Err(ServeError::InvalidInput(
            "status cannot be set directly; use upload, validate or archive".into(),
        ));
    }
    let model = state
        .lifecycle
        .update(
            model_id,
            ModelUpdate {
                name: request.name,
                version: request.version,
                description: request.description,
            },
        )
        .await?;
    Ok(Json(model))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<VersionsResponse>> {
    let models = state.lifecycle.versions(&name).await?;
    if models.is_empty() {
        return Err(ServeError::NotFound(format!("No models named '{}'", name)));
    }

    let latest_version = models.first().map(|m| m.version.clone());
    let versions: Vec<VersionSummary> = models
        .into_iter()
        .map(|m| VersionSummary {
            id: m.id,
            version: m.version,
            status: m.status,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(VersionsResponse {
        name,
        total: versions.len(),
        versions,
        latest_version,
    }))
}

pub async fn latest_version(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiQuery(query): ApiQuery<LatestQuery>,
) -> Result<Json<Model>> {
    let model = state.lifecycle.latest(&name, query.ready_only).await?;
    Ok(Json(model))
}

/// Accepts the artifact from the multipart field `file`.
pub async fn upload_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let model_id = parse_id(&id, "Model")?;
    let limit = state.max_artifact_bytes;

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ServeError::InvalidInput("Uploaded file has no filename".into()))?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ServeError::PayloadTooLarge {
                    size: bytes.len() as u64,
                    limit,
                }
            } else {
                malformed(e)
            }
        })? {
            let size = (bytes.len() + chunk.len()) as u64;
            if size > limit {
                return Err(ServeError::PayloadTooLarge { size, limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        let model = state
            .lifecycle
            .attach_artifact(model_id, &filename, &bytes)
            .await?;
        return Ok(Json(UploadResponse {
            id: model.id,
            file_path: model.file_path,
            file_size_bytes: model.file_size_bytes,
            file_hash: model.file_hash,
            status: model.status,
            message: "File uploaded successfully",
        }));
    }

    Err(ServeError::InvalidInput(
        "Multipart field 'file' is required".into(),
    ))
}

/// The commit endpoint: validates the uploaded artifact.
pub async fn validate_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ValidateResponse>> {
    let model = state.lifecycle.commit(parse_id(&id, "Model")?).await?;
    let valid = model.status == ModelStatus::Ready;
    Ok(Json(ValidateResponse {
        id: model.id,
        valid,
        status: model.status,
        input_schema: model.input_schema,
        output_schema: model.output_schema,
        model_metadata: model.model_metadata,
        error_message: model.error_message,
        message: if valid {
            "Model validated successfully"
        } else {
            "Model validation failed"
        },
    }))
}

pub async fn archive_model(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Model>> {
    let model = state.lifecycle.archive(parse_id(&id, "Model")?).await?;
    Ok(Json(model))
}

pub async fn delete_model(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state.lifecycle.delete(parse_id(&id, "Model")?).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn malformed(e: axum::extract::multipart::MultipartError) -> ServeError {
    ServeError::InvalidInput(format!("Malformed multipart body: {}", e.body_text()))
}
