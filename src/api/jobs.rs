//! Asynchronous job routes.

use super::{parse_id, ApiJson, ApiQuery, AppState};
use crate::error::Result;
use crate::scheduling::JobOutcome;
use crate::store::JobFilter;
use crate::types::{Job, JobPriority, JobStatus, ModelId, Page, PageRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub model_id: ModelId,
    pub input_data: Value,
    #[serde(default)]
    pub priority: JobPriority,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub status: Option<JobStatus>,
    pub model_id: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    /// Seconds to wait for the job to finish.
    #[serde(default)]
    pub wait: f64,
}

#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub inference_time_ms: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl JobResultResponse {
    fn new(job_id: Uuid, outcome: JobOutcome) -> Self {
        let status = outcome.status();
        let mut response = Self {
            job_id,
            status,
            result: None,
            error_message: None,
            error_traceback: None,
            inference_time_ms: None,
            completed_at: None,
            message: None,
        };
        match outcome {
            JobOutcome::Completed {
                output,
                inference_time_ms,
                completed_at,
            } => {
                response.result = Some(output);
                response.inference_time_ms = inference_time_ms;
                response.completed_at = completed_at;
            }
            JobOutcome::Failed {
                error,
                traceback,
                completed_at,
            } => {
                response.error_message = Some(error);
                response.error_traceback = traceback;
                response.completed_at = completed_at;
            }
            JobOutcome::Cancelled { completed_at } => {
                response.completed_at = completed_at;
                response.message = Some("Job was cancelled");
            }
            JobOutcome::Pending { .. } => {
                response.message = Some("Job is still processing");
            }
        }
        response
    }
}

pub async fn submit_job(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SubmitJobRequest>,
) -> Result<(StatusCode, Json<Job>)> {
    let job = state
        .jobs
        .submit(request.model_id, request.input_data, request.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListJobsQuery>,
) -> Result<Json<Page<Job>>> {
    let filter = JobFilter {
        status: query.status,
        model_id: query.model_id,
    };
    let page = state
        .jobs
        .list(filter, PageRequest::new(query.page, query.page_size))
        .await?;
    Ok(Json(page))
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    let job = state.jobs.get(parse_id(&id, "Job")?).await?;
    Ok(Json(job))
}

pub async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<ResultQuery>,
) -> Result<Json<JobResultResponse>> {
    let job_id = parse_id(&id, "Job")?;
    let wait = if query.wait.is_finite() && query.wait > 0.0 {
        Duration::from_secs_f64(query.wait.min(crate::scheduling::MAX_RESULT_WAIT.as_secs_f64()))
    } else {
        Duration::ZERO
    };
    let outcome = state.jobs.get_result(job_id, wait).await?;
    Ok(Json(JobResultResponse::new(job_id, outcome)))
}

pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    let job = state.jobs.cancel(parse_id(&id, "Job")?).await?;
    Ok(Json(job))
}

pub async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state.jobs.delete(parse_id(&id, "Job")?).await?;
    Ok(StatusCode::NO_CONTENT)
}
