//! Job submission, inspection and cancellation endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pbgui_jobs::{Job, JobFilter, JobId, JobKind, JobStatus};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub kind: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub job_id: JobId,
    pub result: Value,
}

fn submit(
    state: &AppState,
    kind: JobKind,
    parameters: Value,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let job_id = state.jobs.submit_job(kind, parameters)?;
    let status = state.jobs.get_job(&job_id)?.status();
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id, status })))
}

/// POST /api/run/backtest
pub async fn run_backtest(
    State(state): State<Arc<AppState>>,
    Json(parameters): Json<Value>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    submit(&state, JobKind::backtest(), parameters)
}

/// POST /api/run/optimize
pub async fn run_optimize(
    State(state): State<Arc<AppState>>,
    Json(parameters): Json<Value>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    submit(&state, JobKind::optimize(), parameters)
}

/// POST /api/jobs
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    submit(&state, JobKind::new(req.kind), req.parameters)
}

/// GET /api/jobs?kind=&status=
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<JobFilter>,
) -> Json<Vec<Job>> {
    Json(state.jobs.list_jobs(&filter))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.jobs.get_job(&id)?))
}

/// GET /api/jobs/{id}/results
pub async fn job_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<ResultsResponse>, ApiError> {
    let job = state.jobs.get_job(&id)?;
    match job.result() {
        Some(result) if job.status() == JobStatus::Completed => Ok(Json(ResultsResponse {
            job_id: id,
            result: result.clone(),
        })),
        _ => Err(ApiError::NotCompleted {
            id,
            status: job.status(),
        }),
    }
}

/// POST /api/jobs/{id}/cancel, DELETE /api/jobs/{id}
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.jobs.cancel_job(&id)?))
}
