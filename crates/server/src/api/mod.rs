//! HTTP handlers.
//!
//! Shared error type lives here; each sub-module owns one area.

mod health;
mod jobs;
mod progress;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use pbgui_jobs::{JobError, JobId, JobStatus};

// ── Shared types ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error, rendered as `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub enum ApiError {
    Job(JobError),
    /// Results requested before the job completed.
    NotCompleted { id: JobId, status: JobStatus },
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        ApiError::Job(e)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Job(JobError::UnknownKind(_)) => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::DuplicateKind(_)) => StatusCode::CONFLICT,
            ApiError::Job(JobError::QueueFull { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Job(JobError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Job(
                JobError::IllegalTransition { .. }
                | JobError::ProgressRegression { .. }
                | JobError::InvalidProgress(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotCompleted { .. } => StatusCode::CONFLICT,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Job(e) => e.to_string(),
            ApiError::NotCompleted { id, status } => {
                format!("job {id} has no results (status: {status})")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.message();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("request failed: {}", message);
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// ── Re-exports ───────────────────────────────────────────────────

pub use health::{health, scheduler_metrics};
pub use jobs::{cancel_job, get_job, job_results, list_jobs, run_backtest, run_optimize, submit_job};
pub use progress::job_progress_ws;
