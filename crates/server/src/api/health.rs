//! Health and scheduler metrics endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use pbgui_jobs::{JobKind, SchedulerMetrics, StatusCounts};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub profile: String,
    pub uptime_secs: i64,
    pub registered_kinds: Vec<JobKind>,
    pub passivbot_installed: bool,
    pub jobs: StatusCounts,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.jobs.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        profile: state.config.profile_label().to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        registered_kinds: state.jobs.registered_kinds(),
        passivbot_installed: state.config.passivbot.is_installed(),
        jobs: state.jobs.status_counts(),
    })
}

pub async fn scheduler_metrics(State(state): State<Arc<AppState>>) -> Json<SchedulerMetrics> {
    Json(state.jobs.metrics())
}
