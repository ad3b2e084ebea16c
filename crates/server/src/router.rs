//! HTTP router construction.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api;
use crate::state::AppState;

/// Build the application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/run/backtest", post(api::run_backtest))
        .route("/api/run/optimize", post(api::run_optimize))
        .route("/api/jobs", get(api::list_jobs).post(api::submit_job))
        .route(
            "/api/jobs/{id}",
            get(api::get_job).delete(api::cancel_job),
        )
        .route("/api/jobs/{id}/results", get(api::job_results))
        .route("/api/jobs/{id}/cancel", post(api::cancel_job))
        .route("/api/scheduler/metrics", get(api::scheduler_metrics))
        .route("/ws/jobs/{id}/progress", get(api::job_progress_ws))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!("invalid CORS_ORIGIN '{}' ({}); allowing any origin", origin, e);
            CorsLayer::permissive()
        }
    }
}
