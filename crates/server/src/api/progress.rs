//! Live job progress over WebSocket.
//!
//! `GET /ws/jobs/{id}/progress` pushes `{id, status, progress}` on every tick
//! and closes once the job is terminal. An unknown id gets a single
//! `{error, job_id}` frame before the close.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use pbgui_jobs::{Job, JobId, JobStatus};

use crate::state::AppState;

#[derive(Serialize)]
struct ProgressFrame {
    id: JobId,
    status: JobStatus,
    progress: Option<f64>,
}

impl From<&Job> for ProgressFrame {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id(),
            status: job.status(),
            progress: job.progress(),
        }
    }
}

#[derive(Serialize)]
struct ErrorFrame {
    error: String,
    job_id: JobId,
}

pub async fn job_progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_progress(socket, state, id))
}

/// Next frame to send and whether it is the last one.
fn next_frame(state: &AppState, id: &JobId) -> (String, bool) {
    match state.jobs.get_job(id) {
        Ok(job) => (
            serde_json::to_string(&ProgressFrame::from(&job)).unwrap_or_default(),
            job.is_terminal(),
        ),
        Err(e) => (
            serde_json::to_string(&ErrorFrame {
                error: e.to_string(),
                job_id: *id,
            })
            .unwrap_or_default(),
            true,
        ),
    }
}

async fn stream_progress(socket: WebSocket, state: Arc<AppState>, id: JobId) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval(state.config.server.progress_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (frame, last) = next_frame(&state, &id);
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    debug!(job_id = %id, "progress client went away");
                    return;
                }
                if last {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!(job_id = %id, "progress client disconnected");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
