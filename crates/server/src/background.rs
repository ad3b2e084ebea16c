//! Job supervisor: timeout enforcement and retention sweeps.
//!
//! The job service keeps every record until told otherwise. This task
//! cancels jobs that run past `JOB_TIMEOUT_SECS` and evicts finished jobs
//! older than `JOB_RETENTION_SECS`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pbgui_core::config::SupervisorConfig;
use pbgui_jobs::{JobFilter, JobService, JobStatus};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    pub evicted: usize,
}

/// Start the supervisor loop, or `None` when both timeout and retention are off.
pub fn spawn_supervisor(jobs: Arc<JobService>, config: SupervisorConfig) -> Option<JoinHandle<()>> {
    if !config.is_enabled() {
        debug!("Job supervisor disabled");
        return None;
    }
    info!(
        "Job supervisor started: timeout={}s, retention={}s, every {}s",
        config.timeout_secs, config.retention_secs, config.interval_secs
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if jobs.is_shutting_down() {
                break;
            }
            let report = sweep(&jobs, &config, Utc::now());
            if report != SweepReport::default() {
                info!(
                    "Supervisor sweep: {} timed out, {} evicted",
                    report.timed_out, report.evicted
                );
            }
        }
        debug!("Job supervisor stopped");
    }))
}

/// Seconds as a `TimeDelta`, or `None` past chrono's range.
fn seconds(secs: u64) -> Option<TimeDelta> {
    i64::try_from(secs).ok().and_then(TimeDelta::try_seconds)
}

/// One supervisor pass evaluated at `now`.
///
/// Limits too large to represent behave as "never": no job becomes overdue
/// and no finished job expires.
pub fn sweep(jobs: &JobService, config: &SupervisorConfig, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();

    if let Some(limit) = seconds(config.timeout_secs).filter(|_| config.timeout_secs > 0) {
        for job in jobs.list_jobs(&JobFilter::status(JobStatus::Running)) {
            let overdue = job.started_at().is_some_and(|t| now - t > limit);
            if !overdue || job.cancel_requested() {
                continue;
            }
            match jobs.cancel_job(&job.id()) {
                Ok(_) => {
                    warn!(job_id = %job.id(), kind = %job.kind(), "job exceeded {}s; cancelling", config.timeout_secs);
                    report.timed_out += 1;
                }
                Err(e) => debug!(job_id = %job.id(), "timeout cancel skipped: {}", e),
            }
        }
    }

    if config.retention_secs > 0 {
        if let Some(cutoff) = seconds(config.retention_secs).and_then(|d| now.checked_sub_signed(d)) {
            report.evicted = jobs.evict_finished_before(cutoff);
        }
    }

    report
}
