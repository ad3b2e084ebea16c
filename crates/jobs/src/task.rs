use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use crate::error::{ComputeError, JobError};
use crate::job::{JobId, JobKind, JobStatus};
use crate::store::JobStore;

/// Pluggable logic that performs the work for one job kind.
///
/// Implementations run on a blocking worker thread. They should call
/// [`JobContext::report_progress`] periodically and check
/// [`JobContext::is_cancelled`] at safe points, returning
/// [`ComputeError::Cancelled`] once it reports `true`.
pub trait ComputeFn: Send + Sync {
    fn run(&self, parameters: &Value, ctx: &JobContext) -> Result<Value, ComputeError>;
}

impl<F> ComputeFn for F
where
    F: Fn(&Value, &JobContext) -> Result<Value, ComputeError> + Send + Sync,
{
    fn run(&self, parameters: &Value, ctx: &JobContext) -> Result<Value, ComputeError> {
        self(parameters, ctx)
    }
}

/// Progress and cancellation callbacks handed to a running compute function.
pub struct JobContext {
    job_id: JobId,
    kind: JobKind,
    store: Arc<JobStore>,
    cancel_observed: AtomicBool,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, kind: JobKind, store: Arc<JobStore>) -> Self {
        Self {
            job_id,
            kind,
            store,
            cancel_observed: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    /// Report progress in `[0, 100]`. Out-of-range values are clamped;
    /// regressions are ignored.
    pub fn report_progress(&self, value: f64) {
        match self.store.apply(&self.job_id, |job| job.report_progress(value)) {
            Ok(stored) => {
                debug!(job_id = %self.job_id, kind = %self.kind, progress = stored, "progress");
            }
            Err(e @ (JobError::ProgressRegression { .. } | JobError::InvalidProgress(_))) => {
                debug!(job_id = %self.job_id, "ignored progress report: {}", e);
            }
            Err(e) if e.is_terminal_race() => {
                debug!(job_id = %self.job_id, "progress after terminal state dropped");
            }
            Err(JobError::NotFound(_)) => {
                debug!(job_id = %self.job_id, "progress for evicted job dropped");
            }
            Err(e) => {
                error!(job_id = %self.job_id, kind = %self.kind, "progress update failed: {}", e);
            }
        }
    }

    /// Whether the job has been asked to stop.
    ///
    /// The first `true` moves the job to `cancelled` immediately; anything the
    /// compute function reports afterwards is dropped.
    pub fn is_cancelled(&self) -> bool {
        if self.cancel_observed.load(Ordering::Acquire) {
            return true;
        }
        let requested = self
            .store
            .read(&self.job_id, |job| {
                job.cancel_requested() || job.status() == JobStatus::Cancelled
            })
            .unwrap_or(true);
        if requested {
            self.acknowledge_cancel();
        }
        requested
    }

    /// `Err(Cancelled)` once cancellation is requested, for use with `?`.
    pub fn checkpoint(&self) -> Result<(), ComputeError> {
        if self.is_cancelled() {
            Err(ComputeError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn cancel_observed(&self) -> bool {
        self.cancel_observed.load(Ordering::Acquire)
    }

    fn acknowledge_cancel(&self) {
        if self.cancel_observed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.store.apply(&self.job_id, |job| job.cancel()) {
            Ok(()) => debug!(job_id = %self.job_id, "cancellation acknowledged"),
            Err(e) if e.is_terminal_race() => {}
            Err(JobError::NotFound(_)) => {}
            Err(e) => error!(job_id = %self.job_id, "failed to record cancellation: {}", e),
        }
    }
}
