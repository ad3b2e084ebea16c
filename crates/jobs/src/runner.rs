//! Executes one admitted job and records its terminal state.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{ComputeError, JobError};
use crate::job::{Job, JobFailure, JobId, JobKind, JobStatus};
use crate::store::JobStore;
use crate::task::{ComputeFn, JobContext};

const UNREQUESTED_CANCEL: &str = "compute function reported cancellation without a cancel request";

pub(crate) struct TaskRunner {
    id: JobId,
    kind: JobKind,
    store: Arc<JobStore>,
    compute: Arc<dyn ComputeFn>,
}

impl TaskRunner {
    pub(crate) fn new(
        id: JobId,
        kind: JobKind,
        store: Arc<JobStore>,
        compute: Arc<dyn ComputeFn>,
    ) -> Self {
        Self {
            id,
            kind,
            store,
            compute,
        }
    }

    /// Run the compute function to completion. Blocks the calling thread.
    ///
    /// Returns the job's status afterwards, or `None` if the record is gone.
    pub(crate) fn run(self) -> Option<JobStatus> {
        let job = match self.store.get(&self.id) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %self.id, "job vanished before start: {}", e);
                return None;
            }
        };

        // Cancelled between admission and pickup: never invoke the function.
        if job.cancel_requested() {
            debug!(job_id = %self.id, "cancelled before start");
            self.settle(Job::cancel);
            return self.final_status();
        }

        info!(job_id = %self.id, kind = %self.kind, "job started");
        let ctx = JobContext::new(self.id, self.kind.clone(), Arc::clone(&self.store));
        let outcome = self.compute.run(job.parameters(), &ctx);

        if ctx.cancel_observed() {
            // The context already wrote `cancelled`; whatever came back is discarded.
            info!(job_id = %self.id, kind = %self.kind, "job cancelled");
            return self.final_status();
        }

        match outcome {
            Ok(result) => {
                self.settle(|job| job.complete(result));
                info!(job_id = %self.id, kind = %self.kind, "job completed");
            }
            Err(ComputeError::Cancelled) => {
                let requested = self
                    .store
                    .read(&self.id, |job| job.cancel_requested())
                    .unwrap_or(false);
                if requested {
                    self.settle(Job::cancel);
                    info!(job_id = %self.id, kind = %self.kind, "job cancelled");
                } else {
                    warn!(job_id = %self.id, kind = %self.kind, "job stopped without a cancel request");
                    self.settle(|job| job.fail(JobFailure::new(UNREQUESTED_CANCEL)));
                }
            }
            Err(ComputeError::Failed(message)) => {
                warn!(job_id = %self.id, kind = %self.kind, "job failed: {}", message);
                self.settle(|job| job.fail(JobFailure::new(message)));
            }
        }
        self.final_status()
    }

    fn settle(&self, transition: impl FnOnce(&mut Job) -> Result<(), JobError>) {
        match self.store.update(&self.id, transition) {
            Ok(()) => {}
            Err(e) if e.is_terminal_race() => {
                debug!(job_id = %self.id, "outcome dropped, job already terminal: {}", e);
            }
            Err(JobError::NotFound(_)) => {
                warn!(job_id = %self.id, "job evicted while running; outcome dropped");
            }
            Err(e) => {
                error!(job_id = %self.id, kind = %self.kind, "failed to record outcome: {}", e);
            }
        }
    }

    fn final_status(&self) -> Option<JobStatus> {
        self.store.get(&self.id).ok().map(|job| job.status())
    }
}
