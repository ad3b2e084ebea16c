use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tracing::{debug, error};

use crate::job::{JobFailure, JobId, JobKind, JobStatus};
use crate::runner::TaskRunner;
use crate::scheduler::admission::QueuedJob;

use super::core::Shared;

impl Shared {
    /// Run an admitted job on a blocking worker, then free its slot.
    pub(super) fn dispatch(self: &Arc<Self>, queued: QueuedJob) {
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            let QueuedJob {
                id, kind, compute, ..
            } = queued;
            let started = Instant::now();
            let runner = TaskRunner::new(id, kind.clone(), Arc::clone(&shared.store), compute);

            let outcome = match tokio::task::spawn_blocking(move || runner.run()).await {
                Ok(status) => status,
                Err(e) => shared.record_worker_failure(&id, &kind, e),
            };
            shared.finish(&kind, outcome, started.elapsed());
        });
    }

    /// Panics and aborted workers leave the job running; fail it here.
    fn record_worker_failure(&self, id: &JobId, kind: &JobKind, e: JoinError) -> Option<JobStatus> {
        let failure = if e.is_panic() {
            let detail = panic_message(e.into_panic());
            error!(job_id = %id, kind = %kind, "compute function panicked: {}", detail);
            JobFailure::new("compute function panicked").with_detail(detail)
        } else {
            error!(job_id = %id, kind = %kind, "worker aborted: {}", e);
            JobFailure::new("worker aborted before the job finished")
        };

        match self.store.update(id, |job| job.fail(failure)) {
            Ok(()) => Some(JobStatus::Failed),
            Err(e) if e.is_terminal_race() => self.store.get(id).ok().map(|j| j.status()),
            Err(e) => {
                debug!(job_id = %id, "could not record worker failure: {}", e);
                None
            }
        }
    }

    /// Account for a finished job and admit the next ones.
    fn finish(self: &Arc<Self>, kind: &JobKind, outcome: Option<JobStatus>, elapsed: Duration) {
        if let Some(status) = outcome {
            self.write_metrics().record_finish(kind.as_str(), status, elapsed);
        }

        let (admitted, idle) = {
            let mut state = self.lock_state();
            state.release(kind);
            let admitted = self.admit_ready(&mut state);
            (admitted, state.is_idle())
        };

        for queued in admitted {
            self.dispatch(queued);
        }
        if idle {
            self.idle.notify_waiters();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
