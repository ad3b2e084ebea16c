//! Public facade: registration, submission, inspection and cancellation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::job::{Job, JobFilter, JobId, JobKind, JobStatus};
use crate::registry::KindRegistry;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerMetrics};
use crate::store::{JobStore, StatusCounts};
use crate::task::ComputeFn;

/// Entry point used by the API layer.
///
/// Owns the job store, the kind registry and the scheduler. All methods take
/// `&self`; share it behind an `Arc`.
pub struct JobService {
    store: Arc<JobStore>,
    registry: KindRegistry,
    scheduler: Scheduler,
}

impl JobService {
    /// Build a service whose workers run on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use [`JobService::with_runtime`]
    /// to pass a handle explicitly.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_runtime(config, Handle::current())
    }

    pub fn with_runtime(config: SchedulerConfig, runtime: Handle) -> Self {
        let store = Arc::new(JobStore::new());
        let scheduler = Scheduler::new(config, Arc::clone(&store), runtime);
        Self {
            store,
            registry: KindRegistry::new(),
            scheduler,
        }
    }

    /// Register the compute function for `kind`. Each kind registers once.
    pub fn register_kind(
        &self,
        kind: impl Into<JobKind>,
        compute: impl ComputeFn + 'static,
    ) -> Result<(), JobError> {
        self.registry.register(kind.into(), Arc::new(compute))
    }

    pub fn registered_kinds(&self) -> Vec<JobKind> {
        self.registry.kinds()
    }

    /// Create a queued job and hand it to the scheduler.
    ///
    /// On error no record is left behind.
    pub fn submit_job(&self, kind: impl Into<JobKind>, parameters: Value) -> Result<JobId, JobError> {
        let kind = kind.into();
        let compute = self
            .registry
            .get(&kind)
            .ok_or_else(|| JobError::UnknownKind(kind.clone()))?;

        let job = self.store.create(kind, parameters);
        if let Err(e) = self.scheduler.submit(&job, compute) {
            self.store.discard(&job.id());
            return Err(e);
        }
        info!(job_id = %job.id(), kind = %job.kind(), "job submitted");
        Ok(job.id())
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job, JobError> {
        self.store.get(id)
    }

    /// Request cancellation and return the job as it stands afterwards.
    ///
    /// A queued job is cancelled at once and never starts. A running job only
    /// gets its flag set; it turns `cancelled` when the compute function next
    /// checks. Terminal jobs are returned unchanged.
    pub fn cancel_job(&self, id: &JobId) -> Result<Job, JobError> {
        let job = self.store.update(id, |job| {
            if job.request_cancel() && job.status() == JobStatus::Queued {
                job.cancel()?;
            }
            Ok(job.clone())
        })?;

        match job.status() {
            JobStatus::Cancelled => {
                if self.scheduler.remove_queued(id) {
                    info!(job_id = %id, "queued job cancelled");
                }
            }
            JobStatus::Running => info!(job_id = %id, "cancellation requested"),
            status => debug!(job_id = %id, "cancel on {} job ignored", status),
        }
        Ok(job)
    }

    /// Snapshot listing in submission order.
    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        self.store.list(filter)
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.store.status_counts()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.scheduler.metrics()
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        self.scheduler.config()
    }

    /// Drop terminal jobs that finished before `cutoff`.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let evicted = self.store.evict_finished_before(cutoff);
        if evicted > 0 {
            debug!("evicted {} finished jobs", evicted);
        }
        evicted
    }

    /// Stop accepting jobs, cancel everything still queued and ask running
    /// jobs to stop. Await [`JobService::wait_idle`] to let them wind down.
    pub fn shutdown(&self) {
        let drained = self.scheduler.shutdown();
        for id in &drained {
            if let Err(e) = self.store.update(id, |job| job.cancel()) {
                warn!(job_id = %id, "could not cancel queued job on shutdown: {}", e);
            }
        }

        let running = self.store.list(&JobFilter::status(JobStatus::Running));
        for job in &running {
            // Already-terminal races are fine here.
            let _ = self.store.update(&job.id(), |j| Ok(j.request_cancel()));
        }
        info!(
            "Job service shutting down: {} queued cancelled, {} running asked to stop",
            drained.len(),
            running.len()
        );
    }

    pub fn is_shutting_down(&self) -> bool {
        self.scheduler.is_shutting_down()
    }

    /// Resolves once no job is running or queued.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await
    }
}
