use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::job::{Job, JobId};
use crate::scheduler::admission::{AdmissionState, QueuedJob};
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::types::SchedulerConfig;
use crate::store::JobStore;
use crate::task::ComputeFn;

/// Admits queued jobs in creation order while keeping the number of running
/// jobs within the global and per-kind bounds.
///
/// Cheap to clone; clones share the same queues and workers.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) inner: Arc<Shared>,
}

pub(super) struct Shared {
    /// Config with `max_concurrent_jobs` already resolved.
    pub(super) config: SchedulerConfig,
    pub(super) store: Arc<JobStore>,
    pub(super) state: Mutex<AdmissionState>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    /// Woken whenever the scheduler may have become idle.
    pub(super) idle: Notify,
    pub(super) runtime: Handle,
}

impl Scheduler {
    /// Create a scheduler whose workers run on `runtime`.
    pub fn new(mut config: SchedulerConfig, store: Arc<JobStore>, runtime: Handle) -> Self {
        config.max_concurrent_jobs = config.resolved_max_concurrent();
        info!(
            "Scheduler starting: max_concurrent_jobs={}, per_kind={:?}, queue_capacity={}",
            config.max_concurrent_jobs, config.max_concurrent_per_kind, config.queue_capacity
        );
        Self {
            inner: Arc::new(Shared {
                config,
                store,
                state: Mutex::new(AdmissionState::default()),
                metrics: RwLock::new(SchedulerMetrics::default()),
                idle: Notify::new(),
                runtime,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue a freshly created job and admit whatever now fits.
    ///
    /// Fails with `QueueFull` when the job can neither start nor wait; the
    /// caller owns the record and must discard it.
    pub fn submit(&self, job: &Job, compute: Arc<dyn ComputeFn>) -> Result<(), JobError> {
        let admitted = {
            let mut state = self.inner.lock_state();
            if state.shutting_down {
                return Err(JobError::ShuttingDown);
            }
            state.enqueue(job.id(), job.kind().clone(), job.created_at(), compute);
            let admitted = self.inner.admit_ready(&mut state);

            // Admitting anything frees a queue slot, so an overflow here
            // means the new job is still queued.
            let capacity = self.inner.config.queue_capacity;
            if state.queued_len() > capacity {
                state.remove(&job.id());
                drop(state);
                self.inner.write_metrics().rejected_queue_full += 1;
                warn!(job_id = %job.id(), kind = %job.kind(), "rejected: queue full ({})", capacity);
                return Err(JobError::QueueFull { capacity });
            }
            admitted
        };

        debug!(job_id = %job.id(), kind = %job.kind(), "submitted");
        for queued in admitted {
            self.inner.dispatch(queued);
        }
        Ok(())
    }

    /// Remove a job that has not been admitted yet. Returns whether it was queued.
    pub fn remove_queued(&self, id: &JobId) -> bool {
        let mut state = self.inner.lock_state();
        let removed = state.remove(id).is_some();
        if removed && state.is_idle() {
            self.inner.idle.notify_waiters();
        }
        removed
    }

    /// Stop accepting submissions and hand back every job still waiting.
    ///
    /// Running jobs are left to finish; the returned jobs will never be admitted.
    pub fn shutdown(&self) -> Vec<JobId> {
        let mut state = self.inner.lock_state();
        state.shutting_down = true;
        let drained: Vec<JobId> = state.drain().into_iter().map(|q| q.id).collect();
        info!(
            "Scheduler shutdown requested: {} queued dropped, {} running",
            drained.len(),
            state.running()
        );
        if state.is_idle() {
            self.inner.idle.notify_waiters();
        }
        drained
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock_state().shutting_down
    }

    /// No job running and none waiting.
    pub fn is_idle(&self) -> bool {
        self.inner.lock_state().is_idle()
    }

    /// Resolves once nothing is running or queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Snapshot of the scheduler metrics, including current occupancy.
    pub fn metrics(&self) -> SchedulerMetrics {
        let (running, queued) = {
            let state = self.inner.lock_state();
            (state.running(), state.queued_len())
        };
        let mut snapshot = self
            .inner
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.running = running;
        snapshot.queued = queued;
        snapshot.max_concurrent_jobs = self.inner.config.max_concurrent_jobs;
        snapshot
    }
}

impl Shared {
    pub(super) fn lock_state(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn write_metrics(&self) -> RwLockWriteGuard<'_, SchedulerMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move every job that fits to `running` in the store.
    ///
    /// Jobs whose record refuses admission (cancelled or evicted while
    /// queued) give their slot straight back.
    pub(super) fn admit_ready(&self, state: &mut AdmissionState) -> Vec<QueuedJob> {
        let mut ready = Vec::new();
        while let Some(queued) = state.next_admissible(&self.config) {
            match self.store.update(&queued.id, |job| job.admit()) {
                Ok(()) => {
                    debug!(job_id = %queued.id, kind = %queued.kind, "admitted");
                    ready.push(queued);
                }
                Err(e) => {
                    debug!(job_id = %queued.id, "skipped at admission: {}", e);
                    state.release(&queued.kind);
                }
            }
        }
        ready
    }
}
