//! In-memory job repository.
//!
//! The index lock is held only long enough to look up, insert or remove a
//! record handle; each record sits behind its own mutex so mutations are
//! serialized per job id and never contend across jobs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::JobError;
use crate::job::{Job, JobFilter, JobId, JobKind, JobStatus};

type Record = Arc<Mutex<Job>>;

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Concurrency-safe mapping from job id to job record.
#[derive(Debug, Default)]
pub struct JobStore {
    records: RwLock<IndexMap<JobId, Record>>,
}

fn lock(record: &Record) -> MutexGuard<'_, Job> {
    // `update` replaces records whole, so a poisoned lock still guards a consistent job.
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh queued job and return its snapshot.
    pub fn create(&self, kind: JobKind, parameters: Value) -> Job {
        let job = Job::new(kind, parameters);
        let snapshot = job.clone();
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id(), Arc::new(Mutex::new(job)));
        snapshot
    }

    pub fn get(&self, id: &JobId) -> Result<Job, JobError> {
        let record = self.record(id)?;
        let job = lock(&record).clone();
        Ok(job)
    }

    /// Apply `mutator` atomically to one job.
    ///
    /// The mutator works on a draft; the draft replaces the stored record only
    /// if the mutator returns `Ok`, so a rejected transition leaves no trace.
    pub fn update<T>(
        &self,
        id: &JobId,
        mutator: impl FnOnce(&mut Job) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        let record = self.record(id)?;
        let mut guard = lock(&record);
        let mut draft = guard.clone();
        let out = mutator(&mut draft)?;
        *guard = draft;
        Ok(out)
    }

    /// Read one job in place, without taking a snapshot.
    pub fn read<T>(&self, id: &JobId, f: impl FnOnce(&Job) -> T) -> Result<T, JobError> {
        let record = self.record(id)?;
        let job = lock(&record);
        Ok(f(&job))
    }

    /// Apply a single validating transition in place.
    ///
    /// No draft is taken, so `transition` must leave the job unchanged when it
    /// fails. Each `Job` transition method checks before it writes; compound
    /// mutations go through [`JobStore::update`].
    pub(crate) fn apply<T>(
        &self,
        id: &JobId,
        transition: impl FnOnce(&mut Job) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        let record = self.record(id)?;
        let mut guard = lock(&record);
        transition(&mut guard)
    }

    /// Snapshot listing in insertion order.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.handles()
            .iter()
            .map(|record| lock(record).clone())
            .filter(|job| filter.matches(job))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.handles() {
            counts.add(lock(&record).status());
        }
        counts
    }

    /// Remove terminal jobs that finished before `cutoff`. Returns how many
    /// were evicted. The core never calls this; retention belongs to the caller.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let expired = |record: &Record| {
            let job = lock(record);
            job.is_terminal() && job.completed_at().is_some_and(|t| t < cutoff)
        };

        let candidates: Vec<JobId> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, record)| expired(record))
            .map(|(id, _)| *id)
            .collect();

        // Terminal states are sticky, so a candidate can only have vanished.
        let mut evicted = 0;
        for id in candidates {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            if records.get(&id).is_some_and(|record| expired(record)) {
                records.shift_remove(&id);
                evicted += 1;
            }
        }
        evicted
    }

    /// Drop a record whose submission was rejected.
    pub(crate) fn discard(&self, id: &JobId) -> Option<Job> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(id)
            .map(|record| lock(&record).clone())
    }

    fn record(&self, id: &JobId) -> Result<Record, JobError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or(JobError::NotFound(*id))
    }

    fn handles(&self) -> Vec<Record> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
