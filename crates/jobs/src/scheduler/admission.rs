use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::job::{JobId, JobKind};
use crate::scheduler::types::SchedulerConfig;
use crate::task::ComputeFn;

/// A job waiting for a slot.
pub(crate) struct QueuedJob {
    pub(crate) id: JobId,
    pub(crate) kind: JobKind,
    pub(crate) created_at: DateTime<Utc>,
    /// Submission order; breaks `created_at` ties.
    pub(crate) seq: u64,
    pub(crate) compute: Arc<dyn ComputeFn>,
}

impl QueuedJob {
    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}

/// Per-kind FIFO queues plus running-slot accounting.
///
/// Admission picks, among the kinds that still have a free slot, the queue
/// head with the oldest `(created_at, seq)`. The result depends only on the
/// queue contents and running counts, never on map iteration order.
#[derive(Default)]
pub(crate) struct AdmissionState {
    queues: BTreeMap<JobKind, VecDeque<QueuedJob>>,
    running_total: usize,
    running_by_kind: HashMap<JobKind, usize>,
    next_seq: u64,
    pub(crate) shutting_down: bool,
}

impl AdmissionState {
    pub(crate) fn enqueue(
        &mut self,
        id: JobId,
        kind: JobKind,
        created_at: DateTime<Utc>,
        compute: Arc<dyn ComputeFn>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queues.entry(kind.clone()).or_default().push_back(QueuedJob {
            id,
            kind,
            created_at,
            seq,
            compute,
        });
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub(crate) fn running(&self) -> usize {
        self.running_total
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.running_total == 0 && self.queued_len() == 0
    }

    fn running_for(&self, kind: &JobKind) -> usize {
        self.running_by_kind.get(kind).copied().unwrap_or(0)
    }

    /// Pop the oldest queued job that fits under the limits and count it as running.
    pub(crate) fn next_admissible(&mut self, config: &SchedulerConfig) -> Option<QueuedJob> {
        if self.running_total >= config.resolved_max_concurrent() {
            return None;
        }

        let kind = self
            .queues
            .iter()
            .filter(|(kind, _)| self.running_for(kind) < config.limit_for(kind))
            .filter_map(|(kind, queue)| queue.front().map(|head| (kind, head.order_key())))
            .min_by_key(|(_, key)| *key)
            .map(|(kind, _)| kind.clone())?;

        let queue = self.queues.get_mut(&kind)?;
        let job = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(&kind);
        }

        self.running_total += 1;
        *self.running_by_kind.entry(kind).or_default() += 1;
        Some(job)
    }

    /// Free a running slot.
    pub(crate) fn release(&mut self, kind: &JobKind) {
        self.running_total = self.running_total.saturating_sub(1);
        if let Some(n) = self.running_by_kind.get_mut(kind) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.running_by_kind.remove(kind);
            }
        }
    }

    /// Take a specific job out of its queue.
    pub(crate) fn remove(&mut self, id: &JobId) -> Option<QueuedJob> {
        let (kind, index) = self.queues.iter().find_map(|(kind, queue)| {
            queue.iter().position(|j| &j.id == id).map(|i| (kind.clone(), i))
        })?;
        let queue = self.queues.get_mut(&kind)?;
        let job = queue.remove(index);
        if queue.is_empty() {
            self.queues.remove(&kind);
        }
        job
    }

    /// Empty every queue, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<QueuedJob> {
        let mut all: Vec<QueuedJob> = std::mem::take(&mut self.queues)
            .into_values()
            .flatten()
            .collect();
        all.sort_by_key(QueuedJob::order_key);
        all
    }
}
