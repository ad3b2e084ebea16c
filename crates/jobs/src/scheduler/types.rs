use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job::JobKind;

/// Scheduler configuration, typically built from environment config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global bound on running jobs. 0 = available parallelism.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Bound applied to every kind without an explicit entry in `kind_limits`.
    #[serde(default)]
    pub max_concurrent_per_kind: Option<usize>,
    /// Per-kind overrides, keyed by kind name.
    #[serde(default)]
    pub kind_limits: HashMap<String, usize>,
    /// Jobs allowed to wait for a slot before submissions fail with `QueueFull`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_concurrent_jobs() -> usize { 0 }
fn default_queue_capacity() -> usize { 64 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_concurrent_per_kind: None,
            kind_limits: HashMap::new(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve the global bound (0 means use available parallelism).
    pub fn resolved_max_concurrent(&self) -> usize {
        if self.max_concurrent_jobs == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent_jobs
        }
    }

    /// Concurrency bound for one kind; never above the global bound.
    ///
    /// A configured limit of 0 counts as 1, so every kind can make progress.
    pub fn limit_for(&self, kind: &JobKind) -> usize {
        let global = self.resolved_max_concurrent();
        self.kind_limits
            .get(kind.as_str())
            .copied()
            .or(self.max_concurrent_per_kind)
            .map_or(global, |limit| limit.clamp(1, global))
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = n;
        self
    }

    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn with_per_kind_limit(mut self, n: usize) -> Self {
        self.max_concurrent_per_kind = Some(n);
        self
    }

    pub fn with_kind_limit(mut self, kind: impl Into<String>, n: usize) -> Self {
        self.kind_limits.insert(kind.into(), n);
        self
    }
}
