use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::JobStatus;

/// Terminal outcomes for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Scheduler operational metrics exposed to the API layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Finished jobs by kind and outcome.
    pub jobs_finished: HashMap<String, OutcomeCounts>,
    /// Average run duration (admission to terminal state) by kind.
    pub avg_run_duration: HashMap<String, Duration>,
    /// Last finish time by kind.
    pub last_finished: HashMap<String, DateTime<Utc>>,
    /// Submissions rejected with `QueueFull`.
    pub rejected_queue_full: u64,
    /// Jobs currently running.
    pub running: usize,
    /// Jobs currently waiting for a slot.
    pub queued: usize,
    /// Resolved global concurrency bound.
    pub max_concurrent_jobs: usize,
}

impl SchedulerMetrics {
    /// Record a finished job.
    pub fn record_finish(&mut self, kind: &str, status: JobStatus, duration: Duration) {
        let counts = self.jobs_finished.entry(kind.to_string()).or_default();
        match status {
            JobStatus::Completed => counts.completed += 1,
            JobStatus::Failed => counts.failed += 1,
            JobStatus::Cancelled => counts.cancelled += 1,
            JobStatus::Queued | JobStatus::Running => return,
        }
        let count = counts.completed + counts.failed + counts.cancelled;
        self.last_finished.insert(kind.to_string(), Utc::now());

        let prev_avg = self.avg_run_duration.get(kind).copied().unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_run_duration.insert(kind.to_string(), new_avg);
    }

    pub fn total_finished(&self) -> u64 {
        self.jobs_finished
            .values()
            .map(|c| c.completed + c.failed + c.cancelled)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_finish() {
        let mut m = SchedulerMetrics::default();
        m.record_finish("backtest", JobStatus::Completed, Duration::from_millis(100));

        assert_eq!(m.jobs_finished["backtest"].completed, 1);
        assert!(m.last_finished.contains_key("backtest"));
        assert_eq!(m.avg_run_duration["backtest"], Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_finishes_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_finish("optimize", JobStatus::Completed, Duration::from_millis(100));
        m.record_finish("optimize", JobStatus::Failed, Duration::from_millis(200));

        assert_eq!(m.jobs_finished["optimize"].completed, 1);
        assert_eq!(m.jobs_finished["optimize"].failed, 1);
        // Average of 100ms and 200ms = 150ms
        let avg = m.avg_run_duration["optimize"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
        assert_eq!(m.total_finished(), 2);
    }

    #[test]
    fn non_terminal_status_is_ignored() {
        let mut m = SchedulerMetrics::default();
        m.record_finish("backtest", JobStatus::Running, Duration::from_millis(5));
        assert_eq!(m.total_finished(), 0);
        assert!(m.avg_run_duration.is_empty());
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.running, 0);
        assert_eq!(m.queued, 0);
        assert_eq!(m.rejected_queue_full, 0);
        assert!(m.jobs_finished.is_empty());
    }
}
