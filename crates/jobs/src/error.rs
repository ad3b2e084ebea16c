//! Job error types.

use thiserror::Error;

use crate::job::{JobId, JobKind, JobStatus};

/// Errors surfaced by the store, scheduler and service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("no compute function registered for kind '{0}'")]
    UnknownKind(JobKind),

    #[error("compute function already registered for kind '{0}'")]
    DuplicateKind(JobKind),

    #[error("job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("progress would regress from {current} to {reported}")]
    ProgressRegression { current: f64, reported: f64 },

    #[error("invalid progress value: {0}")]
    InvalidProgress(f64),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

impl JobError {
    /// A write that lost the race against an earlier terminal transition.
    ///
    /// Expected under cooperative cancellation; callers drop it quietly.
    pub fn is_terminal_race(&self) -> bool {
        matches!(self, JobError::IllegalTransition { from, .. } if from.is_terminal())
    }
}

/// Error returned by a compute function.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("{0}")]
    Failed(String),

    /// Stopped in response to a cancel request. Without one, the job fails.
    #[error("cancelled")]
    Cancelled,
}

impl ComputeError {
    pub fn failed(message: impl Into<String>) -> Self {
        ComputeError::Failed(message.into())
    }
}

impl From<std::io::Error> for ComputeError {
    fn from(e: std::io::Error) -> Self {
        ComputeError::Failed(format!("I/O error: {e}"))
    }
}

impl From<serde_json::Error> for ComputeError {
    fn from(e: serde_json::Error) -> Self {
        ComputeError::Failed(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_race_only_for_terminal_sources() {
        let race = JobError::IllegalTransition {
            from: JobStatus::Cancelled,
            to: JobStatus::Completed,
        };
        assert!(race.is_terminal_race());

        let bug = JobError::IllegalTransition {
            from: JobStatus::Queued,
            to: JobStatus::Completed,
        };
        assert!(!bug.is_terminal_race());
        assert!(!JobError::ShuttingDown.is_terminal_race());
    }

    #[test]
    fn display_messages() {
        let e = JobError::UnknownKind(JobKind::from("walkforward"));
        assert_eq!(e.to_string(), "no compute function registered for kind 'walkforward'");

        let e = JobError::QueueFull { capacity: 4 };
        assert_eq!(e.to_string(), "job queue is full (capacity 4)");

        let e = JobError::IllegalTransition {
            from: JobStatus::Failed,
            to: JobStatus::Running,
        };
        assert_eq!(e.to_string(), "illegal transition failed -> running");
    }

    #[test]
    fn io_errors_become_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "backtest.py");
        let e: ComputeError = io.into();
        assert!(matches!(e, ComputeError::Failed(ref m) if m.contains("backtest.py")));
    }
}
