//! Job record, identifiers and the lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobError;

/// Opaque, unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Category of job; selects the compute function that runs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub const BACKTEST: &'static str = "backtest";
    pub const OPTIMIZE: &'static str = "optimize";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn backtest() -> Self {
        Self::new(Self::BACKTEST)
    }

    pub fn optimize() -> Self {
        Self::new(Self::OPTIMIZE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a job.
///
/// `Queued` and `Running` are non-terminal; the rest accept no transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of an execution failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One submitted unit of work.
///
/// Fields are read through accessors; mutation goes through the transition
/// methods, each of which validates against the state machine first.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    id: JobId,
    kind: JobKind,
    status: JobStatus,
    /// `None` until admitted.
    progress: Option<f64>,
    parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JobFailure>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancel_requested: bool,
}

impl Job {
    pub(crate) fn new(kind: JobKind, parameters: Value) -> Self {
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Queued,
            progress: None,
            parameters,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel_requested: false,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> Option<f64> {
        self.progress
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `queued -> running`.
    pub fn admit(&mut self) -> Result<(), JobError> {
        if self.status != JobStatus::Queued {
            return Err(self.illegal(JobStatus::Running));
        }
        self.started_at = Some(self.stamp());
        self.status = JobStatus::Running;
        self.progress = Some(0.0);
        Ok(())
    }

    /// Record progress while running. Values are clamped to `[0, 100]`;
    /// a value below the current progress is rejected. Returns the stored value.
    pub fn report_progress(&mut self, value: f64) -> Result<f64, JobError> {
        if self.status != JobStatus::Running {
            return Err(self.illegal(JobStatus::Running));
        }
        if value.is_nan() {
            return Err(JobError::InvalidProgress(value));
        }
        let value = value.clamp(0.0, 100.0);
        let current = self.progress.unwrap_or(0.0);
        if value < current {
            return Err(JobError::ProgressRegression {
                current,
                reported: value,
            });
        }
        self.progress = Some(value);
        Ok(value)
    }

    /// `running -> completed`.
    pub fn complete(&mut self, result: Value) -> Result<(), JobError> {
        self.check(JobStatus::Completed)?;
        self.completed_at = Some(self.stamp());
        self.status = JobStatus::Completed;
        self.progress = Some(100.0);
        self.result = Some(result);
        Ok(())
    }

    /// `running -> failed`.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), JobError> {
        self.check(JobStatus::Failed)?;
        self.completed_at = Some(self.stamp());
        self.status = JobStatus::Failed;
        self.error = Some(failure);
        Ok(())
    }

    /// `queued|running -> cancelled`. Partial results are never kept.
    pub fn cancel(&mut self) -> Result<(), JobError> {
        self.check(JobStatus::Cancelled)?;
        self.completed_at = Some(self.stamp());
        self.status = JobStatus::Cancelled;
        self.cancel_requested = true;
        self.result = None;
        self.error = None;
        Ok(())
    }

    /// Flag the job for cooperative cancellation. No-op on terminal jobs;
    /// returns whether the flag is now set.
    pub fn request_cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        true
    }

    fn check(&self, to: JobStatus) -> Result<(), JobError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(self.illegal(to))
        }
    }

    fn illegal(&self, to: JobStatus) -> JobError {
        JobError::IllegalTransition {
            from: self.status,
            to,
        }
    }

    /// Current time, never earlier than a timestamp already recorded.
    fn stamp(&self) -> DateTime<Utc> {
        let floor = self.started_at.unwrap_or(self.created_at);
        Utc::now().max(floor)
    }
}

/// Optional listing filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub kind: Option<JobKind>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn kind(kind: impl Into<JobKind>) -> Self {
        Self {
            kind: Some(kind.into()),
            status: None,
        }
    }

    pub fn status(status: JobStatus) -> Self {
        Self {
            kind: None,
            status: Some(status),
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.kind.as_ref().map_or(true, |k| k == job.kind())
            && self.status.map_or(true, |s| s == job.status())
    }
}
