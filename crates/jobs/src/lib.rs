//! Asynchronous job execution for long-running backtest and optimize runs.
//!
//! Callers register a [`ComputeFn`] per job kind, submit jobs through
//! [`JobService`], and poll snapshots until a terminal state. The
//! [`scheduler`] bounds how many jobs run at once; excess submissions queue
//! up to a fixed capacity and are admitted oldest-first.

pub mod command;
pub mod error;
pub mod job;
pub mod registry;
mod runner;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod task;

pub use command::CommandJob;
pub use error::{ComputeError, JobError};
pub use job::{Job, JobFailure, JobFilter, JobId, JobKind, JobStatus};
pub use scheduler::{SchedulerConfig, SchedulerMetrics};
pub use service::JobService;
pub use store::{JobStore, StatusCounts};
pub use task::{ComputeFn, JobContext};
