//! Bounded-concurrency job scheduler.
//!
//! Split into focused submodules:
//! - `admission`: per-kind queues and slot accounting
//! - `core`: Scheduler struct, submission, removal, shutdown and idle tracking
//! - `execution`: dispatch onto blocking workers and slot release
//! - `metrics`, `types`: counters and configuration

mod admission;
mod core;
mod execution;
pub mod metrics;
pub mod types;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;
pub use metrics::{OutcomeCounts, SchedulerMetrics};
pub use types::SchedulerConfig;
