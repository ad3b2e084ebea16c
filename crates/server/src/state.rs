use std::sync::Arc;

use chrono::{DateTime, Utc};

use pbgui_core::config::JobsConfig;
use pbgui_core::Config;
use pbgui_jobs::{JobService, SchedulerConfig};

pub struct AppState {
    pub jobs: Arc<JobService>,
    pub config: Config,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(jobs: Arc<JobService>, config: Config) -> Self {
        Self {
            jobs,
            config,
            started_at: Utc::now(),
        }
    }
}

/// Scheduler settings from the `jobs` config section.
pub fn scheduler_config(jobs: &JobsConfig) -> SchedulerConfig {
    let mut config = SchedulerConfig::default()
        .with_max_concurrent(jobs.max_concurrent_jobs)
        .with_queue_capacity(jobs.queue_capacity);
    if let Some(n) = jobs.max_concurrent_per_kind {
        config = config.with_per_kind_limit(n);
    }
    config
}
