//! Built-in job kinds backed by passivbot scripts.

use std::time::Duration;

use pbgui_core::config::PassivbotConfig;
use pbgui_jobs::{CommandJob, JobError, JobKind, JobService};
use tracing::{info, warn};

fn passivbot_job(passivbot: &PassivbotConfig, script: std::path::PathBuf) -> CommandJob {
    CommandJob::new(&passivbot.python)
        .arg(script)
        .working_dir(&passivbot.path)
        .config_dir(std::env::temp_dir().join("pbgui-configs"))
        .grace_period(Duration::from_secs(passivbot.stop_grace_secs))
}

/// Register `backtest` and `optimize`.
pub fn register_passivbot_kinds(
    jobs: &JobService,
    passivbot: &PassivbotConfig,
) -> Result<(), JobError> {
    jobs.register_kind(
        JobKind::backtest(),
        passivbot_job(passivbot, passivbot.backtest_script()),
    )?;
    jobs.register_kind(
        JobKind::optimize(),
        passivbot_job(passivbot, passivbot.optimize_script()),
    )?;

    if passivbot.is_installed() {
        info!("passivbot found at {}", passivbot.path.display());
    } else {
        warn!(
            "passivbot not found at {}; backtest and optimize jobs will fail until PASSIVBOT_PATH is set",
            passivbot.path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pbgui_jobs::SchedulerConfig;

    use super::*;

    #[tokio::test]
    async fn registers_both_kinds_once() {
        let jobs = JobService::new(SchedulerConfig::default());
        let passivbot = PassivbotConfig {
            path: PathBuf::from("/nonexistent/passivbot"),
            python: "python3".to_string(),
            stop_grace_secs: 5,
        };

        register_passivbot_kinds(&jobs, &passivbot).unwrap();
        assert_eq!(
            jobs.registered_kinds(),
            vec![JobKind::backtest(), JobKind::optimize()]
        );
        assert!(matches!(
            register_passivbot_kinds(&jobs, &passivbot),
            Err(JobError::DuplicateKind(_))
        ));
    }
}
