mod api;
mod background;
mod cli;
mod kinds;
mod router;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use pbgui_core::Config;
use pbgui_jobs::JobService;

use crate::cli::{Cli, Command, ServeArgs};
use crate::state::AppState;

fn load_config() -> Config {
    pbgui_core::config::load_dotenv();
    Config::from_env()
}

async fn serve(config: Config, shutdown_timeout: Duration) -> anyhow::Result<()> {
    config.log_summary();

    let jobs = Arc::new(JobService::new(state::scheduler_config(&config.jobs)));
    kinds::register_passivbot_kinds(&jobs, &config.passivbot)
        .context("failed to register job kinds")?;

    let supervisor = background::spawn_supervisor(Arc::clone(&jobs), config.supervisor.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = router::build_router(Arc::new(AppState::new(Arc::clone(&jobs), config)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown();
    if let Some(handle) = supervisor {
        handle.abort();
    }
    if tokio::time::timeout(shutdown_timeout, jobs.wait_idle()).await.is_err() {
        warn!(
            "Jobs still running after {}s; exiting anyway",
            shutdown_timeout.as_secs()
        );
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining jobs...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = load_config();

    match cli.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
        }
        Command::Serve(args) => {
            args.apply(&mut config);
            serve(config, Duration::from_secs(args.shutdown_timeout)).await?;
        }
    }

    Ok(())
}
