//! CLI argument parsing.

use clap::{Args, Parser, Subcommand};

use pbgui_core::Config;

/// Job execution backend for backtest and optimize runs.
#[derive(Parser, Debug)]
#[command(name = "pbgui-server", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default).
    Serve(ServeArgs),
    /// Print the resolved configuration and exit.
    Config,
}

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind address; overrides HOST.
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port; overrides PORT.
    #[arg(long)]
    pub port: Option<u16>,

    /// Global job concurrency; overrides MAX_CONCURRENT_JOBS.
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// Seconds to wait for running jobs on shutdown.
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            max_concurrent_jobs: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl ServeArgs {
    /// Apply command-line overrides on top of the environment config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(n) = self.max_concurrent_jobs {
            config.jobs.max_concurrent_jobs = n;
        }
    }
}
