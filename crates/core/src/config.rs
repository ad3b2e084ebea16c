use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub jobs: JobsConfig,
    pub passivbot: PassivbotConfig,
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PBGUI_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PBGUI_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            jobs: JobsConfig::from_env_profiled(p),
            passivbot: PassivbotConfig::from_env_profiled(p),
            supervisor: SupervisorConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  jobs:        max_concurrent={}, per_kind={}, queue_capacity={}",
            self.jobs.max_concurrent_jobs,
            self.jobs
                .max_concurrent_per_kind
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unlimited".to_string()),
            self.jobs.queue_capacity
        );
        tracing::info!(
            "  passivbot:   path={}, python={}, stop_grace={}s",
            self.passivbot.path.display(),
            self.passivbot.python,
            self.passivbot.stop_grace_secs
        );
        tracing::info!(
            "  supervisor:  retention={}s, timeout={}s, interval={}s",
            self.supervisor.retention_secs,
            self.supervisor.timeout_secs,
            self.supervisor.interval_secs
        );
    }

    /// Return a view safe for API responses and the `config` subcommand.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": {
                "host": self.server.host,
                "port": self.server.port,
                "progress_interval_ms": self.server.progress_interval_ms,
            },
            "jobs": {
                "max_concurrent_jobs": self.jobs.max_concurrent_jobs,
                "max_concurrent_per_kind": self.jobs.max_concurrent_per_kind,
                "queue_capacity": self.jobs.queue_capacity,
            },
            "passivbot": {
                "path": self.passivbot.path,
                "python": self.passivbot.python,
                "stop_grace_secs": self.passivbot.stop_grace_secs,
                "installed": self.passivbot.is_installed(),
            },
            "supervisor": {
                "retention_secs": self.supervisor.retention_secs,
                "timeout_secs": self.supervisor.timeout_secs,
                "interval_secs": self.supervisor.interval_secs,
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Milliseconds between snapshots on the job progress WebSocket.
    pub progress_interval_ms: u64,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 8080),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            progress_interval_ms: profiled_env_u64(p, "WS_PROGRESS_INTERVAL_MS", 1000).max(10),
        }
    }

    pub fn progress_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.progress_interval_ms)
    }
}

// ── Jobs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Global bound on running jobs. 0 = available parallelism.
    pub max_concurrent_jobs: usize,
    /// Default bound applied to every kind (unset = only the global bound).
    pub max_concurrent_per_kind: Option<usize>,
    /// Jobs allowed to wait for a slot before `QueueFull`.
    pub queue_capacity: usize,
}

impl JobsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_concurrent_jobs: profiled_env_usize(p, "MAX_CONCURRENT_JOBS", 0),
            max_concurrent_per_kind: profiled_env_opt(p, "MAX_CONCURRENT_PER_KIND")
                .and_then(|v| v.parse::<usize>().ok())
                .map(|n| n.max(1)),
            queue_capacity: profiled_env_usize(p, "JOB_QUEUE_CAPACITY", 64),
        }
    }
}

// ── Passivbot ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassivbotConfig {
    /// Passivbot checkout containing `backtest.py` and `optimize.py`.
    pub path: PathBuf,
    /// Python interpreter used to run the scripts.
    pub python: String,
    /// Seconds a cancelled script gets to exit after SIGTERM.
    pub stop_grace_secs: u64,
}

impl PassivbotConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: PathBuf::from(profiled_env_or(p, "PASSIVBOT_PATH", "/opt/passivbot")),
            python: profiled_env_or(p, "PYTHON_PATH", "python3"),
            stop_grace_secs: profiled_env_u64(p, "PASSIVBOT_STOP_GRACE_SECS", 5),
        }
    }

    pub fn backtest_script(&self) -> PathBuf {
        self.path.join("backtest.py")
    }

    pub fn optimize_script(&self) -> PathBuf {
        self.path.join("optimize.py")
    }

    pub fn is_installed(&self) -> bool {
        self.backtest_script().is_file()
    }
}

// ── Supervisor ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Evict finished jobs older than this many seconds. 0 = keep forever.
    pub retention_secs: u64,
    /// Cancel jobs running longer than this many seconds. 0 = no timeout.
    pub timeout_secs: u64,
    /// Seconds between supervisor sweeps.
    pub interval_secs: u64,
}

impl SupervisorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            retention_secs: profiled_env_u64(p, "JOB_RETENTION_SECS", 0),
            timeout_secs: profiled_env_u64(p, "JOB_TIMEOUT_SECS", 0),
            interval_secs: profiled_env_u64(p, "SUPERVISOR_INTERVAL_SECS", 30).max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.retention_secs > 0 || self.timeout_secs > 0
    }
}
