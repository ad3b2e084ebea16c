//! Compute function that runs an external program per job.
//!
//! The job parameters are written to `<config_dir>/<job_id>.json` and the
//! program is started as `<program> <args...> --config <file>`. Stdout is
//! read line by line: `PROGRESS <n>` lines become progress reports and the
//! last line holding a JSON object or array becomes the result. Without one,
//! the result is `{"output": <stdout tail>}`.
//!
//! On cancellation the program gets SIGTERM and a grace period to exit before
//! it is killed.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::ComputeError;
use crate::job::JobId;
use crate::task::{ComputeFn, JobContext};

/// Lines of stdout/stderr kept for results and failure messages.
pub const OUTPUT_TAIL_LINES: usize = 20;

const PROGRESS_PREFIX: &str = "PROGRESS";

/// How long a cancelled program may take to exit after SIGTERM.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CommandJob {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    config_dir: PathBuf,
    poll_interval: Duration,
    grace_period: Duration,
}

impl CommandJob {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            config_dir: std::env::temp_dir().join("pbgui-jobs"),
            poll_interval: Duration::from_millis(200),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Directory for the per-job parameter files.
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// How often cancellation is checked while the program is silent.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Time allowed between SIGTERM and SIGKILL on cancellation.
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn write_config(&self, job_id: JobId, parameters: &Value) -> Result<PathBuf, ComputeError> {
        fs::create_dir_all(&self.config_dir)?;
        let path = self.config_dir.join(format!("{job_id}.json"));
        fs::write(&path, serde_json::to_vec(parameters)?)?;
        Ok(path)
    }

    fn spawn(&self, config_path: &Path) -> Result<Child, ComputeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--config")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn().map_err(|e| {
            ComputeError::failed(format!("failed to start {}: {e}", self.program.display()))
        })
    }

    fn execute(&self, config_path: &Path, ctx: &JobContext) -> Result<Value, ComputeError> {
        let mut child = self.spawn(config_path)?;
        debug!(job_id = %ctx.job_id(), pid = child.id(), "started {}", self.program.display());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ComputeError::failed("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ComputeError::failed("child stderr was not captured"))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr_tail = thread::spawn(move || tail(stderr));

        let mut output = StdoutTracker::default();
        let mut stdout_open = true;
        let status = loop {
            if stdout_open {
                match rx.recv_timeout(self.poll_interval) {
                    Ok(line) => output.push(line, ctx),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => stdout_open = false,
                }
            } else if let Some(status) = child.try_wait()? {
                break status;
            } else {
                thread::sleep(self.poll_interval);
            }
            if ctx.is_cancelled() {
                self.stop(&mut child, ctx);
                return Err(ComputeError::Cancelled);
            }
        };

        if !status.success() {
            let stderr = stderr_tail.join().unwrap_or_default();
            return Err(ComputeError::failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.join("\n")
            )));
        }
        Ok(output.into_result())
    }

    /// SIGTERM, then SIGKILL once the grace period runs out.
    fn stop(&self, child: &mut Child, ctx: &JobContext) {
        info!(job_id = %ctx.job_id(), pid = child.id(), "stopping {} after cancellation", self.program.display());
        if terminate(child) && self.wait_for_exit(child) {
            debug!(job_id = %ctx.job_id(), "{} exited after SIGTERM", self.program.display());
            return;
        }
        if let Err(e) = child.kill() {
            warn!(job_id = %ctx.job_id(), "kill failed: {}", e);
        }
        warn!(job_id = %ctx.job_id(), "force killed {}", self.program.display());
        let _ = child.wait();
    }

    fn wait_for_exit(&self, child: &mut Child) -> bool {
        let deadline = Instant::now() + self.grace_period;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(_) => return false,
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

/// Ask the child to exit. Returns whether the signal was sent.
#[cfg(unix)]
fn terminate(child: &Child) -> bool {
    Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

#[cfg(not(unix))]
fn terminate(_child: &Child) -> bool {
    false
}

impl ComputeFn for CommandJob {
    fn run(&self, parameters: &Value, ctx: &JobContext) -> Result<Value, ComputeError> {
        let config_path = self.write_config(ctx.job_id(), parameters)?;
        let outcome = self.execute(&config_path, ctx);
        if let Err(e) = fs::remove_file(&config_path) {
            debug!(job_id = %ctx.job_id(), "could not remove {}: {}", config_path.display(), e);
        }
        outcome
    }
}

#[derive(Default)]
struct StdoutTracker {
    tail: VecDeque<String>,
    last_json: Option<Value>,
}

impl StdoutTracker {
    fn push(&mut self, line: String, ctx: &JobContext) {
        if let Some(progress) = parse_progress(&line) {
            ctx.report_progress(progress);
            return;
        }
        if let Ok(value @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(line.trim()) {
            self.last_json = Some(value);
        }
        if self.tail.len() == OUTPUT_TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }

    fn into_result(self) -> Value {
        match self.last_json {
            Some(value) => value,
            None => json!({ "output": Vec::from(self.tail).join("\n") }),
        }
    }
}

fn parse_progress(line: &str) -> Option<f64> {
    line.trim()
        .strip_prefix(PROGRESS_PREFIX)?
        .trim()
        .parse()
        .ok()
}

fn tail(stream: impl Read) -> Vec<String> {
    let mut lines = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
    for line in BufReader::new(stream).lines().map_while(Result::ok) {
        if lines.len() == OUTPUT_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }
    lines.into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::job::{JobKind, JobStatus};
    use crate::store::JobStore;

    #[test]
    fn progress_lines() {
        assert_eq!(parse_progress("PROGRESS 42.5"), Some(42.5));
        assert_eq!(parse_progress("  PROGRESS 7  "), Some(7.0));
        assert_eq!(parse_progress("PROGRESS soon"), None);
        assert_eq!(parse_progress("progress 10"), None);
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn running(store: &Arc<JobStore>, params: Value) -> (JobContext, Value) {
            let job = store.create(JobKind::backtest(), params.clone());
            store.update(&job.id(), |j| j.admit()).unwrap();
            (JobContext::new(job.id(), JobKind::backtest(), Arc::clone(store)), params)
        }

        fn script(body: &str, dir: &Path) -> CommandJob {
            CommandJob::new("sh")
                .arg("-c")
                .arg(body)
                .arg("sh")
                .config_dir(dir)
                .poll_interval(Duration::from_millis(20))
        }

        fn scratch_dir() -> PathBuf {
            std::env::temp_dir().join(format!("pbgui-jobs-test-{}", JobId::new()))
        }

        #[test]
        fn json_line_becomes_result_and_progress_is_reported() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({"symbol": "BTCUSDT", "days": 30}));
            let dir = scratch_dir();
            // "$1" is --config, "$2" the parameter file.
            let job = script(r#"echo "PROGRESS 40"; echo "PROGRESS 80"; cat "$2"; echo"#, &dir);

            let result = job.run(&params, &ctx).unwrap();
            assert_eq!(result, params);
            assert_eq!(store.get(&ctx.job_id()).unwrap().progress(), Some(80.0));
            assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
            let _ = fs::remove_dir_all(&dir);
        }

        #[test]
        fn plain_output_falls_back_to_tail() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({}));
            let dir = scratch_dir();
            let job = script("echo hello; echo world", &dir);

            let result = job.run(&params, &ctx).unwrap();
            assert_eq!(result, json!({"output": "hello\nworld"}));
            let _ = fs::remove_dir_all(&dir);
        }

        #[test]
        fn non_zero_exit_fails_with_stderr() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({}));
            let dir = scratch_dir();
            let job = script("echo 'bad symbol' >&2; exit 3", &dir);

            match job.run(&params, &ctx) {
                Err(ComputeError::Failed(message)) => {
                    assert!(message.contains("bad symbol"), "{message}");
                    assert!(message.contains('3'), "{message}");
                }
                other => panic!("expected failure, got {other:?}"),
            }
            let _ = fs::remove_dir_all(&dir);
        }

        #[test]
        fn missing_program_fails() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({}));
            let dir = scratch_dir();
            let job = CommandJob::new("/nonexistent/pbgui-test-binary").config_dir(&dir);

            let err = job.run(&params, &ctx).unwrap_err();
            assert!(err.to_string().contains("failed to start"));
            let _ = fs::remove_dir_all(&dir);
        }

        fn cancel_after(store: &Arc<JobStore>, id: JobId, delay: Duration) -> thread::JoinHandle<()> {
            let store = Arc::clone(store);
            thread::spawn(move || {
                thread::sleep(delay);
                store.update(&id, |j| Ok(j.request_cancel())).unwrap();
            })
        }

        #[test]
        fn cancellation_reaches_child_with_closed_stdout() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({}));
            let dir = scratch_dir();
            let job = script("exec >&-; sleep 30", &dir);

            let id = ctx.job_id();
            let canceller = cancel_after(&store, id, Duration::from_millis(300));
            let started = Instant::now();
            let outcome = job.run(&params, &ctx);
            canceller.join().unwrap();

            assert!(matches!(outcome, Err(ComputeError::Cancelled)), "{outcome:?}");
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(store.get(&id).unwrap().status(), JobStatus::Cancelled);
            let _ = fs::remove_dir_all(&dir);
        }

        #[test]
        fn cancellation_lets_child_handle_sigterm() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({}));
            let dir = scratch_dir();
            // "$2" is the parameter file; the trap leaves a marker next to it.
            let job = script(
                r#"trap 'echo stopped > "$2.term"; exit 0' TERM; echo "PROGRESS 5"; while :; do sleep 1; done"#,
                &dir,
            )
            .grace_period(Duration::from_secs(5));

            let id = ctx.job_id();
            let canceller = cancel_after(&store, id, Duration::from_millis(300));
            let outcome = job.run(&params, &ctx);
            canceller.join().unwrap();

            assert!(matches!(outcome, Err(ComputeError::Cancelled)), "{outcome:?}");
            let marker = dir.join(format!("{id}.json.term"));
            assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "stopped");
            let _ = fs::remove_dir_all(&dir);
        }

        #[test]
        fn cancellation_force_kills_after_grace_period() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({}));
            let dir = scratch_dir();
            let job = script("trap '' TERM; echo 'PROGRESS 5'; while :; do sleep 1; done", &dir)
                .grace_period(Duration::from_millis(300));

            let id = ctx.job_id();
            let canceller = cancel_after(&store, id, Duration::from_millis(200));
            let started = Instant::now();
            let outcome = job.run(&params, &ctx);
            canceller.join().unwrap();

            assert!(matches!(outcome, Err(ComputeError::Cancelled)), "{outcome:?}");
            assert!(started.elapsed() < Duration::from_secs(10));
            let _ = fs::remove_dir_all(&dir);
        }

        #[test]
        fn cancellation_kills_the_child() {
            let store = Arc::new(JobStore::new());
            let (ctx, params) = running(&store, json!({}));
            let dir = scratch_dir();
            let job = script("echo 'PROGRESS 10'; sleep 30", &dir);

            let id = ctx.job_id();
            let canceller = cancel_after(&store, id, Duration::from_millis(200));

            let started = Instant::now();
            let outcome = job.run(&params, &ctx);
            canceller.join().unwrap();

            assert!(matches!(outcome, Err(ComputeError::Cancelled)));
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(store.get(&id).unwrap().status(), JobStatus::Cancelled);
            assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
            let _ = fs::remove_dir_all(&dir);
        }
    }
}
