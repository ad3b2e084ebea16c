use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::runtime::Handle;

use crate::error::{ComputeError, JobError};
use crate::job::{Job, JobId, JobKind, JobStatus};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::JobStore;
use crate::task::{ComputeFn, JobContext};

/// Blocks compute functions until opened.
#[derive(Clone, Default)]
struct Gate(Arc<AtomicBool>);

impl Gate {
    fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn compute(&self) -> Arc<dyn ComputeFn> {
        let open = Arc::clone(&self.0);
        Arc::new(move |_: &Value, ctx: &JobContext| -> Result<Value, ComputeError> {
            while !open.load(Ordering::SeqCst) {
                ctx.checkpoint()?;
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(json!({"done": true}))
        })
    }
}

fn echo() -> Arc<dyn ComputeFn> {
    Arc::new(|p: &Value, ctx: &JobContext| -> Result<Value, ComputeError> {
        ctx.report_progress(50.0);
        Ok(p.clone())
    })
}

fn scheduler(config: SchedulerConfig) -> (Scheduler, Arc<JobStore>) {
    let store = Arc::new(JobStore::new());
    let scheduler = Scheduler::new(config, Arc::clone(&store), Handle::current());
    (scheduler, store)
}

fn submit(
    scheduler: &Scheduler,
    store: &JobStore,
    kind: &str,
    compute: Arc<dyn ComputeFn>,
) -> Result<JobId, JobError> {
    let job = store.create(JobKind::from(kind), json!({"kind": kind}));
    scheduler.submit(&job, compute)?;
    Ok(job.id())
}

fn status(store: &JobStore, id: &JobId) -> JobStatus {
    store.get(id).unwrap().status()
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let poll = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), poll).await.is_err() {
        panic!("timed out waiting for {what}");
    }
}

async fn settle(scheduler: &Scheduler) {
    tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
        .await
        .expect("scheduler did not go idle");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submitted_job_runs_to_completion() {
    let (scheduler, store) = scheduler(SchedulerConfig::default().with_max_concurrent(2));
    let id = submit(&scheduler, &store, "backtest", echo()).unwrap();

    settle(&scheduler).await;
    let job: Job = store.get(&id).unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.result(), Some(&json!({"kind": "backtest"})));
    assert!(job.started_at().is_some());

    let metrics = scheduler.metrics();
    assert_eq!(metrics.jobs_finished["backtest"].completed, 1);
    assert_eq!(metrics.running, 0);
    assert_eq!(metrics.max_concurrent_jobs, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn global_bound_holds_second_job_in_queue() {
    let (scheduler, store) = scheduler(SchedulerConfig::default().with_max_concurrent(1));
    let gate = Gate::default();
    let first = submit(&scheduler, &store, "optimize", gate.compute()).unwrap();
    let second = submit(&scheduler, &store, "optimize", gate.compute()).unwrap();

    wait_for("first job to run", || status(&store, &first) == JobStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let waiting = store.get(&second).unwrap();
    assert_eq!(waiting.status(), JobStatus::Queued);
    assert_eq!(waiting.progress(), None);

    let metrics = scheduler.metrics();
    assert_eq!((metrics.running, metrics.queued), (1, 1));

    gate.open();
    settle(&scheduler).await;
    let first = store.get(&first).unwrap();
    let second = store.get(&second).unwrap();
    assert_eq!(second.status(), JobStatus::Completed);
    assert!(second.started_at().unwrap() >= first.completed_at().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_kind_bound_does_not_block_other_kinds() {
    let config = SchedulerConfig::default()
        .with_max_concurrent(3)
        .with_kind_limit("optimize", 1);
    let (scheduler, store) = scheduler(config);
    let gate = Gate::default();

    let opt1 = submit(&scheduler, &store, "optimize", gate.compute()).unwrap();
    let opt2 = submit(&scheduler, &store, "optimize", gate.compute()).unwrap();
    let bt = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();

    wait_for("backtest to run", || status(&store, &bt) == JobStatus::Running).await;
    assert_eq!(status(&store, &opt1), JobStatus::Running);
    assert_eq!(status(&store, &opt2), JobStatus::Queued);

    gate.open();
    settle(&scheduler).await;
    assert_eq!(status(&store, &opt2), JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_per_kind_limit_runs_jobs_one_at_a_time() {
    let config = SchedulerConfig::default()
        .with_max_concurrent(2)
        .with_per_kind_limit(0);
    let (scheduler, store) = scheduler(config);

    let first = submit(&scheduler, &store, "echo", echo()).unwrap();
    let second = submit(&scheduler, &store, "echo", echo()).unwrap();

    settle(&scheduler).await;
    assert_eq!(status(&store, &first), JobStatus::Completed);
    assert_eq!(status(&store, &second), JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overflow_is_rejected_and_rolled_back() {
    let config = SchedulerConfig::default()
        .with_max_concurrent(1)
        .with_queue_capacity(1);
    let (scheduler, store) = scheduler(config);
    let gate = Gate::default();

    let running = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();
    let queued = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();
    let err = submit(&scheduler, &store, "backtest", gate.compute()).unwrap_err();
    assert_eq!(err, JobError::QueueFull { capacity: 1 });
    assert_eq!(scheduler.metrics().rejected_queue_full, 1);
    assert_eq!(scheduler.metrics().queued, 1);

    gate.open();
    settle(&scheduler).await;
    assert_eq!(status(&store, &running), JobStatus::Completed);
    assert_eq!(status(&store, &queued), JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_cancelled_in_store_is_skipped_at_admission() {
    let (scheduler, store) = scheduler(SchedulerConfig::default().with_max_concurrent(1));
    let gate = Gate::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();
    let counted = Arc::clone(&calls);
    let second = submit(
        &scheduler,
        &store,
        "backtest",
        Arc::new(move |_: &Value, _: &JobContext| -> Result<Value, ComputeError> {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        }),
    )
    .unwrap();

    store.update(&second, |j| j.cancel()).unwrap();
    gate.open();
    settle(&scheduler).await;

    assert_eq!(status(&store, &first), JobStatus::Completed);
    assert_eq!(status(&store, &second), JobStatus::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_compute_fails_the_job() {
    let (scheduler, store) = scheduler(SchedulerConfig::default().with_max_concurrent(1));
    let id = submit(
        &scheduler,
        &store,
        "backtest",
        Arc::new(|_: &Value, _: &JobContext| -> Result<Value, ComputeError> {
            panic!("exchange data missing")
        }),
    )
    .unwrap();

    settle(&scheduler).await;
    let job = store.get(&id).unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    let failure = job.error().unwrap();
    assert_eq!(failure.message, "compute function panicked");
    assert!(failure.detail.as_deref().unwrap().contains("exchange data missing"));

    // The slot was released.
    let next = submit(&scheduler, &store, "backtest", echo()).unwrap();
    settle(&scheduler).await;
    assert_eq!(status(&store, &next), JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_drains_queue_and_refuses_new_jobs() {
    let (scheduler, store) = scheduler(SchedulerConfig::default().with_max_concurrent(1));
    let gate = Gate::default();
    let first = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();
    let second = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();

    let drained = scheduler.shutdown();
    assert_eq!(drained, vec![second]);
    assert!(scheduler.is_shutting_down());
    assert_eq!(
        submit(&scheduler, &store, "backtest", echo()).unwrap_err(),
        JobError::ShuttingDown
    );

    gate.open();
    settle(&scheduler).await;
    assert_eq!(status(&store, &first), JobStatus::Completed);
    // Drained jobs are the caller's to cancel; the scheduler never starts them.
    assert_eq!(status(&store, &second), JobStatus::Queued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remove_queued_only_touches_waiting_jobs() {
    let (scheduler, store) = scheduler(SchedulerConfig::default().with_max_concurrent(1));
    let gate = Gate::default();
    let first = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();
    let second = submit(&scheduler, &store, "backtest", gate.compute()).unwrap();

    wait_for("first job to run", || status(&store, &first) == JobStatus::Running).await;
    assert!(!scheduler.remove_queued(&first));
    assert!(scheduler.remove_queued(&second));
    assert_eq!(scheduler.metrics().queued, 0);

    gate.open();
    settle(&scheduler).await;
    assert!(scheduler.is_idle());
}
