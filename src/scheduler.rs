//! Periodic and shutdown task runner.
//!
//! Each periodic task gets its own tokio loop driven by an interval of its
//! [`IntervalClass`]. A task invocation is awaited before the loop waits for
//! the next tick, so one registered task never overlaps with itself. On
//! shutdown the loops are stopped first (letting any in-flight invocation
//! finish), then the shutdown tasks run once each, in registration order.

use crate::error::{ViewCounterError, ViewCounterResult};
use crate::metrics::SchedulerMetrics;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Coarse scheduling classes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntervalClass {
    HalfSecond,
    Second,
    FifteenMinutes,
    Hour,
}

impl IntervalClass {
    pub fn period(self) -> Duration {
        match self {
            IntervalClass::HalfSecond => Duration::from_millis(500),
            IntervalClass::Second => Duration::from_secs(1),
            IntervalClass::FifteenMinutes => Duration::from_secs(15 * 60),
            IntervalClass::Hour => Duration::from_secs(60 * 60),
        }
    }
}

pub type TaskFuture = BoxFuture<'static, ViewCounterResult<()>>;
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

#[derive(Clone)]
struct Task {
    name: String,
    run: TaskFn,
}

/// A failed shutdown task.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: String,
    pub error: ViewCounterError,
}

pub struct Scheduler {
    periodic: Vec<(IntervalClass, Task)>,
    shutdown: Vec<Task>,
    metrics: Arc<SchedulerMetrics>,
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

fn boxed<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ViewCounterResult<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

impl Scheduler {
    pub fn new(metrics: Arc<SchedulerMetrics>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            periodic: Vec::new(),
            shutdown: Vec::new(),
            metrics,
            stop_tx,
            handles: Vec::new(),
        }
    }

    /// Run `task` every period of `class` once [`start`](Self::start)ed.
    pub fn register_periodic<F, Fut>(&mut self, class: IntervalClass, name: &str, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ViewCounterResult<()>> + Send + 'static,
    {
        self.periodic.push((
            class,
            Task {
                name: name.to_string(),
                run: boxed(task),
            },
        ));
    }

    /// Run `task` once during [`shutdown`](Self::shutdown).
    pub fn register_shutdown<F, Fut>(&mut self, name: &str, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ViewCounterResult<()>> + Send + 'static,
    {
        self.shutdown.push(Task {
            name: name.to_string(),
            run: boxed(task),
        });
    }

    pub fn task_count(&self, class: IntervalClass) -> usize {
        self.periodic.iter().filter(|(c, _)| *c == class).count()
    }

    pub fn shutdown_task_count(&self) -> usize {
        self.shutdown.len()
    }

    /// Spawn one loop per periodic task. Must be called within a tokio runtime.
    pub fn start(&mut self) {
        for (class, task) in self.periodic.iter().cloned() {
            let metrics = Arc::clone(&self.metrics);
            let stop = self.stop_tx.subscribe();
            debug!(task = %task.name, interval = %class, "scheduling task");
            self.handles.push(tokio::spawn(run_periodic(class, task, metrics, stop)));
        }
        info!(tasks = self.handles.len(), "scheduler started");
    }

    /// Stop periodic loops, then run every shutdown task once.
    pub async fn shutdown(&mut self) -> Vec<TaskFailure> {
        let _ = self.stop_tx.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "periodic task loop panicked");
            }
        }

        let mut failures = Vec::new();
        for task in &self.shutdown {
            if let Err(error) = run_once(task, &self.metrics).await {
                failures.push(TaskFailure {
                    task: task.name.clone(),
                    error,
                });
            }
        }
        info!(failures = failures.len(), "shutdown tasks complete");
        failures
    }

    /// Start, wait for `signal`, then shut down.
    pub async fn run_until<S: Future<Output = ()>>(&mut self, signal: S) -> Vec<TaskFailure> {
        self.start();
        signal.await;
        info!("shutdown requested");
        self.shutdown().await
    }
}

async fn run_periodic(
    class: IntervalClass,
    task: Task,
    metrics: Arc<SchedulerMetrics>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(class.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        // Failures are logged and counted; the next tick runs regardless.
        let _ = run_once(&task, &metrics).await;
    }
    debug!(task = %task.name, "task loop stopped");
}

async fn run_once(task: &Task, metrics: &SchedulerMetrics) -> ViewCounterResult<()> {
    let start = Instant::now();
    let result = (task.run)().await;
    metrics.record_run(&task.name, start.elapsed(), result.is_ok());
    if let Err(e) = &result {
        error!(task = %task.name, error = %e, "scheduled task failed");
    }
    result
}
