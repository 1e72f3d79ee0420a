//! Build graph orchestration.
//!
//! Independent build steps are submitted to a [`TaskGraph`] and run on a
//! fixed-size rayon pool. Every submitted task runs to completion even when a
//! sibling fails; [`TaskGraph::join_all`] then reports one failure as itself
//! and several as a [`BuildFailures`] aggregate. Nothing is retried and
//! nothing is cancelled, except optional steps that have not started yet.
//!
//! ```text
//! Pending -> Running -> Succeeded
//!                    -> Failed
//! Pending -> Skipped   (listed in steps_to_skip, or optional after a failure)
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rayon::{Scope, ThreadPool, ThreadPoolBuilder, Yield};

use crate::config::BuildOptions;
use crate::error::{BuildFailures, TaskFailure};
use crate::observer::{observe, BuildObserver};

/// Observable state of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    /// Rendered error chain of the failure.
    Failed(String),
    Skipped,
}

impl TaskStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

#[derive(Debug)]
struct Slot {
    status: Mutex<TaskStatus>,
    error: Mutex<Option<anyhow::Error>>,
    settled: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            status: Mutex::new(TaskStatus::Pending),
            error: Mutex::new(None),
            settled: Condvar::new(),
        }
    }

    fn set(&self, status: TaskStatus) {
        let settled = status.is_settled();
        *self.status.lock() = status;
        if settled {
            self.settled.notify_all();
        }
    }

    fn fail(&self, error: anyhow::Error) {
        let message = format!("{error:#}");
        *self.error.lock() = Some(error);
        self.set(TaskStatus::Failed(message));
    }
}

/// Handle to one submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Arc<str>,
    slot: Arc<Slot>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.slot.status.lock().clone()
    }

    /// Block until the task has settled.
    ///
    /// On a pool worker this runs other queued tasks while waiting, so a
    /// task may wait on a sibling even with a single worker thread.
    pub fn wait(&self) -> TaskStatus {
        let mut status = self.slot.status.lock();
        loop {
            if status.is_settled() {
                return status.clone();
            }
            match MutexGuard::unlocked(&mut status, rayon::yield_now) {
                Some(Yield::Executed) => continue,
                Some(Yield::Idle) => {
                    self.slot
                        .settled
                        .wait_for(&mut status, Duration::from_millis(5));
                }
                None => self.slot.settled.wait(&mut status),
            }
        }
    }
}

/// Owns the worker pool and runs task graphs on it.
pub struct Orchestrator<'a> {
    pool: Option<ThreadPool>,
    options: &'a BuildOptions,
    observer: &'a dyn BuildObserver,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator with `options.parallelism` workers, or none
    /// when `options.run_in_parallel` is off.
    pub fn new(options: &'a BuildOptions, observer: &'a dyn BuildObserver) -> Result<Self> {
        let pool = if options.run_in_parallel {
            let pool = ThreadPoolBuilder::new()
                .num_threads(options.parallelism.max(1))
                .thread_name(|index| format!("dist-build-{index}"))
                .build()
                .context("Failed to create build thread pool")?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            pool,
            options,
            observer,
        })
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Run `body`, which submits tasks to the graph it is given.
    ///
    /// Returns after every submitted task has settled. An error returned by
    /// `body` takes precedence over task failures.
    pub fn run<'env, R, F>(&self, body: F) -> Result<R>
    where
        'a: 'env,
        F: FnOnce(&TaskGraph<'_, 'env>) -> Result<R>,
    {
        match &self.pool {
            Some(pool) => pool.in_place_scope(|scope| self.run_graph(Some(scope), body)),
            None => self.run_graph(None, body),
        }
    }

    fn run_graph<'env, R, F>(&self, scope: Option<&Scope<'env>>, body: F) -> Result<R>
    where
        'a: 'env,
        F: FnOnce(&TaskGraph<'_, 'env>) -> Result<R>,
    {
        let graph = TaskGraph {
            scope,
            options: self.options,
            observer: self.observer,
            failed: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        };
        let result = body(&graph);
        let settled = graph.join_all();
        let value = result?;
        settled?;
        Ok(value)
    }
}

type Task<'env> = Box<dyn FnOnce() -> Result<()> + Send + 'env>;

/// Tasks submitted during one [`Orchestrator::run`].
pub struct TaskGraph<'s, 'env> {
    scope: Option<&'s Scope<'env>>,
    options: &'env BuildOptions,
    observer: &'env dyn BuildObserver,
    failed: Arc<AtomicBool>,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl<'env> TaskGraph<'_, 'env> {
    /// Submit a task. It starts as soon as a worker is free, or right away
    /// in sequential mode.
    pub fn submit<F>(&self, id: impl Into<String>, task: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'env,
    {
        self.enqueue(id.into(), false, Box::new(task))
    }

    /// Submit a task that is skipped if any task of this graph has already
    /// failed by the time it would start.
    pub fn submit_optional<F>(&self, id: impl Into<String>, task: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'env,
    {
        self.enqueue(id.into(), true, Box::new(task))
    }

    /// Whether any task of this graph has failed so far.
    pub fn has_failures(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn enqueue(&self, id: String, optional: bool, task: Task<'env>) -> TaskHandle {
        let handle = TaskHandle {
            id: Arc::from(id.as_str()),
            slot: Arc::new(Slot::new()),
        };
        self.tasks.lock().push(handle.clone());

        if self.options.is_step_skipped(&id) {
            self.observer
                .event("step skipped", &[("step", id), ("reason", "requested".to_string())]);
            handle.slot.set(TaskStatus::Skipped);
            return handle;
        }

        let job = {
            let handle = handle.clone();
            let observer = self.observer;
            let failed = Arc::clone(&self.failed);
            move || run_task(&handle, task, optional, observer, &failed)
        };
        match self.scope {
            Some(scope) => scope.spawn(move |_| job()),
            None => job(),
        }
        handle
    }

    /// Wait for every task submitted so far, latest first.
    ///
    /// A single failure is returned with the task id as context. Two or more
    /// become a [`BuildFailures`] listing them in submission order.
    pub fn join_all(&self) -> Result<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks.iter().rev() {
            task.wait();
        }

        let mut failures: Vec<TaskFailure> = tasks
            .iter()
            .filter_map(|task| {
                task.slot.error.lock().take().map(|error| TaskFailure {
                    task: task.id.to_string(),
                    error,
                })
            })
            .collect();

        if failures.len() > 1 {
            return Err(BuildFailures { failures }.into());
        }
        match failures.pop() {
            Some(failure) => Err(failure
                .error
                .context(format!("task '{}' failed", failure.task))),
            None => Ok(()),
        }
    }
}

fn run_task(
    handle: &TaskHandle,
    task: Task<'_>,
    optional: bool,
    observer: &dyn BuildObserver,
    failed: &AtomicBool,
) {
    if optional && failed.load(Ordering::SeqCst) {
        observer.event(
            "step skipped",
            &[
                ("step", handle.id.to_string()),
                ("reason", "earlier failure".to_string()),
            ],
        );
        handle.slot.set(TaskStatus::Skipped);
        return;
    }

    handle.slot.set(TaskStatus::Running);
    let result = observe(observer, &handle.id, &[], || {
        panic::catch_unwind(AssertUnwindSafe(task))
            .unwrap_or_else(|_| Err(anyhow!("task '{}' panicked", handle.id)))
    });
    match result {
        Ok(()) => handle.slot.set(TaskStatus::Succeeded),
        Err(error) => {
            failed.store(true, Ordering::SeqCst);
            handle.slot.fail(error);
        }
    }
}
