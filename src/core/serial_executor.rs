//! Runs tasks one at a time, each on a fresh thread with its own timeout.
//!
//! A task body that hangs cannot stall the executor: when the timeout fires the
//! task is reported as timed out, its [`AbortSignal`] is raised and the worker
//! thread is abandoned. Completion and timeout race to claim the task from a
//! shared slot; only the winner reports, so every started task gets exactly one
//! of [`ExecutorTask::result_received`] or [`ExecutorTask::timed_out`].
//!
//! Callbacks and the start of the next task are delivered through the receiver
//! [`Executor`]. [`SerialExecutor::add_task`] is meant to be called from the
//! receiver's context; the pending list is locked regardless.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::SerialExecutorConfig;
use crate::util::panic_message;

use super::{CoreError, DispatchMode, Executor, Interval, Scheduler};

/// A task for a [`SerialExecutor`].
pub trait ExecutorTask: Any + Send + Sync {
    /// Attempts to fold `other`, a newly added task, into this pending task.
    /// Returning `true` drops `other`. Implementations can downcast with
    /// `(other as &dyn Any).downcast_ref::<T>()`.
    fn merge(&mut self, _other: &dyn ExecutorTask) -> bool {
        false
    }

    /// How long the body may run before it is abandoned.
    fn timeout(&self) -> Duration;

    /// The body, run on a dedicated thread. Long-running bodies should poll
    /// `abort` or sleep through it so they stop after a timeout.
    fn execute_task(&self, abort: &AbortSignal);

    /// Called on the receiver after the body finished.
    fn result_received(&self) {}

    /// Called on the receiver when the body exceeded its timeout.
    fn timed_out(&self) {}
}

/// Returned by [`AbortSignal::sleep`] when the task was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("serial task aborted")]
pub struct Aborted;

#[derive(Debug, Default)]
struct AbortState {
    aborted: AtomicBool,
    worker: Mutex<Option<Thread>>,
}

/// Abort flag handed to a running task body.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    /// Creates a signal that has not been raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the task has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }

    /// Sleeps for `duration`, returning early with `Err(Aborted)` if the task is
    /// aborted meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`Aborted`] if the signal is raised before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> Result<(), Aborted> {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_aborted() {
                return Err(Aborted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            thread::park_timeout(remaining);
        }
    }

    /// Raises the signal and wakes the bound thread.
    pub fn abort(&self) {
        self.state.aborted.store(true, Ordering::Release);
        if let Some(worker) = self.state.worker.lock().as_ref() {
            worker.unpark();
        }
    }

    fn bind_current_thread(&self) {
        *self.state.worker.lock() = Some(thread::current());
    }
}

/// Serial executor statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialStats {
    /// Tasks reported through `result_received` after a clean run.
    pub completed: u64,
    /// Tasks reported through `timed_out`.
    pub timed_out: u64,
    /// Tasks whose body panicked or whose thread could not be started.
    pub failed: u64,
    /// Tasks folded into a pending task.
    pub merged: u64,
    /// Tasks waiting to start.
    pub pending: usize,
    /// Whether a task is running now.
    pub executing: bool,
}

#[derive(Default)]
struct SerialCounters {
    completed: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    merged: AtomicU64,
}

/// Claim cell shared by a worker thread and its timeout.
struct WorkerSlot {
    id: u64,
    task: Mutex<Option<Arc<dyn ExecutorTask>>>,
    signal: AbortSignal,
}

impl WorkerSlot {
    fn claim(&self) -> Option<Arc<dyn ExecutorTask>> {
        self.task.lock().take()
    }
}

#[derive(Default)]
struct SerialState {
    pending: VecDeque<Box<dyn ExecutorTask>>,
    executing: Option<Arc<WorkerSlot>>,
    watchdog: Option<Interval>,
}

struct SerialInner {
    receiver: Arc<dyn Executor>,
    scheduler: Scheduler,
    config: SerialExecutorConfig,
    state: Mutex<SerialState>,
    counters: SerialCounters,
    next_task_id: AtomicU64,
}

/// Wraps a closure as a task with the default timeout.
struct RunnableTask {
    body: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    timeout: Duration,
}

impl ExecutorTask for RunnableTask {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute_task(&self, _abort: &AbortSignal) {
        let body = self.body.lock().take();
        if let Some(body) = body {
            body();
        }
    }
}

fn notify(task_id: u64, callback: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            task_id,
            callback,
            panic = %panic_message(payload.as_ref()),
            "Serial task callback failed"
        );
    }
}

/// Starts the next pending task. Must be called with no task executing, or by the
/// report of the task that was executing.
///
/// Returns the task back if its thread could not be spawned. Its slot then stays in
/// `executing` until the failure report calls [`check_next`] with its id.
fn start_next(
    inner: &Arc<SerialInner>,
    state: &mut SerialState,
) -> Option<(u64, Arc<dyn ExecutorTask>)> {
    if let Some(watchdog) = state.watchdog.take() {
        watchdog.cancel();
    }
    state.executing = None;
    let task: Arc<dyn ExecutorTask> = Arc::from(state.pending.pop_front()?);

    let id = inner.next_task_id.fetch_add(1, Ordering::Relaxed);
    let timeout = task.timeout();
    let slot = Arc::new(WorkerSlot {
        id,
        task: Mutex::new(Some(Arc::clone(&task))),
        signal: AbortSignal::new(),
    });
    let thread_name = format!("{}-{id}", inner.config.thread_name_prefix);

    let executor = Arc::downgrade(inner);
    let worker_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || run_task(&executor, &worker_slot, task));
    if let Err(source) = spawned {
        error!(
            task_id = id,
            thread = %thread_name,
            error = %source,
            "Failed to start serial task thread"
        );
        let failed = slot.claim().map(|task| (id, task));
        state.executing = Some(slot);
        return failed;
    }
    debug!(
        task_id = id,
        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        "Serial task started"
    );

    let executor = Arc::downgrade(inner);
    let watched = Arc::clone(&slot);
    let watchdog = Interval::named(&inner.scheduler, thread_name, DispatchMode::Direct, move || {
        if let Some(inner) = executor.upgrade() {
            abort_task(&inner, &watched);
        }
    });
    match watchdog.schedule(timeout) {
        Ok(()) => state.watchdog = Some(watchdog),
        Err(error) => warn!(task_id = id, %error, "Serial task timeout could not be scheduled"),
    }
    state.executing = Some(slot);
    None
}

/// Called by the report of task `finished`. Starts the next pending task if
/// `finished` still owns the executing slot, and reports any task whose thread
/// failed to start.
fn check_next(inner: &Arc<SerialInner>, finished: u64) {
    let failed = {
        let mut state = inner.state.lock();
        let current = state.executing.as_ref().map(|slot| slot.id);
        if current != Some(finished) {
            debug!(task_id = finished, ?current, "Stale serial task report ignored");
            return;
        }
        start_next(inner, &mut state)
    };
    if let Some((id, task)) = failed {
        report_start_failure(inner, id, task);
    }
}

fn report_start_failure(inner: &Arc<SerialInner>, id: u64, task: Arc<dyn ExecutorTask>) {
    inner.counters.failed.fetch_add(1, Ordering::Relaxed);
    let executor = Arc::downgrade(inner);
    inner.receiver.execute(Box::new(move || {
        notify(id, "timed_out", || task.timed_out());
        if let Some(inner) = executor.upgrade() {
            check_next(&inner, id);
        }
    }));
}

fn run_task(executor: &Weak<SerialInner>, slot: &WorkerSlot, task: Arc<dyn ExecutorTask>) {
    slot.signal.bind_current_thread();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.execute_task(&slot.signal)));
    drop(task);

    let Some(inner) = executor.upgrade() else {
        return;
    };
    let Some(task) = slot.claim() else {
        debug!(task_id = slot.id, "Serial task finished after its timeout");
        return;
    };
    match outcome {
        Ok(()) => {
            inner.counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(payload) => {
            inner.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                task_id = slot.id,
                panic = %panic_message(payload.as_ref()),
                "Serial task failed"
            );
        }
    }

    let id = slot.id;
    let executor = Weak::clone(executor);
    inner.receiver.execute(Box::new(move || {
        notify(id, "result_received", || task.result_received());
        if let Some(inner) = executor.upgrade() {
            check_next(&inner, id);
        }
    }));
}

fn abort_task(inner: &Arc<SerialInner>, slot: &WorkerSlot) {
    let Some(task) = slot.claim() else {
        return;
    };
    slot.signal.abort();
    inner.counters.timed_out.fetch_add(1, Ordering::Relaxed);
    warn!(task_id = slot.id, "Serial task timed out, abandoning its thread");

    let id = slot.id;
    let executor = Arc::downgrade(inner);
    inner.receiver.execute(Box::new(move || {
        notify(id, "timed_out", || task.timed_out());
        if let Some(inner) = executor.upgrade() {
            check_next(&inner, id);
        }
    }));
}

/// Executes tasks one after another on disposable threads.
///
/// Clones share the same pending list.
#[derive(Clone)]
pub struct SerialExecutor {
    inner: Arc<SerialInner>,
}

impl SerialExecutor {
    /// Creates an executor with the default configuration. Timeouts are driven by
    /// `scheduler`; callbacks run on `receiver`.
    pub fn new(receiver: Arc<dyn Executor>, scheduler: &Scheduler) -> Self {
        Self::from_parts(receiver, scheduler, SerialExecutorConfig::default())
    }

    /// Creates an executor from configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for an invalid configuration.
    pub fn with_config(
        receiver: Arc<dyn Executor>,
        scheduler: &Scheduler,
        config: SerialExecutorConfig,
    ) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        Ok(Self::from_parts(receiver, scheduler, config))
    }

    fn from_parts(
        receiver: Arc<dyn Executor>,
        scheduler: &Scheduler,
        config: SerialExecutorConfig,
    ) -> Self {
        info!(
            prefix = %config.thread_name_prefix,
            default_timeout_ms = config.default_timeout_ms,
            "Serial executor created"
        );
        Self {
            inner: Arc::new(SerialInner {
                receiver,
                scheduler: scheduler.clone(),
                config,
                state: Mutex::new(SerialState::default()),
                counters: SerialCounters::default(),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    /// Runs `f` as a task with the default timeout and no callbacks.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_task(RunnableTask {
            body: Mutex::new(Some(Box::new(f))),
            timeout: self.default_timeout(),
        });
    }

    /// Adds a task, first offering it to each pending task's `merge` in order.
    ///
    /// The scan is linear in the number of pending tasks.
    pub fn add_task(&self, task: impl ExecutorTask) {
        self.add_boxed(Box::new(task));
    }

    /// Adds a boxed task. See [`add_task`](Self::add_task).
    pub fn add_boxed(&self, task: Box<dyn ExecutorTask>) {
        let failed = {
            let mut state = self.inner.state.lock();
            if state.pending.iter_mut().any(|pending| pending.merge(task.as_ref())) {
                self.inner.counters.merged.fetch_add(1, Ordering::Relaxed);
                debug!(pending = state.pending.len(), "Serial task merged");
                return;
            }
            state.pending.push_back(task);
            if state.executing.is_some() {
                return;
            }
            start_next(&self.inner, &mut state)
        };
        if let Some((id, task)) = failed {
            report_start_failure(&self.inner, id, task);
        }
    }

    /// Tasks waiting to start.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// True while a task is running or awaiting its report.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.inner.state.lock().executing.is_some()
    }

    /// Timeout applied by [`execute`](Self::execute).
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.config.default_timeout_ms)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SerialStats {
        let counters = &self.inner.counters;
        let state = self.inner.state.lock();
        SerialStats {
            completed: counters.completed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            merged: counters.merged.load(Ordering::Relaxed),
            pending: state.pending.len(),
            executing: state.executing.is_some(),
        }
    }
}

impl std::fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("prefix", &self.inner.config.thread_name_prefix)
            .field("queue_size", &self.queue_size())
            .field("executing", &self.is_executing())
            .finish_non_exhaustive()
    }
}
