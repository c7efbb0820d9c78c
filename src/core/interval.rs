//! Cancellable one-shot and repeating callbacks driven by a [`Scheduler`].
//!
//! An [`Interval`] pairs an action with a dispatch target. Each call to one of the
//! `schedule*` methods supersedes the previous schedule. Every schedule gets a fresh
//! generation number; a firing only runs the action if its generation is still the
//! one the interval recognises, so a firing that was already handed to a run queue
//! when the interval was cancelled or rescheduled turns into a no-op.
//!
//! # Example
//!
//! ```
//! use prometheus_invoker::core::{Interval, Scheduler};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::start("doc-interval")?;
//! let ticks = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&ticks);
//! let interval = Interval::direct(&scheduler, move || {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! interval.schedule_repeating(Duration::from_millis(10))?;
//! std::thread::sleep(Duration::from_millis(60));
//! interval.cancel();
//! assert!(ticks.load(Ordering::SeqCst) >= 2);
//! # scheduler.shutdown();
//! # Ok::<(), prometheus_invoker::core::CoreError>(())
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::util::panic_message;

use super::scheduler::{Repeat, TimerControl, TimerKey, TimerTask};
use super::{CoreError, RunQueue, Scheduler};

/// Generation value meaning "nothing scheduled".
const IDLE: u64 = 0;

/// Where an interval's action runs when it fires.
#[derive(Clone)]
pub enum DispatchMode {
    /// Run the action on the timer thread. The action must be quick: a slow action
    /// delays every other interval sharing the scheduler.
    Direct,
    /// Post the action to a run queue.
    RunQueue(Arc<dyn RunQueue>),
}

impl fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("<direct>"),
            Self::RunQueue(_) => f.write_str("<run-queue>"),
        }
    }
}

struct IntervalInner {
    name: Arc<str>,
    scheduler: Scheduler,
    dispatch: DispatchMode,
    action: Box<dyn Fn() + Send + Sync>,
    /// Generation of the schedule currently recognised as active, or `IDLE`.
    current: AtomicU64,
    /// Last generation handed out.
    issued: AtomicU64,
    /// Registration of the current schedule. Held while scheduling or cancelling so
    /// that those operations are serialised per interval.
    registration: Mutex<Option<TimerKey>>,
}

impl IntervalInner {
    /// Runs the action if `generation` is still current. One-shot firings claim the
    /// generation with a compare-and-swap so the interval goes idle atomically.
    fn expire(&self, generation: u64, one_shot: bool) -> bool {
        let claimed = if one_shot {
            self.current
                .compare_exchange(generation, IDLE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        } else {
            self.current.load(Ordering::Acquire) == generation
        };
        if !claimed {
            debug!(interval = %self.name, generation, "Skipping stale interval firing");
            return false;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.action)())) {
            warn!(
                interval = %self.name,
                panic = %panic_message(payload.as_ref()),
                "Interval broken in expired()"
            );
        }
        true
    }

    /// Cancels the interval only if `generation` is still the active schedule.
    fn cancel_generation(&self, generation: u64) {
        let mut registration = self.registration.lock();
        if self
            .current
            .compare_exchange(generation, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(key) = registration.take() {
                self.scheduler.cancel(&key);
            }
        }
    }
}

impl Drop for IntervalInner {
    fn drop(&mut self) {
        if let Some(key) = self.registration.get_mut().take() {
            self.scheduler.cancel(&key);
        }
    }
}

/// Builds the callback registered with the timer for one schedule.
fn timer_task(interval: Weak<IntervalInner>, generation: u64, one_shot: bool) -> TimerTask {
    Arc::new(move || {
        let Some(inner) = interval.upgrade() else {
            return TimerControl::Cancel;
        };
        if inner.current.load(Ordering::Acquire) != generation {
            return TimerControl::Cancel;
        }
        match &inner.dispatch {
            DispatchMode::Direct => {
                if inner.expire(generation, one_shot) {
                    TimerControl::Continue
                } else {
                    TimerControl::Cancel
                }
            }
            DispatchMode::RunQueue(queue) => {
                if !queue.is_running() {
                    warn!(
                        interval = %inner.name,
                        "Interval posted to shutdown RunQueue. Cancelling."
                    );
                    inner.cancel_generation(generation);
                    return TimerControl::Cancel;
                }
                let buddy = Arc::downgrade(&inner);
                let posted = queue.post(Box::new(move || {
                    if let Some(inner) = buddy.upgrade() {
                        inner.expire(generation, one_shot);
                    }
                }));
                if let Err(error) = posted {
                    warn!(
                        interval = %inner.name,
                        %error,
                        "Failed to execute interval on run-queue"
                    );
                }
                TimerControl::Continue
            }
        }
    })
}

/// A cancellable, reschedulable timer callback.
///
/// Clones share the same schedule. The registration is cancelled when the last
/// clone is dropped, so keep a handle for as long as the interval should fire.
#[derive(Clone)]
pub struct Interval {
    inner: Arc<IntervalInner>,
}

impl Interval {
    /// Creates an interval that runs `action` per `dispatch`. The closure's type name
    /// identifies the interval in log output.
    pub fn new<F>(scheduler: &Scheduler, dispatch: DispatchMode, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::named(scheduler, std::any::type_name::<F>(), dispatch, action)
    }

    /// Creates an interval with an explicit diagnostic name.
    pub fn named<F>(
        scheduler: &Scheduler,
        name: impl Into<String>,
        dispatch: DispatchMode,
        action: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name: String = name.into();
        Self {
            inner: Arc::new(IntervalInner {
                name: Arc::from(name),
                scheduler: scheduler.clone(),
                dispatch,
                action: Box::new(action),
                current: AtomicU64::new(IDLE),
                issued: AtomicU64::new(IDLE),
                registration: Mutex::new(None),
            }),
        }
    }

    /// Creates an interval whose action runs directly on the timer thread.
    pub fn direct<F>(scheduler: &Scheduler, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(scheduler, DispatchMode::Direct, action)
    }

    /// Creates an interval whose action is posted to `run_queue` when it fires.
    pub fn on_run_queue<F>(scheduler: &Scheduler, run_queue: Arc<dyn RunQueue>, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(scheduler, DispatchMode::RunQueue(run_queue), action)
    }

    /// Diagnostic name of this interval.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Dispatch target of this interval.
    #[must_use]
    pub fn dispatch(&self) -> &DispatchMode {
        &self.inner.dispatch
    }

    /// Fires once after `delay`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SchedulerShutdown` if the scheduler was shut down.
    pub fn schedule(&self, delay: Duration) -> Result<(), CoreError> {
        self.schedule_with(delay, None, true)
    }

    /// Fires once at `when`, or immediately if `when` has passed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SchedulerShutdown` if the scheduler was shut down.
    pub fn schedule_at(&self, when: Instant) -> Result<(), CoreError> {
        self.schedule(when.saturating_duration_since(Instant::now()))
    }

    /// Fires every `period` at a fixed rate, starting one period from now.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SchedulerShutdown` if the scheduler was shut down.
    pub fn schedule_repeating(&self, period: Duration) -> Result<(), CoreError> {
        self.schedule_with(period, Some(period), true)
    }

    /// Fires after `initial` and then every `repeat`, superseding any earlier schedule.
    ///
    /// With `fixed_rate` the n-th repeat targets `initial + n * repeat` regardless of
    /// how long earlier firings took. Without it, each repeat follows the end of the
    /// previous firing by `repeat`. A `None` or zero `repeat` fires once.
    ///
    /// # Errors
    ///
    /// - `CoreError::FixedDelayRequiresDirect` for fixed-delay repeats on a run-queue
    ///   interval: the delay cannot account for time spent waiting on the queue. The
    ///   current schedule is left untouched.
    /// - `CoreError::SchedulerShutdown` if the scheduler was shut down.
    pub fn schedule_with(
        &self,
        initial: Duration,
        repeat: Option<Duration>,
        fixed_rate: bool,
    ) -> Result<(), CoreError> {
        let repeat = repeat.filter(|period| !period.is_zero()).map(|period| {
            if fixed_rate {
                Repeat::FixedRate(period)
            } else {
                Repeat::FixedDelay(period)
            }
        });
        if matches!(repeat, Some(Repeat::FixedDelay(_)))
            && matches!(self.inner.dispatch, DispatchMode::RunQueue(_))
        {
            return Err(CoreError::FixedDelayRequiresDirect);
        }

        let mut registration = self.inner.registration.lock();
        if let Some(key) = registration.take() {
            self.inner.scheduler.cancel(&key);
        }
        let generation = self.inner.issued.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.current.store(generation, Ordering::Release);

        let task = timer_task(Arc::downgrade(&self.inner), generation, repeat.is_none());
        match self
            .inner
            .scheduler
            .register(Arc::clone(&self.inner.name), task, initial, repeat)
        {
            Ok(key) => {
                *registration = Some(key);
                Ok(())
            }
            Err(error) => {
                self.inner.current.store(IDLE, Ordering::Release);
                Err(error)
            }
        }
    }

    /// Cancels the current schedule. Firings that were already queued on a run queue
    /// will not run the action. Cancelling an idle interval does nothing.
    pub fn cancel(&self) {
        let mut registration = self.inner.registration.lock();
        self.inner.current.store(IDLE, Ordering::Release);
        if let Some(key) = registration.take() {
            self.inner.scheduler.cancel(&key);
        }
    }

    /// True while a schedule is active: until a one-shot fires, or until a repeating
    /// interval is cancelled.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.inner.current.load(Ordering::Acquire) != IDLE
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interval")
            .field("name", &self.inner.name)
            .field("dispatch", &self.inner.dispatch)
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}
