//! Shared timer thread that drives interval registrations.
//!
//! A [`Scheduler`] owns exactly one OS thread. Every [`Interval`](super::Interval)
//! created against it registers its firings here; the timer thread sleeps on a
//! `Condvar` until the earliest registration is due, runs it with the state lock
//! released, and re-arms repeating registrations.
//!
//! The scheduler is an explicit resource: create it, hand clones to whoever needs
//! timers, and call [`Scheduler::shutdown`] (or drop the last clone) to stop the thread.
//!
//! ```
//! use prometheus_invoker::core::{Interval, Scheduler};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::start("doc-timer")?;
//! let interval = Interval::direct(&scheduler, || println!("tick"));
//! interval.schedule(Duration::from_millis(5))?;
//! interval.cancel();
//! scheduler.shutdown();
//! # Ok::<(), prometheus_invoker::core::CoreError>(())
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::util::panic_message;

use super::CoreError;

/// What the timer should do with a registration after running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerControl {
    /// Keep the registration (repeats are re-armed).
    Continue,
    /// Drop the registration.
    Cancel,
}

/// Repeat policy of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Repeat {
    /// The n-th firing targets `first + n * period`, catching up after slow callbacks.
    FixedRate(Duration),
    /// The next firing targets the end of the previous callback plus `period`.
    FixedDelay(Duration),
}

/// Callback run on the timer thread.
pub(crate) type TimerTask = Arc<dyn Fn() -> TimerControl + Send + Sync>;

/// Handle to one registration, used to cancel it.
///
/// The key points at the timer core it was registered with, so cancelling still
/// works after the scheduler has replaced a dead timer thread.
#[derive(Debug, Clone)]
pub(crate) struct TimerKey {
    id: u64,
    core: Weak<TimerCore>,
}

struct TimerEntry {
    next: Instant,
    repeat: Option<Repeat>,
    label: Arc<str>,
    task: TimerTask,
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, TimerEntry>,
    stopped: bool,
}

/// State shared between the scheduler handle and its timer thread.
struct TimerCore {
    state: Mutex<TimerState>,
    wakeup: Condvar,
    alive: AtomicBool,
}

impl std::fmt::Debug for TimerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerCore")
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Marker error: the timer thread behind a core is gone.
struct TimerDead;

impl TimerCore {
    fn new() -> Self {
        Self {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
            alive: AtomicBool::new(true),
        }
    }

    fn insert(&self, id: u64, entry: TimerEntry) -> Result<(), TimerDead> {
        let mut state = self.state.lock();
        if state.stopped || !self.alive.load(Ordering::Acquire) {
            return Err(TimerDead);
        }
        state.heap.push(Reverse((entry.next, id)));
        state.entries.insert(id, entry);
        self.wakeup.notify_one();
        Ok(())
    }

    fn remove(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let removed = state.entries.remove(&id).is_some();
        // cancelled registrations leave stale heap items behind until they come due
        if state.heap.len() > 64 && state.heap.len() > 2 * state.entries.len() {
            let TimerState { heap, entries, .. } = &mut *state;
            *heap = entries
                .iter()
                .map(|(id, entry)| Reverse((entry.next, *id)))
                .collect();
        }
        removed
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.entries.clear();
        state.heap.clear();
        self.wakeup.notify_all();
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

/// Clears the liveness flag however the timer thread exits.
struct AliveGuard<'a>(&'a AtomicBool);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_timer(core: &TimerCore, name: &str) {
    let _alive = AliveGuard(&core.alive);
    debug!(timer = name, "Timer thread started");

    let mut state = core.state.lock();
    loop {
        if state.stopped {
            break;
        }
        let Some(&Reverse((when, id))) = state.heap.peek() else {
            core.wakeup.wait(&mut state);
            continue;
        };
        if when > Instant::now() {
            core.wakeup.wait_until(&mut state, when);
            continue;
        }
        state.heap.pop();

        let (task, label, repeat) = {
            let TimerState { heap, entries, .. } = &mut *state;
            let Some(entry) = entries.get_mut(&id) else {
                // cancelled
                continue;
            };
            if entry.next != when {
                continue;
            }
            let repeat = entry.repeat;
            let fired = (Arc::clone(&entry.task), Arc::clone(&entry.label), repeat);
            if let Some(Repeat::FixedRate(period)) = repeat {
                entry.next = when + period;
                heap.push(Reverse((entry.next, id)));
            } else if repeat.is_none() {
                entries.remove(&id);
            }
            fired
        };

        let control = MutexGuard::unlocked(&mut state, || fire(&task, &label, name));

        match control {
            TimerControl::Cancel => {
                state.entries.remove(&id);
            }
            TimerControl::Continue => {
                if let Some(Repeat::FixedDelay(period)) = repeat {
                    let TimerState { heap, entries, .. } = &mut *state;
                    if let Some(entry) = entries.get_mut(&id) {
                        entry.next = Instant::now() + period;
                        heap.push(Reverse((entry.next, id)));
                    }
                }
            }
        }
    }
    drop(state);
    debug!(timer = name, "Timer thread exiting");
}

fn fire(task: &TimerTask, label: &str, timer: &str) -> TimerControl {
    panic::catch_unwind(AssertUnwindSafe(|| task())).unwrap_or_else(|payload| {
        warn!(
            timer = timer,
            interval = label,
            panic = %panic_message(payload.as_ref()),
            "Timer task panicked"
        );
        TimerControl::Continue
    })
}

struct TimerSlot {
    core: Arc<TimerCore>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

struct SchedulerInner {
    name: String,
    slot: Mutex<TimerSlot>,
    shut_down: AtomicBool,
    next_id: AtomicU64,
    restarts: AtomicU64,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        // stop without joining; the thread exits on its own
        self.slot.get_mut().core.stop();
    }
}

fn spawn_timer(name: &str) -> Result<TimerSlot, CoreError> {
    let core = Arc::new(TimerCore::new());
    let thread_core = Arc::clone(&core);
    let thread_name = name.to_string();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || run_timer(&thread_core, &thread_name))
        .map_err(|source| CoreError::Spawn {
            name: name.to_string(),
            source,
        })?;
    Ok(TimerSlot {
        core,
        thread_id: handle.thread().id(),
        handle: Some(handle),
    })
}

/// Owner of the shared timer thread used by intervals.
///
/// Cloning is cheap; all clones drive the same thread. The timer is stopped by
/// [`shutdown`](Self::shutdown) or when the last clone is dropped.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Starts a scheduler whose timer thread carries `name`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Spawn` if the timer thread cannot be created.
    pub fn start(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        let slot = spawn_timer(&name)?;
        info!(timer = %name, "Scheduler started");
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                name,
                slot: Mutex::new(slot),
                shut_down: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                restarts: AtomicU64::new(0),
            }),
        })
    }

    /// Starts a scheduler from configuration.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for an invalid configuration and
    /// `CoreError::Spawn` if the timer thread cannot be created.
    pub fn new(config: &SchedulerConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        Self::start(config.thread_name.clone())
    }

    /// Name of the timer thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of live registrations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.slot.lock().core.len()
    }

    /// True when called from the timer thread.
    #[must_use]
    pub fn is_timer_thread(&self) -> bool {
        self.inner.slot.lock().thread_id == thread::current().id()
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Number of times a dead timer thread has been replaced.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.inner.restarts.load(Ordering::Relaxed)
    }

    /// Stops the timer thread and drops every pending registration.
    ///
    /// Joins the thread unless called from the timer thread itself. Later
    /// registrations fail with `CoreError::SchedulerShutdown`.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let (core, handle) = {
            let mut slot = self.inner.slot.lock();
            (Arc::clone(&slot.core), slot.handle.take())
        };
        core.stop();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!(timer = %self.inner.name, "Scheduler shut down from its own thread");
            } else if handle.join().is_err() {
                warn!(timer = %self.inner.name, "Timer thread panicked");
            }
        }
        info!(timer = %self.inner.name, "Scheduler shut down");
    }

    /// Registers `task` to first run after `initial`, then per `repeat`.
    ///
    /// If the timer thread has died, a fresh one is started and the registration
    /// is retried once.
    pub(crate) fn register(
        &self,
        label: Arc<str>,
        task: TimerTask,
        initial: Duration,
        repeat: Option<Repeat>,
    ) -> Result<TimerKey, CoreError> {
        if self.is_shut_down() {
            return Err(CoreError::SchedulerShutdown(self.inner.name.clone()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = || TimerEntry {
            next: Instant::now() + initial,
            repeat,
            label: Arc::clone(&label),
            task: Arc::clone(&task),
        };

        let mut slot = self.inner.slot.lock();
        if slot.core.insert(id, entry()).is_ok() {
            return Ok(TimerKey {
                id,
                core: Arc::downgrade(&slot.core),
            });
        }
        if self.is_shut_down() {
            return Err(CoreError::SchedulerShutdown(self.inner.name.clone()));
        }

        warn!(
            timer = %self.inner.name,
            interval = %label,
            "Timer thread is gone, starting a new one"
        );
        *slot = spawn_timer(&self.inner.name)?;
        self.inner.restarts.fetch_add(1, Ordering::Relaxed);
        slot.core
            .insert(id, entry())
            .map_err(|TimerDead| CoreError::SchedulerShutdown(self.inner.name.clone()))?;
        Ok(TimerKey {
            id,
            core: Arc::downgrade(&slot.core),
        })
    }

    /// Removes a registration. Returns false if it already fired or was cancelled.
    pub(crate) fn cancel(&self, key: &TimerKey) -> bool {
        key.core.upgrade().is_some_and(|core| core.remove(key.id))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
