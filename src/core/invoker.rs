//! A dedicated consumer thread that runs posted units strictly in order.
//!
//! Each [`Unit`] runs its `invoke` phase on the invoker thread. When `invoke`
//! returns `true`, the unit's `handle_result` phase is handed to the receiver
//! [`Executor`], which is typically the caller's own loop. The invoker times every
//! unit, keeps a millisecond histogram per unit type and logs units that run longer
//! than their threshold.
//!
//! # Design
//!
//! - **Single consumer**: one thread drains one [`WorkQueue`], so units never overlap
//! - **Drain on shutdown**: shutdown enqueues a marker behind all earlier units
//! - **Thread-owned profiles**: the profile table never leaves the invoker thread;
//!   [`Invoker::request_profiles`] runs a reader there

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::InvokerConfig;
use crate::util::panic_message;

use super::{CoreError, Executor, Job, RunQueue, UnitProfile, WorkQueue};

/// Profile key under which the time units spend queued is recorded.
pub const QUEUE_WAIT_KEY: &str = "queue_wait_time";

/// Per-unit-type timing profiles, keyed by [`Unit::profile_key`].
pub type ProfileTable = HashMap<&'static str, UnitProfile>;

/// A piece of work executed by an [`Invoker`].
pub trait Unit: Send + 'static {
    /// Runs on the invoker thread. Return `true` to have
    /// [`handle_result`](Self::handle_result) called on the receiver.
    fn invoke(&mut self) -> bool;

    /// Runs on the receiver executor after a successful `invoke`.
    fn handle_result(self: Box<Self>) {}

    /// Overrides the invoker's long-unit threshold for this unit.
    fn long_threshold(&self) -> Option<Duration> {
        None
    }

    /// Extra context included when this unit is reported as long-running.
    fn detail(&self) -> Option<String> {
        None
    }

    /// Name used in log output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Key this unit's timings are aggregated under.
    fn profile_key(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Wraps a plain job as a unit with no result phase.
struct JobUnit {
    job: Option<Job>,
}

impl Unit for JobUnit {
    fn invoke(&mut self) -> bool {
        if let Some(job) = self.job.take() {
            job();
        }
        false
    }
}

enum Envelope {
    Unit {
        unit: Box<dyn Unit>,
        queued_at: Instant,
    },
    Report(Box<dyn FnOnce(&ProfileTable) + Send>),
    Shutdown,
}

/// Invoker statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerStats {
    /// Units whose `invoke` phase completed without panicking.
    pub processed_units: u64,
    /// Units whose `invoke` phase panicked.
    pub failed_units: u64,
    /// Units that exceeded their long threshold.
    pub long_units: u64,
    /// Units still waiting in the queue.
    pub pending_units: usize,
}

#[derive(Default)]
struct InvokerCounters {
    processed_units: AtomicU64,
    failed_units: AtomicU64,
    long_units: AtomicU64,
}

impl InvokerCounters {
    fn snapshot(&self, pending_units: usize) -> InvokerStats {
        InvokerStats {
            processed_units: self.processed_units.load(Ordering::Relaxed),
            failed_units: self.failed_units.load(Ordering::Relaxed),
            long_units: self.long_units.load(Ordering::Relaxed),
            pending_units,
        }
    }
}

struct Shared {
    name: Arc<str>,
    queue: WorkQueue<Envelope>,
    receiver: Arc<dyn Executor>,
    shutdown_requested: AtomicBool,
    running: AtomicBool,
    long_threshold_ms: AtomicU64,
    /// Units queued and not yet picked up; control envelopes are not counted.
    queued_units: AtomicUsize,
    bucket_width: Duration,
    bucket_count: usize,
    counters: InvokerCounters,
}

impl Shared {
    fn record(&self, profiles: &mut ProfileTable, key: &'static str, elapsed: Duration) {
        profiles
            .entry(key)
            .or_insert_with(|| UnitProfile::new(self.bucket_width, self.bucket_count))
            .record(elapsed);
    }

    fn process(&self, profiles: &mut ProfileTable, mut unit: Box<dyn Unit>, queued_at: Instant) {
        let started = Instant::now();
        self.record(profiles, QUEUE_WAIT_KEY, started.duration_since(queued_at));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| unit.invoke()));
        let elapsed = started.elapsed();
        self.record(profiles, unit.profile_key(), elapsed);

        let default_ms = self.long_threshold_ms.load(Ordering::Relaxed);
        let threshold = unit
            .long_threshold()
            .unwrap_or_else(|| Duration::from_millis(default_ms));
        if elapsed > threshold {
            self.counters.long_units.fetch_add(1, Ordering::Relaxed);
            let detail = unit.detail().unwrap_or_default();
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            let message = if elapsed >= threshold.saturating_mul(10) {
                "Really long invoker unit"
            } else {
                "Long invoker unit"
            };
            warn!(invoker = %self.name, unit = unit.name(), elapsed_ms, %detail, "{message}");
        }

        match outcome {
            Ok(true) => {
                self.counters.processed_units.fetch_add(1, Ordering::Relaxed);
                let invoker = Arc::clone(&self.name);
                self.receiver.execute(Box::new(move || {
                    let name = unit.name().to_string();
                    let handled =
                        panic::catch_unwind(AssertUnwindSafe(move || unit.handle_result()));
                    if let Err(payload) = handled {
                        warn!(
                            invoker = %invoker,
                            unit = %name,
                            panic = %panic_message(payload.as_ref()),
                            "Invocation result handler failed"
                        );
                    }
                }));
            }
            Ok(false) => {
                self.counters.processed_units.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.counters.failed_units.fetch_add(1, Ordering::Relaxed);
                warn!(
                    invoker = %self.name,
                    unit = unit.name(),
                    panic = %panic_message(payload.as_ref()),
                    "Invocation unit failed"
                );
            }
        }
    }
}

/// Clears the running flag however the invoker thread exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_invoker(shared: &Shared) {
    let _running = RunningGuard(&shared.running);
    info!(invoker = %shared.name, "Invoker thread started");
    let mut profiles = ProfileTable::new();
    loop {
        match shared.queue.get() {
            Envelope::Unit { unit, queued_at } => {
                shared.queued_units.fetch_sub(1, Ordering::AcqRel);
                let name = unit.name().to_string();
                let processed = panic::catch_unwind(AssertUnwindSafe(|| {
                    shared.process(&mut profiles, unit, queued_at);
                }));
                if let Err(payload) = processed {
                    shared.counters.failed_units.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        invoker = %shared.name,
                        unit = %name,
                        panic = %panic_message(payload.as_ref()),
                        "Invoker failed to process unit"
                    );
                }
            }
            Envelope::Report(report) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| report(&profiles))) {
                    warn!(
                        invoker = %shared.name,
                        panic = %panic_message(payload.as_ref()),
                        "Profile report failed"
                    );
                }
            }
            Envelope::Shutdown => break,
        }
    }
    info!(invoker = %shared.name, "Invoker thread exited");
}

/// Runs units in order on a dedicated thread.
pub struct Invoker {
    shared: Arc<Shared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Invoker {
    /// Validates `config` and starts the invoker thread, named `name`.
    ///
    /// Result phases of units are delivered through `receiver`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for an invalid configuration and
    /// `CoreError::Spawn` if the thread cannot be created.
    pub fn start(
        name: impl Into<String>,
        config: &InvokerConfig,
        receiver: Arc<dyn Executor>,
    ) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        let name: String = name.into();
        let shared = Arc::new(Shared {
            name: Arc::from(name.as_str()),
            queue: WorkQueue::with_capacity(config.queue_capacity),
            receiver,
            shutdown_requested: AtomicBool::new(false),
            running: AtomicBool::new(true),
            long_threshold_ms: AtomicU64::new(config.long_threshold_ms),
            queued_units: AtomicUsize::new(0),
            bucket_width: Duration::from_millis(config.profile_bucket_width_ms),
            bucket_count: config.profile_bucket_count,
            counters: InvokerCounters::default(),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_invoker(&worker))
            .map_err(|source| CoreError::Spawn { name, source })?;

        Ok(Self {
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Name of the invoker thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queues `unit` behind everything posted before it.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvokerShutdown` once shutdown has been requested.
    pub fn post_unit(&self, unit: impl Unit) -> Result<(), CoreError> {
        self.post_boxed(Box::new(unit))
    }

    /// Queues a boxed unit.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvokerShutdown` once shutdown has been requested.
    pub fn post_boxed(&self, unit: Box<dyn Unit>) -> Result<(), CoreError> {
        if self.shutdown_requested() {
            return Err(CoreError::InvokerShutdown(self.shared.name.to_string()));
        }
        debug!(invoker = %self.shared.name, unit = unit.name(), "Unit posted");
        self.shared.queued_units.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.append(Envelope::Unit {
            unit,
            queued_at: Instant::now(),
        });
        Ok(())
    }

    /// Queues a closure to run on the invoker thread, with no result phase.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvokerShutdown` once shutdown has been requested.
    pub fn execute<F>(&self, f: F) -> Result<(), CoreError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_boxed(Box::new(JobUnit {
            job: Some(Box::new(f)),
        }))
    }

    /// Units waiting in the queue, not counting one that is running now.
    #[must_use]
    pub fn pending_units(&self) -> usize {
        self.shared.queued_units.load(Ordering::Acquire)
    }

    /// Requests shutdown. Units already posted still run; later posts fail.
    pub fn shutdown(&self) {
        if self.shared.shutdown_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = self.pending_units();
        info!(invoker = %self.shared.name, pending, "Invoker shutdown requested");
        self.shared.queue.append(Envelope::Shutdown);
    }

    /// Waits for the invoker thread to exit. Does nothing when called from the
    /// invoker thread or after a previous join.
    pub fn join(&self) {
        if self.is_dispatch_thread() {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(invoker = %self.shared.name, "Invoker thread panicked");
            }
        }
    }

    /// True when called from the invoker thread.
    #[must_use]
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Sets the default duration above which units are reported as long.
    pub fn set_long_threshold(&self, threshold: Duration) {
        let millis = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self.shared.long_threshold_ms.store(millis, Ordering::Relaxed);
    }

    /// Default long-unit threshold.
    #[must_use]
    pub fn long_threshold(&self) -> Duration {
        Duration::from_millis(self.shared.long_threshold_ms.load(Ordering::Relaxed))
    }

    /// True while the thread is alive and shutdown has not been requested.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire) && !self.shutdown_requested()
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shared.shutdown_requested.load(Ordering::Acquire)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> InvokerStats {
        self.shared.counters.snapshot(self.pending_units())
    }

    /// Runs `report` with the profile table on the invoker thread, after every unit
    /// posted before this call.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvokerShutdown` once shutdown has been requested.
    pub fn request_profiles<F>(&self, report: F) -> Result<(), CoreError>
    where
        F: FnOnce(&ProfileTable) + Send + 'static,
    {
        if self.shutdown_requested() {
            return Err(CoreError::InvokerShutdown(self.shared.name.to_string()));
        }
        self.shared.queue.append(Envelope::Report(Box::new(report)));
        Ok(())
    }
}

impl Executor for Invoker {
    fn execute(&self, job: Job) {
        if let Err(error) = self.post_boxed(Box::new(JobUnit { job: Some(job) })) {
            warn!(invoker = %self.shared.name, %error, "Dropping job posted to invoker");
        }
    }
}

impl RunQueue for Invoker {
    fn post(&self, job: Job) -> Result<(), CoreError> {
        self.post_boxed(Box::new(JobUnit { job: Some(job) }))
    }

    fn is_dispatch_thread(&self) -> bool {
        Self::is_dispatch_thread(self)
    }

    fn is_running(&self) -> bool {
        Self::is_running(self)
    }
}

impl Drop for Invoker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("name", &self.shared.name)
            .field("pending_units", &self.pending_units())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
