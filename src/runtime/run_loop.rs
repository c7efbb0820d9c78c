//! A named thread that runs posted jobs in order.
//!
//! `RunLoop` is the simplest receiver and dispatch target: it implements both
//! [`Executor`] and [`RunQueue`], so invokers, serial executors and intervals can
//! all deliver work to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::{CoreError, Executor, Job, RunQueue};
use crate::util::panic_message;

/// Event loop thread backed by an unbounded channel.
pub struct RunLoop {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    running: Arc<AtomicBool>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RunLoop {
    /// Spawns the loop thread.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Spawn` if the thread cannot be created.
    pub fn start(name: impl Into<String>) -> Result<Self, CoreError> {
        let name = name.into();
        let (tx, rx) = unbounded::<Job>();
        let running = Arc::new(AtomicBool::new(true));

        let loop_name = name.clone();
        let loop_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&loop_name, &rx, &loop_running))
            .map_err(|source| CoreError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            running,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Name of the loop thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops accepting jobs. Jobs already posted still run before the thread exits.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            info!(run_loop = %self.name, "Run loop shutdown requested");
        }
    }

    /// Waits for the loop thread to exit. Does nothing on the loop thread itself.
    pub fn join(&self) {
        if thread::current().id() == self.thread_id {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(run_loop = %self.name, "Run loop thread panicked");
            }
        }
    }

    /// True while the loop accepts jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.sender.lock().is_some()
    }

    /// True when called from the loop thread.
    #[must_use]
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

fn run_loop(name: &str, jobs: &Receiver<Job>, running: &AtomicBool) {
    info!(run_loop = %name, "Run loop started");
    // recv fails once every sender is gone and the channel is drained
    while let Ok(job) = jobs.recv() {
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            warn!(
                run_loop = %name,
                panic = %panic_message(payload.as_ref()),
                "Run loop job failed"
            );
        }
    }
    running.store(false, Ordering::Release);
    info!(run_loop = %name, "Run loop exited");
}

impl RunQueue for RunLoop {
    fn post(&self, job: Job) -> Result<(), CoreError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(CoreError::RunQueueStopped(self.name.clone()));
        };
        tx.send(job)
            .map_err(|_| CoreError::RunQueueStopped(self.name.clone()))?;
        debug!(run_loop = %self.name, queued = tx.len(), "Job posted");
        Ok(())
    }

    fn is_dispatch_thread(&self) -> bool {
        Self::is_dispatch_thread(self)
    }

    fn is_running(&self) -> bool {
        Self::is_running(self)
    }
}

impl Executor for RunLoop {
    fn execute(&self, job: Job) {
        if let Err(error) = self.post(job) {
            warn!(run_loop = %self.name, %error, "Dropping job posted to run loop");
        }
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
