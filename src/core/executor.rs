//! Execution-context traits shared by the invoker, intervals and the serial executor.

use std::sync::Arc;

use super::CoreError;

/// A boxed unit of work handed between execution contexts.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A context that runs jobs handed to it, such as a UI thread or another loop.
///
/// The invoker and serial executor use an `Executor` as their *receiver*: result
/// phases, completion callbacks and timeout notifications are delivered through it.
///
/// Any `Fn(Job)` closure is an executor, which keeps test receivers short:
///
/// ```
/// use prometheus_invoker::core::{Executor, Job};
///
/// let inline = |job: Job| job();
/// inline.execute(Box::new(|| println!("ran inline")));
/// ```
pub trait Executor: Send + Sync {
    /// Runs `job` in this executor's context, now or later.
    fn execute(&self, job: Job);
}

impl<F> Executor for F
where
    F: Fn(Job) + Send + Sync,
{
    fn execute(&self, job: Job) {
        self(job);
    }
}

/// A target that intervals can post their firings to.
pub trait RunQueue: Send + Sync {
    /// Queues `job` to run on this target's thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the target refuses the job, typically because it is
    /// shutting down.
    fn post(&self, job: Job) -> Result<(), CoreError>;

    /// True when called from the thread this target runs its jobs on.
    fn is_dispatch_thread(&self) -> bool;

    /// True while the target is accepting work.
    fn is_running(&self) -> bool;
}

impl<Q: RunQueue + ?Sized> RunQueue for Arc<Q> {
    fn post(&self, job: Job) -> Result<(), CoreError> {
        (**self).post(job)
    }

    fn is_dispatch_thread(&self) -> bool {
        (**self).is_dispatch_thread()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}

/// Executor that runs every job immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_executor() {
        let seen = Arc::new(AtomicUsize::new(0));
        let executor = |job: Job| job();
        let counter = Arc::clone(&seen);
        executor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_executor_delegates() {
        let executor: Arc<dyn Executor> = Arc::new(InlineExecutor);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        executor.execute(Box::new(move || {
            counter.fetch_add(2, Ordering::SeqCst);
        }));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
