//! Tokio runtime executor implementation.

use std::sync::Arc;

use tracing::warn;

use crate::core::{Executor, Job};
use crate::util::panic_message;

/// Receiver executor that runs jobs as blocking tasks on a tokio runtime.
///
/// Jobs may be posted from any thread, including threads outside the runtime.
/// Ordering between jobs is not preserved.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Arc<tokio::runtime::Handle>,
}

impl TokioExecutor {
    /// Create a new `TokioExecutor` from a tokio runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Create a `TokioExecutor` for the runtime the caller is running in.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, job: Job) {
        let task = self.handle.spawn_blocking(job);
        self.handle.spawn(async move {
            if let Err(error) = task.await {
                if error.is_panic() {
                    let payload = error.into_panic();
                    warn!(panic = %panic_message(payload.as_ref()), "Tokio executor job failed");
                }
            }
        });
    }
}

impl std::fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioExecutor").finish_non_exhaustive()
    }
}
