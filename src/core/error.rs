//! Error types for invoker, scheduler and executor operations.

use thiserror::Error;

/// Errors surfaced synchronously to callers of the execution core.
///
/// Failures that happen inside units, interval callbacks or serial tasks are never
/// returned through this type; they are caught and logged where they happen.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Work was posted to an invoker after its shutdown was requested.
    #[error("invoker `{0}` has been shut down")]
    InvokerShutdown(String),
    /// A registration was attempted on a scheduler that was shut down.
    #[error("scheduler `{0}` has been shut down")]
    SchedulerShutdown(String),
    /// Fixed-delay repeats were requested for an interval that dispatches to a run queue.
    #[error("cannot schedule at a fixed delay when dispatching to a run queue")]
    FixedDelayRequiresDirect,
    /// A job was posted to a run queue that is no longer accepting work.
    #[error("run queue `{0}` is not running")]
    RunQueueStopped(String),
    /// An OS thread could not be spawned.
    #[error("failed to spawn thread `{name}`: {source}")]
    Spawn {
        /// Name requested for the thread.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
