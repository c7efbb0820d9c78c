//! Receiver executors and run queues backed by threads or async runtimes.

pub mod run_loop;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_spawner;

pub use run_loop::RunLoop;
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioExecutor;
