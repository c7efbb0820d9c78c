//! Work queues, timers and the executors built on top of them.

pub mod error;
pub mod executor;
pub mod histogram;
pub mod interval;
pub mod invoker;
pub mod scheduler;
pub mod serial_executor;
pub mod work_queue;

pub use error::{AppResult, CoreError};
pub use executor::{Executor, InlineExecutor, Job, RunQueue};
pub use histogram::{Histogram, UnitProfile};
pub use interval::{DispatchMode, Interval};
pub use invoker::{Invoker, InvokerStats, ProfileTable, Unit, QUEUE_WAIT_KEY};
pub use scheduler::Scheduler;
pub use serial_executor::{AbortSignal, Aborted, ExecutorTask, SerialExecutor, SerialStats};
pub use work_queue::WorkQueue;
