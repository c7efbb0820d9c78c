//! Configuration models for invokers, the scheduler and the serial executor.

pub mod executor;
pub mod invoker;

pub use executor::{CoreConfig, SchedulerConfig, SerialExecutorConfig};
pub use invoker::InvokerConfig;
