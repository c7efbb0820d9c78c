//! Builders to construct invokers and executors from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{CoreConfig, InvokerConfig};
use crate::core::{CoreError, Executor, Invoker, Scheduler, SerialExecutor};

/// Start one invoker per configured name, with receivers from `receiver_factory`.
///
/// If any invoker fails to start, the ones already started are shut down.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` for an invalid configuration, or the first
/// error from the factory or from starting an invoker.
pub fn build_invokers<F>(
    cfg: &CoreConfig,
    mut receiver_factory: F,
) -> Result<HashMap<String, Invoker>, CoreError>
where
    F: FnMut(&str, &InvokerConfig) -> Result<Arc<dyn Executor>, CoreError>,
{
    cfg.validate()
        .map_err(|e| CoreError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut invokers = HashMap::new();
    for (name, invoker_cfg) in &cfg.invokers {
        let receiver = receiver_factory(name, invoker_cfg)?;
        let invoker = Invoker::start(name.clone(), invoker_cfg, receiver)?;
        invokers.insert(name.clone(), invoker);
    }

    Ok(invokers)
}

/// Start the scheduler described by `cfg`.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` or `CoreError::Spawn`.
pub fn build_scheduler(cfg: &CoreConfig) -> Result<Scheduler, CoreError> {
    Scheduler::new(&cfg.scheduler)
}

/// Create the serial executor described by `cfg`, timed by `scheduler`.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` for an invalid serial executor section.
pub fn build_serial_executor(
    cfg: &CoreConfig,
    scheduler: &Scheduler,
    receiver: Arc<dyn Executor>,
) -> Result<SerialExecutor, CoreError> {
    SerialExecutor::with_config(receiver, scheduler, cfg.serial.clone())
}
