//! Tests for error types

use prometheus_invoker::core::CoreError;
use std::error::Error;

#[test]
fn test_invoker_shutdown_error() {
    let err = CoreError::InvokerShutdown("db".to_string());
    assert_eq!(format!("{}", err), "invoker `db` has been shut down");
}

#[test]
fn test_scheduler_shutdown_error() {
    let err = CoreError::SchedulerShutdown("interval-timer".to_string());
    assert_eq!(format!("{}", err), "scheduler `interval-timer` has been shut down");
}

#[test]
fn test_fixed_delay_error() {
    let err = CoreError::FixedDelayRequiresDirect;
    assert_eq!(
        format!("{}", err),
        "cannot schedule at a fixed delay when dispatching to a run queue"
    );
}

#[test]
fn test_run_queue_stopped_error() {
    let err = CoreError::RunQueueStopped("ui".to_string());
    assert_eq!(format!("{}", err), "run queue `ui` is not running");
}

#[test]
fn test_spawn_error_keeps_source() {
    let err = CoreError::Spawn {
        name: "worker".to_string(),
        source: std::io::Error::other("no threads left"),
    };
    assert_eq!(format!("{}", err), "failed to spawn thread `worker`: no threads left");
    assert!(err.source().is_some());
}

#[test]
fn test_invalid_config_error() {
    let err = CoreError::InvalidConfig("queue_capacity must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: queue_capacity must be greater than 0"
    );
}

#[test]
fn test_app_result_wraps_core_error() {
    fn load() -> prometheus_invoker::core::AppResult<()> {
        let scheduled: Result<(), CoreError> = Err(CoreError::FixedDelayRequiresDirect);
        scheduled?;
        Ok(())
    }
    let err = load().unwrap_err();
    assert!(err.downcast_ref::<CoreError>().is_some());
}
