//! Tests for builder modules

use prometheus_invoker::builders::{build_invokers, build_scheduler, build_serial_executor};
use prometheus_invoker::config::{CoreConfig, InvokerConfig};
use prometheus_invoker::core::{CoreError, Executor, InlineExecutor};
use std::sync::{mpsc, Arc};
use std::time::Duration;

fn config_with(names: &[&str]) -> CoreConfig {
    let mut cfg = CoreConfig::default();
    for name in names {
        cfg.invokers.insert((*name).to_string(), InvokerConfig::default());
    }
    cfg
}

#[test]
fn test_build_invokers_starts_each() {
    let cfg = config_with(&["builder-a", "builder-b"]);
    let mut seen = Vec::new();
    let invokers = build_invokers(&cfg, |name, _| {
        seen.push(name.to_string());
        Ok(Arc::new(InlineExecutor) as Arc<dyn Executor>)
    })
    .unwrap();

    seen.sort();
    assert_eq!(seen, vec!["builder-a", "builder-b"]);
    assert_eq!(invokers.len(), 2);
    for (name, invoker) in &invokers {
        assert_eq!(invoker.name(), name);
        assert!(invoker.is_running());
        invoker.shutdown();
        invoker.join();
    }
}

#[test]
fn test_build_invokers_propagates_factory_error() {
    let cfg = config_with(&["builder-failing"]);
    let result = build_invokers(&cfg, |name, _| Err(CoreError::RunQueueStopped(name.to_string())));
    assert!(matches!(result, Err(CoreError::RunQueueStopped(_))));
}

#[test]
fn test_build_invokers_rejects_invalid_config() {
    let mut cfg = config_with(&["builder-invalid"]);
    cfg.invokers.insert("zero".into(), InvokerConfig::default().with_queue_capacity(0));
    let result = build_invokers(&cfg, |_, _| Ok(Arc::new(InlineExecutor) as Arc<dyn Executor>));
    assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
}

#[test]
fn test_build_scheduler_and_serial_executor() {
    let mut cfg = CoreConfig::default();
    cfg.scheduler.thread_name = "builder-timer".into();
    cfg.serial.default_timeout_ms = 2_000;
    let scheduler = build_scheduler(&cfg).unwrap();
    assert_eq!(scheduler.name(), "builder-timer");

    let serial = build_serial_executor(&cfg, &scheduler, Arc::new(InlineExecutor)).unwrap();
    assert_eq!(serial.default_timeout(), Duration::from_secs(2));
    let (tx, rx) = mpsc::channel();
    serial.execute(move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(1)).unwrap();
    scheduler.shutdown();
}
