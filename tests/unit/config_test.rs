//! Tests for configuration validation

use prometheus_invoker::config::{CoreConfig, InvokerConfig, SchedulerConfig, SerialExecutorConfig};
use std::io::Write;

#[test]
fn test_invoker_config_validation() {
    assert!(InvokerConfig::default().validate().is_ok());
    assert!(InvokerConfig::default().with_long_threshold_ms(0).validate().is_err());
    assert!(InvokerConfig::default().with_profile_bucket_width_ms(0).validate().is_err());
    assert!(InvokerConfig::default().with_profile_bucket_count(0).validate().is_err());
    assert!(InvokerConfig::default().with_queue_capacity(0).validate().is_err());
}

#[test]
fn test_serial_config_validation() {
    let cfg = SerialExecutorConfig::default();
    assert_eq!(cfg.default_timeout_ms, 30_000);
    assert!(cfg.validate().is_ok());
    assert!(cfg.clone().with_default_timeout_ms(0).validate().is_err());
    assert!(cfg.with_thread_name_prefix("  ").validate().is_err());
}

#[test]
fn test_scheduler_config_validation() {
    assert_eq!(SchedulerConfig::default().thread_name, "interval-timer");
    assert!(SchedulerConfig::default().with_thread_name("").validate().is_err());
}

#[test]
fn test_core_config_from_json() {
    let json = r#"{
        "scheduler": { "thread_name": "app-timer" },
        "serial": { "default_timeout_ms": 1000 },
        "invokers": {
            "db": { "long_threshold_ms": 250 },
            "net": {}
        }
    }"#;
    let cfg = CoreConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.scheduler.thread_name, "app-timer");
    assert_eq!(cfg.serial.default_timeout_ms, 1000);
    assert_eq!(cfg.serial.thread_name_prefix, "serial-task");
    assert_eq!(cfg.invokers["db"].long_threshold_ms, 250);
    assert_eq!(cfg.invokers["db"].profile_bucket_count, 10);
    assert_eq!(cfg.invokers["net"], InvokerConfig::default());
}

#[test]
fn test_core_config_rejects_invalid_invoker() {
    let json = r#"{ "invokers": { "db": { "queue_capacity": 0 } } }"#;
    let err = CoreConfig::from_json_str(json).unwrap_err();
    assert!(err.contains("invoker `db` invalid"), "{err}");
}

#[test]
fn test_core_config_parse_error() {
    let err = CoreConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_core_config_from_file() {
    let file_name = format!("prometheus-invoker-config-{}.json", std::process::id());
    let path = std::env::temp_dir().join(file_name);
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, r#"{{ "invokers": {{ "main": {{ "long_threshold_ms": 100 }} }} }}"#).unwrap();
    drop(file);

    let cfg = CoreConfig::from_json_file(&path).unwrap();
    assert_eq!(cfg.invokers["main"].long_threshold_ms, 100);
    std::fs::remove_file(&path).unwrap();

    let err = CoreConfig::from_json_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("reading config file"));
}
