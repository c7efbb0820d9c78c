//! Tests for utility modules

use prometheus_invoker::util::{init_tracing, init_tracing_with_default, panic_message};

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing_with_default("prometheus_invoker=debug");
    init_tracing();
    tracing::info!(component = "util_test", "tracing initialized");
}

#[test]
fn test_panic_message_from_thread() {
    let payload = std::thread::spawn(|| panic!("worker {} failed", 3))
        .join()
        .unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "worker 3 failed");
}
