//! Tests for runtime executors

use prometheus_invoker::core::{Executor, RunQueue};
use prometheus_invoker::runtime::RunLoop;
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[test]
fn test_run_loop_drains_before_exit() {
    let run_loop = RunLoop::start("unit-run-loop").unwrap();
    let (tx, rx) = mpsc::channel();
    for i in 0..50 {
        let tx = tx.clone();
        run_loop.post(Box::new(move || tx.send(i).unwrap())).unwrap();
    }
    drop(tx);
    run_loop.shutdown();
    run_loop.join();
    assert_eq!(rx.iter().collect::<Vec<_>>(), (0..50).collect::<Vec<_>>());
    assert!(!run_loop.is_running());
}

#[test]
fn test_run_loop_as_shared_executor() {
    let run_loop = Arc::new(RunLoop::start("unit-shared-loop").unwrap());
    let executor: Arc<dyn Executor> = run_loop.clone();
    let (tx, rx) = mpsc::channel();
    executor.execute(Box::new(move || tx.send("ran").unwrap()));
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "ran");
    assert!(!RunQueue::is_dispatch_thread(&*run_loop));
    run_loop.shutdown();
    run_loop.join();
}

#[cfg(feature = "tokio-runtime")]
#[test]
fn test_tokio_executor_from_handle() {
    use prometheus_invoker::runtime::TokioExecutor;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let executor = TokioExecutor::new(runtime.handle().clone());
    let (tx, rx) = mpsc::channel();
    // posted from a thread outside the runtime
    executor.execute(Box::new(move || tx.send(42).unwrap()));
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
}
