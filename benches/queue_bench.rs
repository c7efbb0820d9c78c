//! Benchmarks for the work queue and the executors built on it.
//!
//! Benchmarks cover:
//! - WorkQueue append/get, including growth from the default capacity
//! - Wrapped prepend/append mixes
//! - Cross-thread hand-off
//! - Invoker unit throughput
//! - Serial executor merge scans

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use prometheus_invoker::config::InvokerConfig;
use prometheus_invoker::core::{
    AbortSignal, ExecutorTask, InlineExecutor, Invoker, Scheduler, SerialExecutor, Unit, WorkQueue,
};

// ============================================================================
// Test Units and Tasks
// ============================================================================

struct CountingUnit {
    counter: Arc<AtomicU64>,
}

impl Unit for CountingUnit {
    fn invoke(&mut self) -> bool {
        self.counter.fetch_add(1, Ordering::Relaxed);
        false
    }
}

struct KeyedTask {
    key: u64,
}

impl ExecutorTask for KeyedTask {
    fn merge(&mut self, other: &dyn ExecutorTask) -> bool {
        let other: &dyn std::any::Any = other;
        other.downcast_ref::<Self>().is_some_and(|other| other.key == self.key)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn execute_task(&self, abort: &AbortSignal) {
        let _ = abort.sleep(Duration::from_secs(30));
    }
}

// ============================================================================
// WorkQueue Benchmarks
// ============================================================================

fn bench_queue_append_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue_append_get");

    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = WorkQueue::new();
                for i in 0..size {
                    queue.append(i);
                }
                while let Some(item) = queue.get_non_blocking() {
                    black_box(item);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_wrapped_mix(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue_wrapped_mix");

    for size in [1_000_u64, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = WorkQueue::with_capacity(64);
                for i in 0..size {
                    if i % 3 == 0 {
                        queue.prepend(i);
                    } else {
                        queue.append(i);
                    }
                    if i % 2 == 0 {
                        black_box(queue.get_non_blocking());
                    }
                }
                queue.clear();
            });
        });
    }
    group.finish();
}

fn bench_queue_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue_handoff");
    let items = 10_000_u64;
    group.throughput(Throughput::Elements(items));

    group.bench_function("one_producer_one_consumer", |b| {
        b.iter(|| {
            let queue = Arc::new(WorkQueue::new());
            let producer = Arc::clone(&queue);
            let handle = thread::spawn(move || {
                for i in 0..items {
                    producer.append(i);
                }
            });
            for _ in 0..items {
                black_box(queue.get());
            }
            handle.join().unwrap();
        });
    });
    group.finish();
}

// ============================================================================
// Executor Benchmarks
// ============================================================================

fn bench_invoker_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("invoker_throughput");

    for units in [100_u64, 1_000] {
        group.throughput(Throughput::Elements(units));
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, &units| {
            let config = InvokerConfig::default();
            let receiver = Arc::new(InlineExecutor);
            let invoker = Invoker::start("bench-invoker", &config, receiver).unwrap();
            let counter = Arc::new(AtomicU64::new(0));
            b.iter(|| {
                for _ in 0..units {
                    invoker
                        .post_unit(CountingUnit {
                            counter: Arc::clone(&counter),
                        })
                        .unwrap();
                }
                let (tx, rx) = mpsc::channel();
                invoker
                    .request_profiles(move |_| {
                        let _ = tx.send(());
                    })
                    .unwrap();
                rx.recv().unwrap();
            });
            invoker.shutdown();
            invoker.join();
        });
    }
    group.finish();
}

fn bench_serial_merge_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("serial_merge_scan");

    for pending in [10_u64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(pending), &pending, |b, &pending| {
            let scheduler = Scheduler::start("bench-serial-timer").unwrap();
            let serial = SerialExecutor::new(Arc::new(InlineExecutor), &scheduler);
            // the first task occupies the worker so the rest stay pending
            for key in 0..=pending {
                serial.add_task(KeyedTask { key });
            }
            b.iter(|| serial.add_task(KeyedTask { key: black_box(pending) }));
            black_box(serial.queue_size());
            scheduler.shutdown();
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_append_get,
    bench_queue_wrapped_mix,
    bench_queue_handoff
);

criterion_group!(executor_benches, bench_invoker_throughput, bench_serial_merge_scan);

criterion_main!(queue_benches, executor_benches);
