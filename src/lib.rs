//! # Prometheus Invoker
//!
//! Thread-based execution primitives for applications that keep their own event
//! loop and need to push blocking work off it.
//!
//! ## Key Features
//!
//! - **WorkQueue**: growable circular buffer with blocking, timed and
//!   non-blocking dequeue
//! - **Scheduler / Interval**: one timer thread driving cancellable one-shot,
//!   fixed-rate and fixed-delay callbacks, dispatched inline or onto a run queue
//! - **Invoker**: a consumer thread that runs units in order, hands their result
//!   phase back to a receiver and profiles how long each kind of unit takes
//! - **SerialExecutor**: one task at a time, each on a fresh thread with a timeout
//!   after which the thread is abandoned
//!
//! ## Invoker
//!
//! ```rust
//! use prometheus_invoker::config::InvokerConfig;
//! use prometheus_invoker::core::{InlineExecutor, Invoker, Unit};
//! use std::sync::Arc;
//!
//! struct Lookup {
//!     key: u32,
//!     value: Option<u32>,
//! }
//!
//! impl Unit for Lookup {
//!     fn invoke(&mut self) -> bool {
//!         self.value = Some(self.key * 2); // blocking work goes here
//!         true
//!     }
//!
//!     fn handle_result(self: Box<Self>) {
//!         println!("{} -> {:?}", self.key, self.value);
//!     }
//! }
//!
//! let invoker = Invoker::start("lookup", &InvokerConfig::default(), Arc::new(InlineExecutor))?;
//! invoker.post_unit(Lookup { key: 21, value: None })?;
//! invoker.shutdown();
//! invoker.join();
//! # Ok::<(), prometheus_invoker::core::CoreError>(())
//! ```
//!
//! ## SerialExecutor
//!
//! ```rust
//! use prometheus_invoker::core::{InlineExecutor, Scheduler, SerialExecutor};
//! use std::sync::Arc;
//!
//! let scheduler = Scheduler::start("timeouts")?;
//! let serial = SerialExecutor::new(Arc::new(InlineExecutor), &scheduler);
//! serial.execute(|| println!("runs on its own thread"));
//! # Ok::<(), prometheus_invoker::core::CoreError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Work queues, timers and the executors built on top of them.
pub mod core;
/// Configuration models for invokers, the scheduler and the serial executor.
pub mod config;
/// Builders to construct execution components from configuration.
pub mod builders;
/// Receiver executors and run queues backed by threads or async runtimes.
pub mod runtime;
/// Shared utilities.
pub mod util;
