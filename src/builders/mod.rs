//! Builders to construct execution components from configuration.

pub mod invoker_builder;

pub use invoker_builder::{build_invokers, build_scheduler, build_serial_executor};
