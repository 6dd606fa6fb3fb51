//! Wasmtime host runtime for Recast record transforms.
//!
//! Loads guest modules, implements the `recast` host imports, and drives
//! guests one record at a time with redelivery, dead-lettering and
//! per-partition parallelism.

#![warn(clippy::pedantic)]

pub mod bridge;
pub mod config;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod host_state;
mod memory;
pub mod native;
pub mod partitioned;
pub mod retry;
pub mod runner;
pub mod sandbox;
pub mod sink;
pub mod wasm;

pub use bridge::{Delivery, GuestFactory, GuestInstance, GuestSettings, InvocationReport};
pub use error::{Result, RuntimeError};
pub use native::NativeTransform;
pub use partitioned::{PartitionReport, PartitionedRunner};
pub use runner::{DeliveryOutcome, RunReport, RunSummary, RunnerOptions, TransformRunner};
pub use sink::{ChannelSink, MemorySink, RecordSink};
pub use wasm::WasmTransformModule;
