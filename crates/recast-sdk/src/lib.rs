//! Guest SDK for Recast record transforms.
//!
//! A transform is a function from one inbound [`Record`](recast_types::Record)
//! to zero or more routed outputs. [`transform_main!`] binds it to the wasm
//! exports the host drives.

pub mod context;
pub mod emission;
pub mod env;
pub mod error;
mod export;
pub mod host_ffi;
pub mod lifecycle;
pub mod memory;
pub mod prelude;
pub mod runtime;
pub mod transform;

pub use recast_types::{self as types, Status};

pub use error::ShimError;
pub use runtime::TransformRuntime;
pub use transform::{TransformFunction, TransformResult};
