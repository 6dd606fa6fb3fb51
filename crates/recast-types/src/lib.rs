//! Shared Recast record model, wire codec, and bridge protocol types.
//!
//! This crate is dependency-boundary-safe for both the host runtime and the
//! guest SDK: nothing in here touches wasmtime or the guest allocator.

pub mod abi;
pub mod codec;
pub mod error;
pub mod limits;
pub mod meta;
pub mod record;
pub mod status;

pub use codec::CodecError;
pub use error::{BackoffClass, Diagnostic, FailureKind, TransformError};
pub use limits::EmissionLimits;
pub use meta::InvocationMeta;
pub use record::{Header, Record, Routed};
pub use status::Status;
