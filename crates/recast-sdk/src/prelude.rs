//! Convenience re-exports for transform authors.
//!
//! ```ignore
//! use recast_sdk::prelude::*;
//! ```

// Transform trait and runtime
pub use crate::runtime::TransformRuntime;
pub use crate::transform::{TransformFunction, TransformResult};

// Context and logging
pub use crate::context::InvocationContext;
pub use crate::host_ffi::LogLevel;

// Records and errors
pub use recast_types::{BackoffClass, Header, Record, Routed, TransformError};

// Host interop
pub use crate::env;
pub use crate::error::ShimError;
