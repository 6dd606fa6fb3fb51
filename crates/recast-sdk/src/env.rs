//! Transform environment lookups.
//!
//! Values come from the `env` map of the transform's deployment config and
//! are served by the host, not the process environment.

use crate::host_ffi;

pub fn var(key: &str) -> Option<String> {
    host_ffi::host_imports().env_get(key)
}

pub fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}
