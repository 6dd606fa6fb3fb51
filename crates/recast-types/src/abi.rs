//! Names and return codes of the guest/host ABI.
//!
//! Guest exports take and return plain `i32` values; data crosses as
//! `(ptr, len)` pairs into guest linear memory.

/// Wasm import module that hosts the `recast` host functions.
pub const IMPORT_MODULE: &str = "recast";

/// Host import: `write_record(topic_ptr, topic_len, rec_ptr, rec_len) -> i32`.
pub const HOST_WRITE_RECORD: &str = "write_record";
/// Host import: `read_metadata(out_ptr, out_cap) -> i32`.
pub const HOST_READ_METADATA: &str = "read_metadata";
/// Host import: `report_error(ptr, len)`.
pub const HOST_REPORT_ERROR: &str = "report_error";
/// Host import: `log(level, ptr, len)`.
pub const HOST_LOG: &str = "log";
/// Host import: `env_get(key_ptr, key_len, out_ptr, out_cap) -> i32`.
pub const HOST_ENV_GET: &str = "env_get";

/// Guest export: linear memory.
pub const GUEST_MEMORY: &str = "memory";
/// Guest export: `recast_alloc(size) -> ptr`.
pub const GUEST_ALLOC: &str = "recast_alloc";
/// Guest export: `recast_dealloc(ptr, capacity)`.
pub const GUEST_DEALLOC: &str = "recast_dealloc";
/// Guest export: `setup() -> status`.
pub const GUEST_SETUP: &str = "setup";
/// Guest export: `on_record_written(ptr, len) -> status`.
pub const GUEST_ON_RECORD_WRITTEN: &str = "on_record_written";
/// Guest export: `teardown() -> status`.
pub const GUEST_TEARDOWN: &str = "teardown";

/// `write_record` accepted the record.
pub const WRITE_OK: i32 = 0;
/// `write_record` arguments could not be read or decoded.
pub const WRITE_MALFORMED: i32 = -1;
/// `write_record` named a topic the transform may not write to.
pub const WRITE_UNKNOWN_TOPIC: i32 = -2;

/// `env_get` found no such key.
pub const ENV_NOT_FOUND: i32 = -1;
