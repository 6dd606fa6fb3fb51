//! Per-invocation context handed to the transform function.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use recast_types::InvocationMeta;

use crate::host_ffi::{HostImports, LogLevel};

/// Metadata for the record being processed, plus host delegation.
///
/// Scoped to one invocation; a fresh context is built for every record.
///
/// ```ignore
/// if ctx.remaining_ms().is_some_and(|ms| ms < 5) {
///     return Err(TransformError::retryable("DEADLINE", "not enough time left"));
/// }
/// ctx.log(LogLevel::Debug, "enriching record");
/// ```
#[derive(Clone)]
pub struct InvocationContext {
    partition: i32,
    offset: i64,
    sequence: u64,
    attempt: u32,
    deadline_ms: Option<i64>,
    host: Arc<dyn HostImports>,
}

impl InvocationContext {
    pub fn new(
        partition: i32,
        meta: InvocationMeta,
        sequence: u64,
        host: Arc<dyn HostImports>,
    ) -> Self {
        Self {
            partition,
            offset: meta.offset,
            sequence,
            attempt: meta.attempt,
            deadline_ms: meta.deadline_ms,
            host,
        }
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Monotonic count of deliveries to this instance, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Delivery attempt for this record, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    pub fn deadline_ms(&self) -> Option<i64> {
        self.deadline_ms
    }

    /// Milliseconds left before the advisory deadline, clamped at zero.
    pub fn remaining_ms(&self) -> Option<i64> {
        let deadline = self.deadline_ms?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Some((deadline - now).max(0))
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.host.log(level as i32, message);
    }

    /// Look up a transform environment variable.
    pub fn env(&self, key: &str) -> Option<String> {
        self.host.env_get(key)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("sequence", &self.sequence)
            .field("attempt", &self.attempt)
            .field("deadline_ms", &self.deadline_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_ffi::StubHostImports;

    #[test]
    fn accessors_reflect_meta() {
        let meta = InvocationMeta {
            offset: 7,
            attempt: 2,
            deadline_ms: None,
        };
        let ctx = InvocationContext::new(3, meta, 11, Arc::new(StubHostImports));
        assert_eq!(ctx.partition(), 3);
        assert_eq!(ctx.offset(), 7);
        assert_eq!(ctx.sequence(), 11);
        assert!(ctx.is_redelivery());
        assert_eq!(ctx.remaining_ms(), None);
    }

    #[test]
    fn past_deadline_clamps_to_zero() {
        let meta = InvocationMeta {
            offset: 0,
            attempt: 1,
            deadline_ms: Some(1),
        };
        let ctx = InvocationContext::new(0, meta, 1, Arc::new(StubHostImports));
        assert_eq!(ctx.remaining_ms(), Some(0));
    }
}
