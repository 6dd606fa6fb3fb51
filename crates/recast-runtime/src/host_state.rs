//! Host-side state behind the `recast` host imports.
//!
//! The `*_impl` methods hold the import semantics; the wasm linker and the
//! native embedding both delegate to them so the two guest flavors behave
//! identically at the bridge.

use std::collections::HashMap;

use recast_types::abi::{WRITE_MALFORMED, WRITE_OK, WRITE_UNKNOWN_TOPIC};
use recast_types::meta::META_LEN;
use recast_types::{codec, Diagnostic, FailureKind, InvocationMeta, Routed};
use wasmtime::StoreLimits;

use crate::sandbox::build_store_limits;

/// Shared state passed to the host imports of one guest instance.
pub struct HostState {
    pub(crate) transform: String,
    pub(crate) partition: Option<i32>,
    pub(crate) output_topics: Vec<String>,
    pub(crate) env: HashMap<String, String>,
    pub(crate) meta: InvocationMeta,
    pub(crate) pending: Vec<Routed>,
    pub(crate) diagnostic: Option<Diagnostic>,
    pub(crate) store_limits: StoreLimits,
}

/// Builder for [`HostState`].
pub struct HostStateBuilder {
    transform: Option<String>,
    partition: Option<i32>,
    output_topics: Vec<String>,
    env: HashMap<String, String>,
    max_memory_bytes: Option<u64>,
}

impl HostStateBuilder {
    fn new() -> Self {
        Self {
            transform: None,
            partition: None,
            output_topics: Vec::new(),
            env: HashMap::new(),
            max_memory_bytes: None,
        }
    }

    #[must_use]
    pub fn transform(mut self, name: impl Into<String>) -> Self {
        self.transform = Some(name.into());
        self
    }

    #[must_use]
    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    #[must_use]
    pub fn output_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_topics = topics.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn max_memory_bytes(mut self, bytes: Option<u64>) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    #[must_use]
    pub fn build(self) -> HostState {
        HostState {
            transform: self.transform.unwrap_or_else(|| "transform".to_string()),
            partition: self.partition,
            output_topics: self.output_topics,
            env: self.env,
            meta: InvocationMeta::default(),
            pending: Vec::new(),
            diagnostic: None,
            store_limits: build_store_limits(self.max_memory_bytes),
        }
    }
}

impl HostState {
    #[must_use]
    pub fn builder() -> HostStateBuilder {
        HostStateBuilder::new()
    }

    pub fn transform(&self) -> &str {
        &self.transform
    }

    /// Reset per-invocation state and publish the metadata for the next record.
    pub fn begin_invocation(&mut self, meta: InvocationMeta) {
        self.meta = meta;
        self.pending.clear();
        self.diagnostic = None;
    }

    /// Emissions accepted since the last [`HostState::begin_invocation`], in order.
    pub fn take_pending(&mut self) -> Vec<Routed> {
        std::mem::take(&mut self.pending)
    }

    pub fn take_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostic.take()
    }

    pub(crate) fn log_impl(&self, level: i32, message: &str) {
        let transform = self.transform.as_str();
        match level {
            0 => tracing::error!(transform, "[transform] {}", message),
            1 => tracing::warn!(transform, "[transform] {}", message),
            2 => tracing::info!(transform, "[transform] {}", message),
            3 => tracing::debug!(transform, "[transform] {}", message),
            _ => tracing::trace!(transform, "[transform] {}", message),
        }
    }

    pub(crate) fn write_record_impl(&mut self, topic: &str, encoded: &[u8]) -> i32 {
        if !self.output_topics.iter().any(|t| t == topic) {
            tracing::warn!(
                transform = self.transform.as_str(),
                topic,
                "Guest wrote to an undeclared output topic"
            );
            return WRITE_UNKNOWN_TOPIC;
        }
        match codec::decode(encoded) {
            Ok(record) => {
                self.pending.push(Routed::new(topic, record));
                WRITE_OK
            }
            Err(e) => {
                tracing::error!(
                    transform = self.transform.as_str(),
                    topic,
                    error = %e,
                    "Guest emitted a malformed record"
                );
                WRITE_MALFORMED
            }
        }
    }

    pub(crate) fn metadata_impl(&self) -> [u8; META_LEN] {
        self.meta.encode()
    }

    pub(crate) fn report_error_impl(&mut self, payload: &[u8]) {
        let diagnostic = Diagnostic::from_json(payload).unwrap_or_else(|e| {
            Diagnostic::new(
                FailureKind::HostRejected,
                false,
                "MALFORMED_DIAGNOSTIC",
                format!("guest reported an unreadable diagnostic: {e}"),
            )
        });
        tracing::debug!(
            transform = self.transform.as_str(),
            partition = ?self.partition,
            offset = self.meta.offset,
            kind = %diagnostic.kind,
            code = diagnostic.code.as_str(),
            "Guest reported error"
        );
        self.diagnostic = Some(diagnostic);
    }

    pub(crate) fn env_get_impl(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_types::Record;

    fn state() -> HostState {
        HostState::builder()
            .transform("double")
            .output_topics(["out", "audit"])
            .env(HashMap::from([("SCALE".to_string(), "3".to_string())]))
            .build()
    }

    #[test]
    fn write_record_accepts_declared_topics_in_order() {
        let mut st = state();
        let a = codec::encode(&Record::from_value("a"));
        let b = codec::encode(&Record::from_value("b"));
        assert_eq!(st.write_record_impl("out", &a), WRITE_OK);
        assert_eq!(st.write_record_impl("audit", &b), WRITE_OK);

        let pending = st.take_pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].topic, "out");
        assert_eq!(pending[1].record.value(), Some(&b"b"[..]));
        assert!(st.take_pending().is_empty());
    }

    #[test]
    fn write_record_rejects_unknown_topic_and_garbage() {
        let mut st = state();
        let a = codec::encode(&Record::from_value("a"));
        assert_eq!(st.write_record_impl("elsewhere", &a), WRITE_UNKNOWN_TOPIC);
        assert_eq!(st.write_record_impl("out", &[0xff, 1]), WRITE_MALFORMED);
        assert!(st.take_pending().is_empty());
    }

    #[test]
    fn begin_invocation_resets_pending_and_diagnostic() {
        let mut st = state();
        st.write_record_impl("out", &codec::encode(&Record::from_value("a")));
        st.report_error_impl(b"not json");
        assert!(st.diagnostic.is_some());

        let meta = InvocationMeta {
            offset: 12,
            attempt: 1,
            deadline_ms: None,
        };
        st.begin_invocation(meta);
        assert!(st.pending.is_empty());
        assert!(st.take_diagnostic().is_none());
        assert_eq!(InvocationMeta::decode(&st.metadata_impl()).unwrap(), meta);
    }

    #[test]
    fn report_error_parses_json_diagnostic() {
        let mut st = state();
        let diag = Diagnostic::new(FailureKind::Codec, true, "DECODE_FAILED", "truncated");
        st.report_error_impl(&diag.to_json().unwrap());
        assert_eq!(st.take_diagnostic(), Some(diag));
    }

    #[test]
    fn unreadable_diagnostic_is_replaced() {
        let mut st = state();
        st.report_error_impl(b"{");
        let diag = st.take_diagnostic().unwrap();
        assert_eq!(diag.code, "MALFORMED_DIAGNOSTIC");
        assert!(!diag.retryable);
    }

    #[test]
    fn env_lookup() {
        let st = state();
        assert_eq!(st.env_get_impl("SCALE"), Some("3"));
        assert_eq!(st.env_get_impl("MISSING"), None);
    }
}
