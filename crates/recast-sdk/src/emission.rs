//! Per-invocation emission buffer.
//!
//! Outputs are encoded as they are staged so the byte limit is measured on
//! exactly what crosses the bridge. Flushing pushes them to the host in
//! staging order.

use bytes::Bytes;
use recast_types::{codec, EmissionLimits, Record, Routed};

use crate::host_ffi::{HostImports, HostRejection};

/// An invocation tried to emit more than its limits allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmissionLimitExceeded {
    #[error("record of {size} bytes exceeds the per-invocation limit of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },
    #[error("emission of {size} bytes would exceed {max} bytes ({buffered} already staged)")]
    Bytes {
        size: usize,
        buffered: usize,
        max: usize,
    },
    #[error("invocation may emit at most {max} records")]
    Records { max: usize },
}

impl EmissionLimitExceeded {
    /// A structural overflow can never succeed on redelivery.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        match self {
            Self::RecordTooLarge { .. } => true,
            Self::Records { max } => *max == 0,
            Self::Bytes { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Staged {
    topic: String,
    payload: Bytes,
}

/// Staged outputs of the current invocation.
#[derive(Debug)]
pub struct EmissionBuffer {
    limits: EmissionLimits,
    staged: Vec<Staged>,
    bytes: usize,
}

impl EmissionBuffer {
    #[must_use]
    pub fn new(limits: EmissionLimits) -> Self {
        Self {
            limits,
            staged: Vec::new(),
            bytes: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> EmissionLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: EmissionLimits) {
        self.limits = limits;
    }

    /// Encode and stage one output. Nothing is staged when the limits reject it.
    ///
    /// # Errors
    ///
    /// Returns [`EmissionLimitExceeded`] when the record alone, or the running
    /// totals with it, exceed the configured limits.
    pub fn stage(&mut self, topic: &str, record: &Record) -> Result<(), EmissionLimitExceeded> {
        let max_records = self.limits.max_records;
        if self.staged.len() >= max_records {
            return Err(EmissionLimitExceeded::Records { max: max_records });
        }

        let size = codec::encoded_len(record);
        let max_bytes = self.limits.max_bytes;
        if size > max_bytes || codec::check_encodable(record).is_err() {
            return Err(EmissionLimitExceeded::RecordTooLarge {
                size,
                max: max_bytes,
            });
        }
        if self.bytes + size > max_bytes {
            return Err(EmissionLimitExceeded::Bytes {
                size,
                buffered: self.bytes,
                max: max_bytes,
            });
        }

        self.staged.push(Staged {
            topic: topic.to_string(),
            payload: codec::encode(record),
        });
        self.bytes += size;
        Ok(())
    }

    /// Stage a whole transform result, stopping at the first rejected output.
    ///
    /// # Errors
    ///
    /// See [`EmissionBuffer::stage`].
    pub fn stage_all(&mut self, outputs: &[Routed]) -> Result<(), EmissionLimitExceeded> {
        outputs
            .iter()
            .try_for_each(|out| self.stage(&out.topic, &out.record))
    }

    /// Push every staged output to the host in order, then clear.
    ///
    /// The buffer is cleared even when the host rejects a write.
    ///
    /// # Errors
    ///
    /// Returns the first [`HostRejection`]; later outputs are not pushed.
    pub fn flush(&mut self, host: &dyn HostImports) -> Result<usize, HostRejection> {
        let result = self
            .staged
            .iter()
            .try_for_each(|s| host.write_record(&s.topic, &s.payload))
            .map(|()| self.staged.len());
        self.clear();
        result
    }

    /// Remove and return staged outputs in staging order.
    pub fn drain(&mut self) -> impl Iterator<Item = (String, Bytes)> + '_ {
        self.bytes = 0;
        self.staged.drain(..).map(|s| (s.topic, s.payload))
    }

    pub fn clear(&mut self) {
        self.staged.clear();
        self.bytes = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Encoded bytes currently staged.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.bytes
    }
}

impl Default for EmissionBuffer {
    fn default() -> Self {
        Self::new(EmissionLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(value: &'static str) -> Record {
        Record::from_value(value)
    }

    fn limits(max_bytes: usize, max_records: usize) -> EmissionLimits {
        EmissionLimits {
            max_bytes,
            max_records,
        }
    }

    #[test]
    fn drain_preserves_staging_order() {
        let mut buf = EmissionBuffer::default();
        buf.stage("a", &rec("o1")).unwrap();
        buf.stage("b", &rec("o2")).unwrap();
        buf.stage("a", &rec("o3")).unwrap();

        let drained: Vec<_> = buf
            .drain()
            .map(|(topic, payload)| {
                let r = codec::decode(&payload).unwrap();
                (topic, r.value().map(<[u8]>::to_vec))
            })
            .collect();
        assert_eq!(
            drained,
            vec![
                ("a".to_string(), Some(b"o1".to_vec())),
                ("b".to_string(), Some(b"o2".to_vec())),
                ("a".to_string(), Some(b"o3".to_vec())),
            ]
        );
        assert!(buf.is_empty());
        assert_eq!(buf.buffered_bytes(), 0);
    }

    #[test]
    fn single_oversized_record_is_structural() {
        let record = rec("this value is longer than the limit");
        let mut buf = EmissionBuffer::new(limits(16, 10));
        let err = buf.stage("out", &record).unwrap_err();
        assert!(matches!(err, EmissionLimitExceeded::RecordTooLarge { .. }));
        assert!(err.is_structural());
        assert!(buf.is_empty());
    }

    #[test]
    fn cumulative_byte_overflow_is_transient() {
        let record = rec("abc");
        let one = codec::encoded_len(&record);
        let mut buf = EmissionBuffer::new(limits(one * 2, 10));
        buf.stage("out", &record).unwrap();
        buf.stage("out", &record).unwrap();
        let err = buf.stage("out", &record).unwrap_err();
        assert!(matches!(err, EmissionLimitExceeded::Bytes { .. }));
        assert!(!err.is_structural());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.buffered_bytes(), one * 2);
    }

    #[test]
    fn record_count_limit() {
        let mut buf = EmissionBuffer::new(limits(1 << 20, 1));
        buf.stage("out", &rec("x")).unwrap();
        let err = buf.stage("out", &rec("y")).unwrap_err();
        assert_eq!(err, EmissionLimitExceeded::Records { max: 1 });
        assert!(!err.is_structural());

        let mut zero = EmissionBuffer::new(limits(1 << 20, 0));
        assert!(zero.stage("out", &rec("x")).unwrap_err().is_structural());
    }

    #[test]
    fn clear_resets_totals() {
        let mut buf = EmissionBuffer::default();
        buf.stage("out", &rec("x")).unwrap();
        assert!(buf.buffered_bytes() > 0);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.buffered_bytes(), 0);
    }
}
