//! Per-invocation metadata the guest reads from the host.

use bytes::{Buf, BufMut};

use crate::codec::{CodecError, FORMAT_V1};

/// Encoded size of [`InvocationMeta`]: tag + offset + attempt + deadline.
pub const META_LEN: usize = 1 + 8 + 4 + 8;

const NO_DEADLINE: i64 = -1;

/// Host-supplied metadata for the record currently being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationMeta {
    /// Offset of the inbound record within its partition.
    pub offset: i64,
    /// Delivery attempt, starting at 1. Redeliveries of the same record
    /// increment it.
    pub attempt: u32,
    /// Advisory deadline in ms since epoch.
    pub deadline_ms: Option<i64>,
}

impl Default for InvocationMeta {
    fn default() -> Self {
        Self {
            offset: 0,
            attempt: 1,
            deadline_ms: None,
        }
    }
}

impl InvocationMeta {
    #[must_use]
    pub fn encode(&self) -> [u8; META_LEN] {
        let mut out = [0u8; META_LEN];
        let mut buf = &mut out[..];
        buf.put_u8(FORMAT_V1);
        buf.put_i64_le(self.offset);
        buf.put_u32_le(self.attempt);
        buf.put_i64_le(self.deadline_ms.unwrap_or(NO_DEADLINE));
        out
    }

    /// # Errors
    ///
    /// Returns a [`CodecError`] when the block is short, long, or carries an
    /// unknown tag.
    pub fn decode(mut wire: &[u8]) -> Result<Self, CodecError> {
        if wire.is_empty() {
            return Err(CodecError::Empty);
        }
        if wire.len() < META_LEN {
            return Err(CodecError::Truncated {
                field: "invocation metadata",
                needed: META_LEN,
                remaining: wire.len(),
            });
        }
        if wire.len() > META_LEN {
            return Err(CodecError::TrailingBytes(wire.len() - META_LEN));
        }
        let tag = wire.get_u8();
        if tag != FORMAT_V1 {
            return Err(CodecError::UnsupportedFormat(tag));
        }
        let offset = wire.get_i64_le();
        let attempt = wire.get_u32_le();
        let deadline = wire.get_i64_le();
        Ok(Self {
            offset,
            attempt,
            deadline_ms: (deadline != NO_DEADLINE).then_some(deadline),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_and_without_deadline() {
        let with = InvocationMeta {
            offset: 42,
            attempt: 3,
            deadline_ms: Some(1_700_000_000_000),
        };
        assert_eq!(InvocationMeta::decode(&with.encode()).unwrap(), with);

        let without = InvocationMeta::default();
        assert_eq!(InvocationMeta::decode(&without.encode()).unwrap(), without);
    }

    #[test]
    fn short_block_is_truncated() {
        let wire = InvocationMeta::default().encode();
        assert!(matches!(
            InvocationMeta::decode(&wire[..10]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
