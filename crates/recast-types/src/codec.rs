//! Length-prefixed binary record codec used across the host/guest boundary.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! u8   format tag (FORMAT_V1)
//! i32  key length, -1 when absent      | key bytes
//! i32  value length, -1 when absent    | value bytes
//! u32  header count
//!      per header: u32 name length | UTF-8 name | u32 value length | value bytes
//! i64  timestamp (ms since epoch)
//! u32  source topic length | UTF-8 topic
//! i32  partition
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::record::{Header, Record};

/// Current record format tag.
pub const FORMAT_V1: u8 = 0x01;

const ABSENT: i32 = -1;

/// Longest key, value, header or topic the length prefixes can carry.
pub const MAX_FIELD_LEN: usize = 0x7fff_ffff;

/// Errors produced while decoding a record from the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input was empty; not even a format tag.
    #[error("empty record payload")]
    Empty,

    /// Leading tag byte names a format this build does not understand.
    #[error("unsupported record format tag {0:#04x}")]
    UnsupportedFormat(u8),

    /// Input ended before a field was complete.
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A length prefix was negative (other than the absent marker).
    #[error("invalid length {len} for {field}")]
    InvalidLength { field: &'static str, len: i64 },

    /// A string field was not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Bytes were left over after the last field.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// A field is too long for its length prefix; the record cannot be encoded.
    #[error("{field} of {len} bytes exceeds the {MAX_FIELD_LEN}-byte field limit")]
    FieldTooLarge { field: &'static str, len: usize },
}

/// Encoded size of `record` in bytes, without encoding it.
#[must_use]
pub fn encoded_len(record: &Record) -> usize {
    let opt = |b: Option<&[u8]>| 4 + b.map_or(0, <[u8]>::len);
    let headers: usize = record
        .headers()
        .iter()
        .map(|h| 4 + h.name().len() + 4 + h.value().len())
        .sum();
    1 + opt(record.key())
        + opt(record.value())
        + 4
        + headers
        + 8
        + 4
        + record.source_topic().len()
        + 4
}

fn check_len(field: &'static str, len: usize) -> Result<(), CodecError> {
    if len > MAX_FIELD_LEN {
        return Err(CodecError::FieldTooLarge { field, len });
    }
    Ok(())
}

/// Check that every field of `record` fits its length prefix.
///
/// [`encode`] is total over records that pass. The guest emission buffer
/// and the host runner both call this before encoding, so oversized
/// records are rejected instead of reaching [`encode`].
///
/// # Errors
///
/// [`CodecError::FieldTooLarge`] naming the first offending field.
pub fn check_encodable(record: &Record) -> Result<(), CodecError> {
    check_len("key", record.key().map_or(0, <[u8]>::len))?;
    check_len("value", record.value().map_or(0, <[u8]>::len))?;
    check_len("header count", record.headers().len())?;
    for header in record.headers() {
        check_len("header name", header.name().len())?;
        check_len("header value", header.value().len())?;
    }
    check_len("source topic", record.source_topic().len())
}

/// Encode a record that passed [`check_encodable`].
///
/// # Panics
///
/// Panics on a field longer than [`MAX_FIELD_LEN`], which no checked
/// record has.
#[must_use]
pub fn encode(record: &Record) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(record));
    buf.put_u8(FORMAT_V1);
    put_optional(&mut buf, record.key());
    put_optional(&mut buf, record.value());
    buf.put_u32_le(to_u32(record.headers().len()));
    for header in record.headers() {
        put_bytes(&mut buf, header.name().as_bytes());
        put_bytes(&mut buf, header.value());
    }
    buf.put_i64_le(record.timestamp());
    put_bytes(&mut buf, record.source_topic().as_bytes());
    buf.put_i32_le(record.partition());
    buf.freeze()
}

/// Decode a record previously produced by [`encode`].
///
/// # Errors
///
/// Returns a [`CodecError`] for an unknown format tag, a malformed length
/// prefix, invalid UTF-8, truncated input or trailing bytes.
pub fn decode(wire: &[u8]) -> Result<Record, CodecError> {
    let mut reader = Reader { buf: wire };
    let tag = reader.u8("format tag").map_err(|_| CodecError::Empty)?;
    if tag != FORMAT_V1 {
        return Err(CodecError::UnsupportedFormat(tag));
    }

    let key = reader.optional("key")?;
    let value = reader.optional("value")?;

    let count = reader.u32("header count")? as usize;
    // Each header needs at least 8 bytes of prefixes; reject absurd counts
    // before reserving.
    if count.saturating_mul(8) > reader.buf.remaining() {
        return Err(CodecError::Truncated {
            field: "headers",
            needed: count.saturating_mul(8),
            remaining: reader.buf.remaining(),
        });
    }
    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        let name = reader.string("header name")?;
        let value = reader.bytes("header value")?;
        headers.push(Header::new(name, value));
    }

    let timestamp = reader.i64("timestamp")?;
    let source_topic = reader.string("source topic")?;
    let partition = reader.i32("partition")?;

    if reader.buf.has_remaining() {
        return Err(CodecError::TrailingBytes(reader.buf.remaining()));
    }

    Ok(Record::new(key, value)
        .with_headers(headers)
        .with_timestamp(timestamp)
        .with_origin(source_topic, partition))
}

fn to_u32(len: usize) -> u32 {
    u32::try_from(len).expect("field length exceeds u32 range")
}

fn put_optional(buf: &mut BytesMut, field: Option<&[u8]>) {
    match field {
        Some(bytes) => {
            buf.put_i32_le(i32::try_from(bytes.len()).expect("field length exceeds i32 range"));
            buf.put_slice(bytes);
        }
        None => buf.put_i32_le(ABSENT),
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(to_u32(bytes.len()));
    buf.put_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, field: &'static str, needed: usize) -> Result<(), CodecError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(CodecError::Truncated {
                field,
                needed,
                remaining,
            });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, CodecError> {
        self.need(field, 4)?;
        Ok(self.buf.get_i32_le())
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, CodecError> {
        self.need(field, 8)?;
        Ok(self.buf.get_i64_le())
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<Bytes, CodecError> {
        self.need(field, len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    fn optional(&mut self, field: &'static str) -> Result<Option<Bytes>, CodecError> {
        match self.i32(field)? {
            ABSENT => Ok(None),
            len if len < 0 => Err(CodecError::InvalidLength {
                field,
                len: i64::from(len),
            }),
            len => self.take(field, len as usize).map(Some),
        }
    }

    fn bytes(&mut self, field: &'static str) -> Result<Bytes, CodecError> {
        let len = self.u32(field)? as usize;
        self.take(field, len)
    }

    fn string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let bytes = self.bytes(field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }
}
