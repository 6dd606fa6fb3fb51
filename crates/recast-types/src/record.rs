//! In-memory record model.
//!
//! A [`Record`] is an immutable value: transforms derive new records with the
//! consuming `with_*` methods rather than mutating the one they were handed.

use bytes::Bytes;

/// A single record header. Header names are not required to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    name: String,
    value: Bytes,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// A broker record as seen by a transform.
///
/// `key` and `value` are independently optional (a record with no value is a
/// tombstone). Headers keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Record {
    key: Option<Bytes>,
    value: Option<Bytes>,
    headers: Vec<Header>,
    timestamp: i64,
    source_topic: String,
    partition: i32,
}

impl Record {
    /// Create a record with the given key and value and no headers.
    pub fn new(key: Option<impl Into<Bytes>>, value: Option<impl Into<Bytes>>) -> Self {
        Self {
            key: key.map(Into::into),
            value: value.map(Into::into),
            ..Self::default()
        }
    }

    /// Create a keyless record carrying only a value.
    pub fn from_value(value: impl Into<Bytes>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    #[must_use]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First header with the given name, if any.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(Header::value)
    }

    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    #[must_use]
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// `true` when the record carries no value.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    #[must_use]
    pub fn with_key(mut self, key: Option<impl Into<Bytes>>) -> Self {
        self.key = key.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: Option<impl Into<Bytes>>) -> Self {
        self.value = value.map(Into::into);
        self
    }

    /// Append a header after any existing ones.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the topic/partition the record originated from.
    #[must_use]
    pub fn with_origin(mut self, source_topic: impl Into<String>, partition: i32) -> Self {
        self.source_topic = source_topic.into();
        self.partition = partition;
        self
    }

    /// Split into owned parts `(key, value, headers)`.
    #[must_use]
    pub fn into_parts(self) -> (Option<Bytes>, Option<Bytes>, Vec<Header>) {
        (self.key, self.value, self.headers)
    }
}

/// An output record paired with the topic it should be written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub topic: String,
    pub record: Record,
}

impl Routed {
    pub fn new(topic: impl Into<String>, record: Record) -> Self {
        Self {
            topic: topic.into(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_keep_insertion_order() {
        let record = Record::from_value("v")
            .with_header("b", "2")
            .with_header("a", "1")
            .with_header("b", "3");
        let names: Vec<&str> = record.headers().iter().map(Header::name).collect();
        assert_eq!(names, vec!["b", "a", "b"]);
        assert_eq!(record.header("b"), Some(&b"2"[..]));
    }

    #[test]
    fn key_and_value_are_independently_optional() {
        let tombstone = Record::new(Some("k"), None::<Bytes>);
        assert_eq!(tombstone.key(), Some(&b"k"[..]));
        assert!(tombstone.is_tombstone());

        let keyless = Record::from_value("v");
        assert!(keyless.key().is_none());
        assert!(!keyless.is_tombstone());
    }

    #[test]
    fn with_methods_leave_the_original_untouched() {
        let original = Record::from_value("5").with_origin("numbers", 3);
        let derived = original.clone().with_value(Some("10"));
        assert_eq!(original.value(), Some(&b"5"[..]));
        assert_eq!(derived.value(), Some(&b"10"[..]));
        assert_eq!(derived.source_topic(), "numbers");
        assert_eq!(derived.partition(), 3);
    }
}
