//! JSON rendering of records for dead letters and line-oriented I/O.
//!
//! Keys, values and header values are carried as UTF-8 text. Binary payloads
//! are converted lossily; this form is for operators, not for replay of
//! arbitrary bytes.

use recast_types::{Header, Record, Routed};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEnvelope {
    pub name: String,
    pub value: String,
}

/// Serializable view of a [`Record`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderEnvelope>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    #[serde(default)]
    pub partition: i32,
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl From<&Record> for RecordEnvelope {
    fn from(record: &Record) -> Self {
        Self {
            key: record.key().map(text),
            value: record.value().map(text),
            headers: record
                .headers()
                .iter()
                .map(|h| HeaderEnvelope {
                    name: h.name().to_string(),
                    value: text(h.value()),
                })
                .collect(),
            timestamp: record.timestamp(),
            topic: record.source_topic().to_string(),
            partition: record.partition(),
        }
    }
}

impl RecordEnvelope {
    #[must_use]
    pub fn into_record(self) -> Record {
        let headers = self
            .headers
            .into_iter()
            .map(|h| Header::new(h.name, h.value))
            .collect();
        Record::new(self.key, self.value)
            .with_headers(headers)
            .with_timestamp(self.timestamp)
            .with_origin(self.topic, self.partition)
    }
}

/// A routed output as one JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedEnvelope {
    pub topic: String,
    #[serde(flatten)]
    pub record: RecordEnvelope,
}

impl From<&Routed> for RoutedEnvelope {
    fn from(routed: &Routed) -> Self {
        let mut record = RecordEnvelope::from(&routed.record);
        // Outputs are not yet placed on a topic partition.
        record.topic.clear();
        Self {
            topic: routed.topic.clone(),
            record,
        }
    }
}
