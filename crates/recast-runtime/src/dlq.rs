//! Dead-letter collection for records that exhausted their retries.

use chrono::{DateTime, Utc};
use recast_types::{Diagnostic, Record};
use serde::Serialize;

use crate::envelope::RecordEnvelope;

/// Default cap on dead letters kept per runner.
pub const DEFAULT_DLQ_LIMIT: usize = 10_000;

/// A record the transform could not process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub transform: String,
    pub partition: i32,
    pub offset: i64,
    pub attempts: u32,
    pub record: RecordEnvelope,
    pub diagnostic: Diagnostic,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        transform: impl Into<String>,
        partition: i32,
        offset: i64,
        attempts: u32,
        record: &Record,
        diagnostic: Diagnostic,
    ) -> Self {
        Self {
            transform: transform.into(),
            partition,
            offset,
            attempts,
            record: RecordEnvelope::from(record),
            diagnostic,
            failed_at: Utc::now(),
        }
    }
}

/// Bounded in-memory dead-letter queue.
#[derive(Debug)]
pub struct DeadLetterQueue {
    limit: usize,
    records: Vec<DeadLetter>,
    dropped: u64,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DLQ_LIMIT)
    }
}

impl DeadLetterQueue {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            records: Vec::new(),
            dropped: 0,
        }
    }

    /// Queue a dead letter. Beyond the cap, letters are counted but dropped.
    pub fn push(&mut self, letter: DeadLetter) {
        tracing::warn!(
            transform = letter.transform.as_str(),
            partition = letter.partition,
            offset = letter.offset,
            attempts = letter.attempts,
            code = letter.diagnostic.code.as_str(),
            "Record dead-lettered"
        );
        if self.records.len() >= self.limit {
            if self.dropped == 0 {
                tracing::warn!(max = self.limit, "DLQ record cap reached; dropping further records");
            }
            self.dropped += 1;
            return;
        }
        self.records.push(letter);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Letters that did not fit under the cap.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn records(&self) -> &[DeadLetter] {
        &self.records
    }

    pub fn into_records(self) -> Vec<DeadLetter> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_types::FailureKind;

    fn letter(offset: i64) -> DeadLetter {
        DeadLetter::new(
            "double",
            0,
            offset,
            3,
            &Record::from_value("x"),
            Diagnostic::new(FailureKind::Transform, true, "FLAKY", "still failing"),
        )
    }

    #[test]
    fn queue_caps_and_counts_drops() {
        let mut dlq = DeadLetterQueue::new(2);
        for offset in 0..5 {
            dlq.push(letter(offset));
        }
        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.dropped(), 3);
        assert_eq!(dlq.records()[1].offset, 1);
    }

    #[test]
    fn dead_letter_serializes_with_timestamp() {
        let json = serde_json::to_value(letter(7)).unwrap();
        assert_eq!(json["offset"], 7);
        assert_eq!(json["diagnostic"]["code"], "FLAKY");
        assert_eq!(json["record"]["value"], "x");
        assert!(json["failed_at"].as_str().unwrap().contains('T'));
    }
}
