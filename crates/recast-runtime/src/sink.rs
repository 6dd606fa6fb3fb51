//! Destinations for drained emissions.

use recast_types::Routed;
use tokio::sync::mpsc;

use crate::error::{Result, RuntimeError};

/// Receives routed outputs in emission order.
pub trait RecordSink: Send {
    /// # Errors
    ///
    /// Returns an error if the destination can no longer accept records.
    fn accept(&mut self, routed: Routed) -> Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn accept(&mut self, routed: Routed) -> Result<()> {
        (**self).accept(routed)
    }
}

/// Collects outputs in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<Routed>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[Routed] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Routed> {
        self.records
    }
}

impl RecordSink for MemorySink {
    fn accept(&mut self, routed: Routed) -> Result<()> {
        self.records.push(routed);
        Ok(())
    }
}

/// Forwards outputs into a bounded channel. Blocks when the channel is full,
/// so it must be driven from a blocking context.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Routed>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Routed>) -> Self {
        Self { tx }
    }
}

impl RecordSink for ChannelSink {
    fn accept(&mut self, routed: Routed) -> Result<()> {
        self.tx
            .blocking_send(routed)
            .map_err(|_| RuntimeError::SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_types::Record;

    #[test]
    fn memory_sink_keeps_order() {
        let mut sink = MemorySink::new();
        sink.accept(Routed::new("a", Record::from_value("1"))).unwrap();
        sink.accept(Routed::new("b", Record::from_value("2"))).unwrap();
        let topics: Vec<_> = sink.records().iter().map(|r| r.topic.as_str()).collect();
        assert_eq!(topics, ["a", "b"]);
    }

    #[test]
    fn channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        drop(rx);
        let err = sink
            .accept(Routed::new("a", Record::from_value("1")))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::SinkClosed));
    }
}
