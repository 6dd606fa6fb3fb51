//! One runner per partition, each on its own blocking task.
//!
//! Records for a partition are queued on a bounded channel and delivered in
//! order by that partition's runner, so a guest instance never sees two
//! invocations at once. Partitions proceed independently.

use std::collections::BTreeMap;
use std::sync::Arc;

use recast_types::Record;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::GuestFactory;
use crate::error::{Result, RuntimeError};
use crate::runner::{RunReport, RunnerOptions, TransformRunner};
use crate::sink::RecordSink;

/// Default depth of each partition's delivery queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

type SinkFactory = dyn Fn(i32) -> Box<dyn RecordSink> + Send + Sync;

/// What one partition's runner produced, including the error that stopped
/// it, if any. Dead letters recorded before a failure are kept.
#[derive(Debug, Default)]
pub struct PartitionReport {
    pub report: RunReport,
    pub error: Option<RuntimeError>,
}

impl PartitionReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

struct Worker {
    tx: mpsc::Sender<(i64, Record)>,
    handle: JoinHandle<PartitionReport>,
}

pub struct PartitionedRunner {
    factory: Arc<dyn GuestFactory>,
    options: RunnerOptions,
    make_sink: Arc<SinkFactory>,
    channel_capacity: usize,
    workers: BTreeMap<i32, Worker>,
}

impl PartitionedRunner {
    /// `make_sink` is called once per partition, when its first record arrives.
    pub fn new<F>(factory: Arc<dyn GuestFactory>, options: RunnerOptions, make_sink: F) -> Self
    where
        F: Fn(i32) -> Box<dyn RecordSink> + Send + Sync + 'static,
    {
        Self {
            factory,
            options,
            make_sink: Arc::new(make_sink),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            workers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn partitions(&self) -> impl Iterator<Item = i32> + '_ {
        self.workers.keys().copied()
    }

    fn spawn_worker(&self, partition: i32) -> Worker {
        let (tx, mut rx) = mpsc::channel::<(i64, Record)>(self.channel_capacity);
        let sink = (self.make_sink)(partition);
        let options = self.options.clone().partition(partition);
        let mut runner = TransformRunner::new(Arc::clone(&self.factory), sink, options);

        let handle = tokio::task::spawn_blocking(move || {
            let mut failure = runner.start().err();
            if failure.is_none() {
                while let Some((offset, record)) = rx.blocking_recv() {
                    if let Err(e) = runner.deliver(record, offset) {
                        failure = Some(e);
                        break;
                    }
                }
            }
            let (report, closing) = runner.close();
            PartitionReport {
                report,
                error: failure.or(closing),
            }
        });
        tracing::debug!(partition, "Spawned partition worker");
        Worker { tx, handle }
    }

    /// Queue a record for its partition, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::PartitionStopped`] if the partition's runner has
    /// exited, for example after a fatal guest failure.
    pub async fn dispatch(&mut self, partition: i32, offset: i64, record: Record) -> Result<()> {
        if !self.workers.contains_key(&partition) {
            let worker = self.spawn_worker(partition);
            self.workers.insert(partition, worker);
        }
        let worker = self
            .workers
            .get(&partition)
            .ok_or(RuntimeError::PartitionStopped(partition))?;
        worker
            .tx
            .send((offset, record))
            .await
            .map_err(|_| RuntimeError::PartitionStopped(partition))
    }

    /// Close every queue, wait for the runners to drain and tear down, and
    /// collect their reports.
    pub async fn finish(self) -> BTreeMap<i32, PartitionReport> {
        let mut reports = BTreeMap::new();
        for (partition, worker) in self.workers {
            drop(worker.tx);
            let report = match worker.handle.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(partition, error = %e, "Partition worker panicked");
                    PartitionReport {
                        report: RunReport::default(),
                        error: Some(RuntimeError::PartitionStopped(partition)),
                    }
                }
            };
            reports.insert(partition, report);
        }
        reports
    }
}
