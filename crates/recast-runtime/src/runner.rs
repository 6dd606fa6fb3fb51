//! Host driver for one guest instance.
//!
//! A [`TransformRunner`] delivers records one at a time, drains each
//! invocation's emissions to its sink before the next delivery, and applies
//! the redelivery policy to failures.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use recast_types::{codec, Diagnostic, FailureKind, Record, Status};
use serde::Serialize;

use crate::bridge::{Delivery, GuestFactory, GuestInstance};
use crate::dlq::{DeadLetter, DeadLetterQueue, DEFAULT_DLQ_LIMIT};
use crate::error::{Result, RuntimeError};
use crate::retry::RetryPolicy;
use crate::sink::RecordSink;

/// Per-runner settings.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub partition: i32,
    pub retry: RetryPolicy,
    /// Advisory per-invocation deadline published to the guest.
    pub timeout_ms: Option<u64>,
    pub dlq_limit: usize,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            partition: 0,
            retry: RetryPolicy::default(),
            timeout_ms: None,
            dlq_limit: DEFAULT_DLQ_LIMIT,
        }
    }
}

impl RunnerOptions {
    #[must_use]
    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// What happened to one delivered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Emitted(usize),
    Filtered,
    DeadLettered,
}

/// Counters for one runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub records_in: u64,
    pub records_out: u64,
    pub filtered: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub reinstantiated: u64,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Add another runner's counters into this one.
    pub fn absorb(&mut self, other: &RunSummary) {
        self.records_in += other.records_in;
        self.records_out += other.records_out;
        self.filtered += other.filtered;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.reinstantiated += other.reinstantiated;
        self.duration_secs = self.duration_secs.max(other.duration_secs);
    }
}

/// Final state of a finished runner.
#[derive(Debug, Default)]
pub struct RunReport {
    pub summary: RunSummary,
    pub dead_letters: Vec<DeadLetter>,
}

pub struct TransformRunner<S: RecordSink> {
    factory: Arc<dyn GuestFactory>,
    sink: S,
    options: RunnerOptions,
    instance: Option<Box<dyn GuestInstance>>,
    dlq: DeadLetterQueue,
    summary: RunSummary,
    started_at: Instant,
    stopped: bool,
}

impl<S: RecordSink> TransformRunner<S> {
    pub fn new(factory: Arc<dyn GuestFactory>, sink: S, options: RunnerOptions) -> Self {
        let dlq = DeadLetterQueue::new(options.dlq_limit);
        Self {
            factory,
            sink,
            options,
            instance: None,
            dlq,
            summary: RunSummary::default(),
            started_at: Instant::now(),
            stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        self.factory.name()
    }

    pub fn partition(&self) -> i32 {
        self.options.partition
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn dead_letters(&self) -> &[DeadLetter] {
        self.dlq.records()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Instantiate the guest and run its setup.
    ///
    /// # Errors
    ///
    /// Instantiation or setup failures. A failed setup stops the runner.
    pub fn start(&mut self) -> Result<()> {
        self.live_instance()?;
        tracing::info!(
            transform = self.name(),
            partition = self.options.partition,
            "Transform started"
        );
        Ok(())
    }

    fn live_instance(&mut self) -> Result<&mut Box<dyn GuestInstance>> {
        if self.stopped {
            return Err(RuntimeError::Stopped(self.name().to_string()));
        }
        if self.instance.as_ref().is_some_and(|i| i.is_poisoned()) {
            self.instance = None;
            self.summary.reinstantiated += 1;
            tracing::info!(
                transform = self.name(),
                partition = self.options.partition,
                "Replacing abandoned guest instance"
            );
        }
        if self.instance.is_none() {
            let mut guest = self.factory.instantiate(self.options.partition)?;
            if let Err(e) = guest.setup() {
                self.stopped = true;
                tracing::error!(
                    transform = self.name(),
                    partition = self.options.partition,
                    error = %e,
                    "Guest setup failed"
                );
                return Err(e);
            }
            self.instance = Some(guest);
        }
        self.instance
            .as_mut()
            .ok_or_else(|| RuntimeError::Stopped(self.factory.name().to_string()))
    }

    fn deadline_ms(&self) -> Option<i64> {
        self.options.timeout_ms.map(|ms| {
            Utc::now()
                .timestamp_millis()
                .saturating_add(i64::try_from(ms).unwrap_or(i64::MAX))
        })
    }

    /// Deliver one record and drain its outputs to the sink.
    ///
    /// Retryable failures are redelivered per the retry policy and then
    /// dead-lettered.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::GuestFatal`] when the guest fails fatally (the runner
    /// stops), [`RuntimeError::Stopped`] for deliveries after that, and sink
    /// or engine failures.
    pub fn deliver(&mut self, record: Record, offset: i64) -> Result<DeliveryOutcome> {
        if self.stopped {
            return Err(RuntimeError::Stopped(self.name().to_string()));
        }
        self.summary.records_in += 1;
        let partition = self.options.partition;
        if let Err(e) = codec::check_encodable(&record) {
            let diagnostic =
                Diagnostic::new(FailureKind::Codec, false, "RECORD_TOO_LARGE", e.to_string());
            return Ok(self.dead_letter(&record, offset, 0, diagnostic));
        }
        let mut attempt = 1;

        loop {
            let delivery = Delivery::new(record.clone(), offset)
                .with_attempt(attempt)
                .with_deadline_ms(self.deadline_ms());
            let report = self.live_instance()?.invoke(&delivery)?;

            tracing::debug!(
                transform = self.name(),
                partition,
                offset,
                attempt,
                status = %report.status,
                "Invocation finished"
            );

            match report.status {
                Status::Ok | Status::Filtered => {
                    let emitted = report.emitted.len();
                    for routed in report.emitted {
                        self.sink.accept(routed)?;
                    }
                    if emitted == 0 {
                        self.summary.filtered += 1;
                        return Ok(DeliveryOutcome::Filtered);
                    }
                    self.summary.records_out += emitted as u64;
                    return Ok(DeliveryOutcome::Emitted(emitted));
                }
                Status::RetryableError => {
                    let diagnostic = report.diagnostic.unwrap_or_else(|| {
                        Diagnostic::new(FailureKind::HostRejected, true, "UNKNOWN", "retryable failure")
                    });
                    if self.options.retry.should_retry(attempt) {
                        let delay = self.options.retry.delay(&diagnostic, attempt);
                        tracing::warn!(
                            transform = self.name(),
                            partition,
                            offset,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %diagnostic,
                            "Retryable failure, redelivering"
                        );
                        self.summary.retried += 1;
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                        attempt += 1;
                        continue;
                    }
                    return Ok(self.dead_letter(&record, offset, attempt, diagnostic));
                }
                Status::FatalError => {
                    let diagnostic = report.diagnostic.unwrap_or_else(|| {
                        Diagnostic::new(FailureKind::HostRejected, false, "UNKNOWN", "fatal failure")
                    });
                    self.stopped = true;
                    tracing::error!(
                        transform = self.name(),
                        partition,
                        offset,
                        error = %diagnostic,
                        "Guest failed fatally; transform stopped"
                    );
                    return Err(RuntimeError::GuestFatal(diagnostic));
                }
            }
        }
    }

    fn dead_letter(
        &mut self,
        record: &Record,
        offset: i64,
        attempts: u32,
        diagnostic: Diagnostic,
    ) -> DeliveryOutcome {
        let partition = self.options.partition;
        let letter = DeadLetter::new(self.name(), partition, offset, attempts, record, diagnostic);
        self.dlq.push(letter);
        self.summary.dead_lettered += 1;
        DeliveryOutcome::DeadLettered
    }

    /// Tear the guest down, drain its final emissions and return the run's
    /// counters and dead letters.
    ///
    /// # Errors
    ///
    /// A failed teardown or a closed sink. Use [`TransformRunner::close`] to
    /// keep the report in that case.
    pub fn finish(self) -> Result<RunReport> {
        match self.close() {
            (report, None) => Ok(report),
            (_, Some(e)) => Err(e),
        }
    }

    /// Like [`TransformRunner::finish`], but the report survives a failed
    /// teardown. Dead letters and counters from earlier deliveries are
    /// always returned.
    pub fn close(mut self) -> (RunReport, Option<RuntimeError>) {
        let mut failure = None;
        if !self.stopped {
            if let Some(guest) = self.instance.take() {
                failure = self.drain_teardown(guest).err();
            }
            self.stopped = true;
        }
        self.summary.duration_secs = self.started_at.elapsed().as_secs_f64();
        tracing::info!(
            transform = self.name(),
            partition = self.options.partition,
            records_in = self.summary.records_in,
            records_out = self.summary.records_out,
            dead_lettered = self.summary.dead_lettered,
            "Transform finished"
        );
        let report = RunReport {
            summary: self.summary,
            dead_letters: self.dlq.into_records(),
        };
        (report, failure)
    }

    fn drain_teardown(&mut self, mut guest: Box<dyn GuestInstance>) -> Result<()> {
        if guest.is_poisoned() {
            return Ok(());
        }
        for routed in guest.teardown()? {
            self.sink.accept(routed)?;
            self.summary.records_out += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::GuestSettings;
    use crate::native::NativeTransform;
    use crate::sink::MemorySink;
    use recast_sdk::context::InvocationContext;
    use recast_sdk::transform::TransformResult;
    use recast_types::{Routed, TransformError};

    fn runner_for<F>(init: F, retry: RetryPolicy) -> TransformRunner<MemorySink>
    where
        F: Fn(&mut recast_sdk::TransformRuntime) -> std::result::Result<(), recast_sdk::ShimError>
            + Send
            + Sync
            + 'static,
    {
        let factory = NativeTransform::new(GuestSettings::new("t").output_topics(["out"]), init);
        TransformRunner::new(
            Arc::new(factory),
            MemorySink::new(),
            RunnerOptions::default().retry(retry),
        )
    }

    #[test]
    fn passthrough_drains_to_sink() {
        let mut runner = runner_for(
            |rt| rt.register(|r: Record, _: &InvocationContext| -> TransformResult {
                Ok(vec![Routed::new("out", r)])
            }),
            RetryPolicy::immediate(1),
        );
        runner.start().unwrap();
        assert_eq!(
            runner.deliver(Record::from_value("a"), 0).unwrap(),
            DeliveryOutcome::Emitted(1)
        );
        assert_eq!(runner.sink().records().len(), 1);
        let report = runner.finish().unwrap();
        assert_eq!(report.summary.records_in, 1);
        assert_eq!(report.summary.records_out, 1);
    }

    #[test]
    fn exhausted_retries_dead_letter() {
        let mut runner = runner_for(
            |rt| rt.register(|_: Record, _: &InvocationContext| -> TransformResult {
                Err(TransformError::retryable("FLAKY", "try later"))
            }),
            RetryPolicy::immediate(3),
        );
        runner.start().unwrap();
        assert_eq!(
            runner.deliver(Record::from_value("a"), 9).unwrap(),
            DeliveryOutcome::DeadLettered
        );
        let report = runner.finish().unwrap();
        assert_eq!(report.summary.retried, 2);
        assert_eq!(report.dead_letters.len(), 1);
        assert_eq!(report.dead_letters[0].attempts, 3);
        assert_eq!(report.dead_letters[0].offset, 9);
        assert_eq!(report.dead_letters[0].diagnostic.code, "FLAKY");
    }

    #[test]
    fn fatal_stops_runner() {
        let mut runner = runner_for(
            |rt| rt.register(|_: Record, _: &InvocationContext| -> TransformResult {
                Err(TransformError::fatal("BROKEN", "no"))
            }),
            RetryPolicy::immediate(3),
        );
        runner.start().unwrap();
        assert!(matches!(
            runner.deliver(Record::from_value("a"), 0),
            Err(RuntimeError::GuestFatal(_))
        ));
        assert!(runner.is_stopped());
        assert!(matches!(
            runner.deliver(Record::from_value("b"), 1),
            Err(RuntimeError::Stopped(_))
        ));
        assert_eq!(runner.finish().unwrap().summary.records_in, 1);
    }

    #[test]
    fn failed_setup_stops_runner() {
        let mut runner = runner_for(|_rt| Ok(()), RetryPolicy::immediate(1));
        assert!(matches!(runner.start(), Err(RuntimeError::SetupFailed(_))));
        assert!(runner.is_stopped());
    }
}
