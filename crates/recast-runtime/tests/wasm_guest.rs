//! Drives the hand-written WAT guest through wasmtime.

use std::path::Path;
use std::sync::Arc;

use recast_runtime::retry::RetryPolicy;
use recast_runtime::wasm::{sha256_hex, verify_checksum};
use recast_runtime::{
    Delivery, DeliveryOutcome, GuestFactory, GuestSettings, MemorySink, RunnerOptions,
    RuntimeError, TransformRunner, WasmTransformModule,
};
use recast_types::{FailureKind, Record, Status};

fn fixture() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/echo.wat"))
}

fn settings() -> GuestSettings {
    GuestSettings::new("echo").output_topics(["out"])
}

fn load(settings: GuestSettings) -> Arc<WasmTransformModule> {
    Arc::new(WasmTransformModule::from_file(fixture(), settings).unwrap())
}

fn runner(
    module: Arc<WasmTransformModule>,
    options: RunnerOptions,
) -> TransformRunner<MemorySink> {
    let mut runner = TransformRunner::new(module, MemorySink::new(), options);
    runner.start().unwrap();
    runner
}

fn sample() -> Record {
    Record::new(Some("k1"), Some("v1"))
        .with_header("trace", "t-1")
        .with_timestamp(1000)
        .with_origin("numbers", 0)
}

#[test]
fn echo_round_trips_through_guest_memory() {
    let module = load(settings());
    let mut guest = module.instantiate(0).unwrap();
    guest.setup().unwrap();

    let report = guest.invoke(&Delivery::new(sample(), 1)).unwrap();
    assert_eq!(report.status, Status::Ok);
    assert_eq!(report.emitted.len(), 1);
    assert_eq!(report.emitted[0].topic, "out");
    assert_eq!(report.emitted[0].record, sample());
    assert!(report.diagnostic.is_none());

    // The guest heap is reused across records.
    for offset in 100..150 {
        let report = guest.invoke(&Delivery::new(sample(), offset)).unwrap();
        assert_eq!(report.status, Status::Ok);
    }
    assert!(guest.teardown().unwrap().is_empty());
}

#[test]
fn filtered_record_emits_nothing() {
    let mut runner = runner(load(settings()), RunnerOptions::default());
    assert_eq!(
        runner.deliver(sample(), 13).unwrap(),
        DeliveryOutcome::Filtered
    );
    assert!(runner.sink().records().is_empty());
    assert_eq!(runner.finish().unwrap().summary.filtered, 1);
}

#[test]
fn retryable_failure_is_redelivered_with_next_attempt() {
    let options = RunnerOptions::default().retry(RetryPolicy::immediate(3));
    let mut runner = runner(load(settings()), options);
    assert_eq!(
        runner.deliver(sample(), 42).unwrap(),
        DeliveryOutcome::Emitted(1)
    );
    assert_eq!(runner.summary().retried, 1);
    assert_eq!(runner.sink().records().len(), 1);
}

#[test]
fn persistent_retryable_failure_is_dead_lettered() {
    let options = RunnerOptions::default().retry(RetryPolicy::immediate(3));
    let mut runner = runner(load(settings()), options);
    assert_eq!(
        runner.deliver(sample(), 43).unwrap(),
        DeliveryOutcome::DeadLettered
    );
    // The runner keeps going after a dead letter.
    assert_eq!(
        runner.deliver(sample(), 44).unwrap(),
        DeliveryOutcome::Emitted(1)
    );

    let report = runner.finish().unwrap();
    assert_eq!(report.dead_letters.len(), 1);
    let letter = &report.dead_letters[0];
    assert_eq!(letter.offset, 43);
    assert_eq!(letter.attempts, 3);
    assert_eq!(letter.diagnostic.code, "FLAKY");
    assert_eq!(letter.diagnostic.kind, FailureKind::Transform);
    assert_eq!(letter.record.value.as_deref(), Some("v1"));
}

#[test]
fn fatal_failure_stops_the_runner() {
    let mut runner = runner(load(settings()), RunnerOptions::default());
    match runner.deliver(sample(), 66) {
        Err(RuntimeError::GuestFatal(diag)) => {
            assert_eq!(diag.code, "BROKEN");
            assert!(!diag.retryable);
        }
        other => panic!("expected fatal, got {other:?}"),
    }
    assert!(matches!(
        runner.deliver(sample(), 67),
        Err(RuntimeError::Stopped(_))
    ));
}

#[test]
fn trap_is_fatal() {
    let mut runner = runner(load(settings()), RunnerOptions::default());
    match runner.deliver(sample(), 7) {
        Err(RuntimeError::GuestFatal(diag)) => {
            assert_eq!(diag.code, "GUEST_TRAP");
            assert_eq!(diag.kind, FailureKind::Panicked);
        }
        other => panic!("expected trap, got {other:?}"),
    }
}

#[test]
fn undeclared_output_topic_is_fatal() {
    let module = load(GuestSettings::new("echo").output_topics(["elsewhere"]));
    let mut runner = runner(module, RunnerOptions::default());
    assert!(matches!(
        runner.deliver(sample(), 1),
        Err(RuntimeError::GuestFatal(_))
    ));
}

#[test]
fn deadline_abandons_and_reinstantiates() {
    let module = load(settings().timeout_ms(Some(50)));
    let options = RunnerOptions::default()
        .retry(RetryPolicy::immediate(2))
        .timeout_ms(Some(50));
    let mut runner = runner(module, options);

    assert_eq!(
        runner.deliver(sample(), 99).unwrap(),
        DeliveryOutcome::DeadLettered
    );
    assert_eq!(
        runner.deliver(sample(), 100).unwrap(),
        DeliveryOutcome::Emitted(1)
    );

    let report = runner.finish().unwrap();
    assert_eq!(report.summary.reinstantiated, 2);
    let letter = &report.dead_letters[0];
    assert_eq!(letter.diagnostic.code, "DEADLINE_EXCEEDED");
    assert_eq!(letter.diagnostic.kind, FailureKind::Abandoned);
    assert!(letter.diagnostic.retryable);
}

#[test]
fn memory_limit_caps_guest_growth() {
    let module = load(settings().max_memory_bytes(Some(64 * 1024)));
    let mut guest = module.instantiate(0).unwrap();
    guest.setup().unwrap();

    let big = Record::from_value(vec![b'x'; 256 * 1024]);
    let report = guest.invoke(&Delivery::new(big, 1)).unwrap();
    assert_eq!(report.status, Status::FatalError);
    assert!(guest.is_poisoned());
}

#[test]
fn missing_module_is_io_error() {
    let err = WasmTransformModule::from_file(Path::new("/nonexistent/echo.wasm"), settings())
        .err()
        .unwrap();
    assert!(matches!(err, RuntimeError::Io(_)));
}

#[test]
fn checksum_matches_fixture() {
    let bytes = std::fs::read(fixture()).unwrap();
    let digest = sha256_hex(&bytes);
    assert!(verify_checksum(&bytes, &digest));
    assert!(!verify_checksum(&bytes, &"0".repeat(64)));
}
