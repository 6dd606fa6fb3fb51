//! Guest runtime shim: owns the registered transform and drives one
//! invocation per host call.
//!
//! Each entry point converts every failure, including panics in user code where
//! panics unwind, into a status code and reports a
//! [`Diagnostic`](recast_types::Diagnostic) to the host before returning.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use recast_types::{codec, EmissionLimits, Status};

use crate::context::InvocationContext;
use crate::emission::EmissionBuffer;
use crate::error::ShimError;
use crate::host_ffi::{HostImports, LogLevel};
use crate::lifecycle::{InvalidTransition, Lifecycle, LifecycleState};
use crate::transform::{TransformFunction, TransformResult};

/// Map an invocation result to the status code returned across the ABI.
#[must_use]
pub fn invocation_status(result: &Result<usize, ShimError>) -> Status {
    match result {
        Ok(0) => Status::Filtered,
        Ok(_) => Status::Ok,
        Err(err) => err.status(),
    }
}

/// One guest instance: a write-once transform slot, its emission buffer and
/// lifecycle state.
pub struct TransformRuntime {
    host: Arc<dyn HostImports>,
    slot: OnceLock<Box<dyn TransformFunction>>,
    buffer: EmissionBuffer,
    lifecycle: Lifecycle,
    sequence: u64,
}

impl TransformRuntime {
    pub fn new(host: Arc<dyn HostImports>) -> Self {
        Self {
            host,
            slot: OnceLock::new(),
            buffer: EmissionBuffer::default(),
            lifecycle: Lifecycle::new(),
            sequence: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Outputs currently staged. Zero between invocations.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn limits(&self) -> EmissionLimits {
        self.buffer.limits()
    }

    /// Bind the transform. Only one registration is ever accepted.
    ///
    /// A second registration before the instance is running is fatal; after
    /// setup it is rejected and the state is left as is.
    ///
    /// # Errors
    ///
    /// [`ShimError::DoubleRegistration`] if a transform is already bound, or a
    /// lifecycle violation if the instance already stopped.
    pub fn register<T: TransformFunction>(&mut self, transform: T) -> Result<(), ShimError> {
        if self.slot.get().is_some() {
            if matches!(
                self.lifecycle.state(),
                LifecycleState::Unstarted | LifecycleState::Registered
            ) {
                self.lifecycle.stop();
            }
            return Err(ShimError::DoubleRegistration);
        }
        self.lifecycle.mark_registered()?;
        self.slot
            .set(Box::new(transform))
            .map_err(|_| ShimError::DoubleRegistration)
    }

    /// Start the instance with a transform that was registered beforehand.
    ///
    /// # Errors
    ///
    /// See [`TransformRuntime::setup_with`].
    pub fn setup(&mut self) -> Result<(), ShimError> {
        self.setup_with(|_| Ok(()))
    }

    /// Run `init` (which normally registers the transform) and move to
    /// `Running`. Emission limits are read from the host environment first.
    ///
    /// # Errors
    ///
    /// Any failure or panic in `init`, a missing or repeated registration, or
    /// a repeated setup. All of them stop the instance.
    pub fn setup_with<F>(&mut self, init: F) -> Result<(), ShimError>
    where
        F: FnOnce(&mut Self) -> Result<(), ShimError>,
    {
        if let Err(err) = self.lifecycle.begin_setup() {
            return Err(self.fail(err.into()));
        }

        let host = Arc::clone(&self.host);
        let limits = EmissionLimits::from_lookup(|key| host.env_get(key));
        self.buffer.set_limits(limits);

        let result = match catch_unwind(AssertUnwindSafe(|| init(self))) {
            Ok(result) => result,
            Err(payload) => Err(ShimError::Panicked(panic_message(&*payload))),
        };
        let result = result.and_then(|()| {
            if self.slot.get().is_some() {
                Ok(())
            } else {
                Err(ShimError::NotRegistered)
            }
        });

        self.lifecycle.finish_setup(result.is_ok());
        let result = result.and_then(|()| {
            // A repeated registration swallowed by `init` has already stopped us.
            let state = self.lifecycle.state();
            if state == LifecycleState::Running {
                Ok(())
            } else {
                Err(ShimError::LifecycleViolation(InvalidTransition {
                    state,
                    action: "start",
                }))
            }
        });

        match result {
            Ok(()) => {
                self.host.log(LogLevel::Debug as i32, "transform running");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Process one inbound record and flush its outputs to the host.
    ///
    /// Returns the number of records emitted; zero means filtered.
    ///
    /// # Errors
    ///
    /// The failure that was reported to the host. Fatal failures leave the
    /// instance `Stopped`.
    pub fn on_record_written(&mut self, wire: &[u8]) -> Result<usize, ShimError> {
        self.buffer.clear();
        let result = self.invoke(wire);
        self.buffer.clear();
        result.map_err(|err| self.fail(err))
    }

    fn invoke(&mut self, wire: &[u8]) -> Result<usize, ShimError> {
        self.lifecycle.ensure_running()?;
        let record = codec::decode(wire)?;
        let meta = self.host.read_metadata()?;
        self.sequence += 1;
        let ctx = InvocationContext::new(
            record.partition(),
            meta,
            self.sequence,
            Arc::clone(&self.host),
        );

        let transform = self.slot.get_mut().ok_or(ShimError::NotRegistered)?;
        let outputs = guarded(|| transform.transform(record, &ctx))?;

        self.buffer.stage_all(&outputs)?;
        Ok(self.buffer.flush(self.host.as_ref())?)
    }

    /// Run the teardown hook, flush whatever it emits, and stop.
    ///
    /// Tearing down an already stopped instance is a no-op.
    ///
    /// # Errors
    ///
    /// A failing or panicking teardown hook, a rejected flush, or teardown
    /// before the instance was registered.
    pub fn teardown(&mut self) -> Result<usize, ShimError> {
        if self.lifecycle.state() == LifecycleState::Stopped {
            return Ok(0);
        }
        if let Err(err) = self.lifecycle.begin_drain() {
            return Err(self.fail(err.into()));
        }

        self.buffer.clear();
        let result = self.drain_teardown();
        self.buffer.clear();
        self.lifecycle.stop();
        result.map_err(|err| self.fail(err))
    }

    fn drain_teardown(&mut self) -> Result<usize, ShimError> {
        let Some(transform) = self.slot.get_mut() else {
            return Ok(0);
        };
        let outputs = guarded(|| transform.on_teardown())?;
        self.buffer.stage_all(&outputs)?;
        Ok(self.buffer.flush(self.host.as_ref())?)
    }

    fn fail(&mut self, err: ShimError) -> ShimError {
        if err.status() == Status::FatalError {
            self.lifecycle.stop();
        }
        self.host.report_error(&err.to_diagnostic());
        err
    }
}

/// Run user code, converting a panic into [`ShimError::Panicked`].
///
/// Only effective where panics unwind. In a wasm32 guest a panic aborts and
/// surfaces at the host as a trap.
fn guarded(f: impl FnOnce() -> TransformResult) -> Result<Vec<recast_types::Routed>, ShimError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Ok(result?),
        Err(payload) => Err(ShimError::Panicked(panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_ffi::StubHostImports;
    use recast_types::{Record, Routed, TransformError};

    fn passthrough(record: Record, _ctx: &InvocationContext) -> TransformResult {
        Ok(vec![Routed::new("out", record)])
    }

    fn running() -> TransformRuntime {
        let mut rt = TransformRuntime::new(Arc::new(StubHostImports));
        rt.setup_with(|rt| rt.register(passthrough)).unwrap();
        rt
    }

    #[test]
    fn setup_registers_and_runs() {
        let rt = running();
        assert_eq!(rt.state(), LifecycleState::Running);
    }

    #[test]
    fn setup_without_registration_is_fatal() {
        let mut rt = TransformRuntime::new(Arc::new(StubHostImports));
        let err = rt.setup().unwrap_err();
        assert!(matches!(err, ShimError::NotRegistered));
        assert_eq!(rt.state(), LifecycleState::Stopped);
    }

    #[test]
    fn panicking_setup_is_fatal() {
        let mut rt = TransformRuntime::new(Arc::new(StubHostImports));
        let err = rt
            .setup_with(|_| panic!("config missing"))
            .unwrap_err();
        match err {
            ShimError::Panicked(msg) => assert_eq!(msg, "config missing"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rt.state(), LifecycleState::Stopped);
    }

    #[test]
    fn record_before_setup_is_lifecycle_violation() {
        let mut rt = TransformRuntime::new(Arc::new(StubHostImports));
        let wire = codec::encode(&Record::from_value("v"));
        let err = rt.on_record_written(&wire).unwrap_err();
        assert!(matches!(err, ShimError::LifecycleViolation(_)));
        assert_eq!(invocation_status(&Err(err)), Status::FatalError);
    }

    #[test]
    fn decode_failure_is_retryable_and_keeps_running() {
        let mut rt = running();
        let result = rt.on_record_written(&[0x7f, 0, 0]);
        assert_eq!(invocation_status(&result), Status::RetryableError);
        assert_eq!(rt.state(), LifecycleState::Running);
    }

    #[test]
    fn passthrough_emits_one() {
        let mut rt = running();
        let wire = codec::encode(&Record::from_value("v"));
        assert_eq!(rt.on_record_written(&wire).unwrap(), 1);
        assert_eq!(rt.buffered(), 0);
    }

    #[test]
    fn fatal_transform_error_stops() {
        let mut rt = TransformRuntime::new(Arc::new(StubHostImports));
        rt.setup_with(|rt| {
            rt.register(|_r: Record, _c: &InvocationContext| -> TransformResult {
                Err(TransformError::fatal("BROKEN", "cannot continue"))
            })
        })
        .unwrap();
        let wire = codec::encode(&Record::from_value("v"));
        let err = rt.on_record_written(&wire).unwrap_err();
        assert_eq!(err.status(), Status::FatalError);
        assert_eq!(rt.state(), LifecycleState::Stopped);
    }

    #[test]
    fn teardown_is_idempotent_once_stopped() {
        let mut rt = running();
        assert_eq!(rt.teardown().unwrap(), 0);
        assert_eq!(rt.state(), LifecycleState::Stopped);
        assert_eq!(rt.teardown().unwrap(), 0);
    }

    #[test]
    fn teardown_before_registration_is_violation() {
        let mut rt = TransformRuntime::new(Arc::new(StubHostImports));
        assert!(matches!(
            rt.teardown(),
            Err(ShimError::LifecycleViolation(_))
        ));
    }

    #[test]
    fn panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u32), "non-string panic payload");
    }
}
