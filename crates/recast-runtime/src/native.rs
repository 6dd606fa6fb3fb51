//! In-process guests: the guest shim linked natively against the host bridge.
//!
//! Used for embedding transforms written against `recast-sdk` without a wasm
//! build step, and for exercising the full contract in tests. Host imports go
//! through the same [`HostState`] methods as the wasm linker.

use std::sync::{Arc, Mutex, MutexGuard};

use recast_sdk::host_ffi::{HostImports, HostRejection};
use recast_sdk::runtime::{invocation_status, TransformRuntime};
use recast_sdk::ShimError;
use recast_types::abi::WRITE_OK;
use recast_types::meta::InvocationMeta;
use recast_types::{codec, CodecError, Diagnostic, Routed};

use crate::bridge::{Delivery, GuestFactory, GuestInstance, GuestSettings, InvocationReport};
use crate::error::{Result, RuntimeError};
use crate::host_state::HostState;

/// Registration hook run inside the guest's setup.
pub type SetupFn = dyn Fn(&mut TransformRuntime) -> std::result::Result<(), ShimError> + Send + Sync;

/// Factory for native guests.
pub struct NativeTransform {
    settings: GuestSettings,
    init: Arc<SetupFn>,
}

impl NativeTransform {
    pub fn new<F>(settings: GuestSettings, init: F) -> Self
    where
        F: Fn(&mut TransformRuntime) -> std::result::Result<(), ShimError> + Send + Sync + 'static,
    {
        Self {
            settings,
            init: Arc::new(init),
        }
    }

    pub fn settings(&self) -> &GuestSettings {
        &self.settings
    }
}

impl GuestFactory for NativeTransform {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn instantiate(&self, partition: i32) -> Result<Box<dyn GuestInstance>> {
        let state = HostState::builder()
            .transform(self.settings.name.clone())
            .partition(partition)
            .output_topics(self.settings.output_topics.iter().cloned())
            .env(self.settings.guest_env())
            .build();
        let state = Arc::new(Mutex::new(state));
        let host = Arc::new(NativeHostImports {
            state: Arc::clone(&state),
        });
        Ok(Box::new(NativeGuest {
            state,
            runtime: TransformRuntime::new(host),
            init: Arc::clone(&self.init),
        }))
    }
}

fn lock(state: &Mutex<HostState>) -> MutexGuard<'_, HostState> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Host imports backed by a shared [`HostState`].
struct NativeHostImports {
    state: Arc<Mutex<HostState>>,
}

impl HostImports for NativeHostImports {
    fn log(&self, level: i32, message: &str) {
        lock(&self.state).log_impl(level, message);
    }

    fn write_record(&self, topic: &str, encoded: &[u8]) -> std::result::Result<(), HostRejection> {
        match lock(&self.state).write_record_impl(topic, encoded) {
            WRITE_OK => Ok(()),
            code => Err(HostRejection::from_code(code, topic)),
        }
    }

    fn read_metadata(&self) -> std::result::Result<InvocationMeta, CodecError> {
        let block = lock(&self.state).metadata_impl();
        InvocationMeta::decode(&block)
    }

    fn report_error(&self, diagnostic: &Diagnostic) {
        match diagnostic.to_json() {
            Ok(payload) => lock(&self.state).report_error_impl(&payload),
            Err(e) => tracing::error!(error = %e, "Failed to serialize guest diagnostic"),
        }
    }

    fn env_get(&self, key: &str) -> Option<String> {
        lock(&self.state).env_get_impl(key).map(str::to_owned)
    }
}

/// One native guest instance.
pub struct NativeGuest {
    state: Arc<Mutex<HostState>>,
    runtime: TransformRuntime,
    init: Arc<SetupFn>,
}

impl NativeGuest {
    fn diagnostic_or(&self, err: &ShimError) -> Diagnostic {
        lock(&self.state)
            .take_diagnostic()
            .unwrap_or_else(|| err.to_diagnostic())
    }
}

impl GuestInstance for NativeGuest {
    fn setup(&mut self) -> Result<()> {
        lock(&self.state).begin_invocation(InvocationMeta::default());
        let init = Arc::clone(&self.init);
        self.runtime
            .setup_with(|rt| init(rt))
            .map_err(|err| RuntimeError::SetupFailed(self.diagnostic_or(&err)))
    }

    fn invoke(&mut self, delivery: &Delivery) -> Result<InvocationReport> {
        lock(&self.state).begin_invocation(delivery.meta());
        let wire = codec::encode(&delivery.record);
        let result = self.runtime.on_record_written(&wire);
        let status = invocation_status(&result);
        let mut state = lock(&self.state);
        Ok(InvocationReport::from_guest(
            status,
            state.take_pending(),
            state.take_diagnostic(),
        ))
    }

    fn teardown(&mut self) -> Result<Vec<Routed>> {
        lock(&self.state).begin_invocation(InvocationMeta::default());
        match self.runtime.teardown() {
            Ok(_) => Ok(lock(&self.state).take_pending()),
            Err(err) => Err(RuntimeError::TeardownFailed(self.diagnostic_or(&err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_sdk::context::InvocationContext;
    use recast_sdk::transform::TransformResult;
    use recast_types::{FailureKind, Record, Status};

    fn upper(record: Record, _ctx: &InvocationContext) -> TransformResult {
        let value = record.value().unwrap_or_default().to_ascii_uppercase();
        Ok(vec![Routed::new("out", record.with_value(Some(value)))])
    }

    fn settings() -> GuestSettings {
        GuestSettings::new("upper").output_topics(["out"])
    }

    #[test]
    fn native_guest_runs_through_bridge() {
        let factory = NativeTransform::new(settings(), |rt| rt.register(upper));
        let mut guest = factory.instantiate(0).unwrap();
        guest.setup().unwrap();

        let report = guest
            .invoke(&Delivery::new(Record::from_value("abc"), 1))
            .unwrap();
        assert_eq!(report.status, Status::Ok);
        assert_eq!(report.emitted.len(), 1);
        assert_eq!(report.emitted[0].record.value(), Some(&b"ABC"[..]));
        assert!(guest.teardown().unwrap().is_empty());
    }

    #[test]
    fn setup_without_registration_fails_with_diagnostic() {
        let factory = NativeTransform::new(settings(), |_rt| Ok(()));
        let mut guest = factory.instantiate(0).unwrap();
        match guest.setup() {
            Err(RuntimeError::SetupFailed(diag)) => {
                assert_eq!(diag.kind, FailureKind::LifecycleViolation);
                assert!(!diag.retryable);
            }
            other => panic!("unexpected setup result: {other:?}"),
        }
    }

    #[test]
    fn undeclared_topic_is_rejected_by_host() {
        let factory = NativeTransform::new(GuestSettings::new("upper"), |rt| rt.register(upper));
        let mut guest = factory.instantiate(0).unwrap();
        guest.setup().unwrap();
        let report = guest
            .invoke(&Delivery::new(Record::from_value("abc"), 1))
            .unwrap();
        assert_eq!(report.status, Status::FatalError);
        assert!(report.emitted.is_empty());
        assert_eq!(report.diagnostic.unwrap().kind, FailureKind::HostRejected);
    }
}
