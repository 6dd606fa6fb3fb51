//! Wasmtime-hosted guest modules.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use recast_types::abi::{
    ENV_NOT_FOUND, GUEST_ALLOC, GUEST_MEMORY, GUEST_ON_RECORD_WRITTEN, GUEST_SETUP,
    GUEST_TEARDOWN, HOST_ENV_GET, HOST_LOG, HOST_READ_METADATA, HOST_REPORT_ERROR,
    HOST_WRITE_RECORD, IMPORT_MODULE, WRITE_MALFORMED,
};
use recast_types::{codec, Diagnostic, FailureKind, InvocationMeta, Routed, Status};
use sha2::{Digest, Sha256};
use wasmtime::{Caller, Engine, Linker, Memory, Module, Store, Trap, TypedFunc};

use crate::bridge::{Delivery, GuestFactory, GuestInstance, GuestSettings, InvocationReport};
use crate::error::RuntimeError;
use crate::host_state::HostState;
use crate::memory::{read_from_guest, read_string_from_guest, write_into_guest, write_to_guest};
use crate::sandbox::{deadline_ticks, new_engine, EpochTicker, NO_DEADLINE_TICKS};

/// Hex-encoded SHA-256 of a module binary.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Verify a module binary against an expected hex checksum.
#[must_use]
pub fn verify_checksum(bytes: &[u8], expected_hex: &str) -> bool {
    sha256_hex(bytes).eq_ignore_ascii_case(expected_hex.trim())
}

/// Register every `recast` host import on `linker`.
///
/// # Errors
///
/// Returns an error if an import cannot be defined.
pub fn add_host_imports(linker: &mut Linker<HostState>) -> Result<()> {
    // write_record(topic_ptr, topic_len, rec_ptr, rec_len) -> i32
    linker
        .func_wrap(
            IMPORT_MODULE,
            HOST_WRITE_RECORD,
            |mut caller: Caller<'_, HostState>,
             topic_ptr: i32,
             topic_len: i32,
             rec_ptr: i32,
             rec_len: i32|
             -> i32 {
                let topic = match read_string_from_guest(&mut caller, topic_ptr, topic_len) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(error = %e, "write_record: failed to read topic");
                        return WRITE_MALFORMED;
                    }
                };
                let bytes = match read_from_guest(&mut caller, rec_ptr, rec_len) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::error!(error = %e, "write_record: failed to read record bytes");
                        return WRITE_MALFORMED;
                    }
                };
                caller.data_mut().write_record_impl(&topic, &bytes)
            },
        )
        .context("Failed to register write_record")?;

    // read_metadata(out_ptr, out_cap) -> i32
    linker
        .func_wrap(
            IMPORT_MODULE,
            HOST_READ_METADATA,
            |mut caller: Caller<'_, HostState>, out_ptr: i32, out_cap: i32| -> i32 {
                let block = caller.data().metadata_impl();
                let needed = i32::try_from(block.len()).unwrap_or(i32::MAX);
                if out_cap < needed {
                    return -needed;
                }
                match write_into_guest(&mut caller, out_ptr, out_cap, &block) {
                    Ok(()) => needed,
                    Err(e) => {
                        tracing::error!(error = %e, "read_metadata: failed to write block");
                        0
                    }
                }
            },
        )
        .context("Failed to register read_metadata")?;

    // report_error(ptr, len)
    linker
        .func_wrap(
            IMPORT_MODULE,
            HOST_REPORT_ERROR,
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                let payload = read_from_guest(&mut caller, ptr, len).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "report_error: failed to read payload");
                    Vec::new()
                });
                caller.data_mut().report_error_impl(&payload);
            },
        )
        .context("Failed to register report_error")?;

    // log(level, ptr, len)
    linker
        .func_wrap(
            IMPORT_MODULE,
            HOST_LOG,
            |mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32| {
                match read_string_from_guest(&mut caller, ptr, len) {
                    Ok(message) => caller.data().log_impl(level, &message),
                    Err(e) => tracing::error!(error = %e, "log: failed to read message"),
                }
            },
        )
        .context("Failed to register log")?;

    // env_get(key_ptr, key_len, out_ptr, out_cap) -> i32
    linker
        .func_wrap(
            IMPORT_MODULE,
            HOST_ENV_GET,
            |mut caller: Caller<'_, HostState>,
             key_ptr: i32,
             key_len: i32,
             out_ptr: i32,
             out_cap: i32|
             -> i32 {
                let key = match read_string_from_guest(&mut caller, key_ptr, key_len) {
                    Ok(k) => k,
                    Err(e) => {
                        tracing::error!(error = %e, "env_get: failed to read key");
                        return ENV_NOT_FOUND;
                    }
                };
                let Some(value) = caller.data().env_get_impl(&key).map(str::to_owned) else {
                    return ENV_NOT_FOUND;
                };
                let Ok(len) = i32::try_from(value.len()) else {
                    return ENV_NOT_FOUND;
                };
                if len > out_cap {
                    return len;
                }
                match write_into_guest(&mut caller, out_ptr, out_cap, value.as_bytes()) {
                    Ok(()) => len,
                    Err(e) => {
                        tracing::error!(error = %e, key = key.as_str(), "env_get: failed to write value");
                        ENV_NOT_FOUND
                    }
                }
            },
        )
        .context("Failed to register env_get")?;

    Ok(())
}

/// A compiled guest module plus everything needed to instantiate it.
pub struct WasmTransformModule {
    engine: Engine,
    module: Module,
    linker: Arc<Linker<HostState>>,
    settings: GuestSettings,
    _ticker: Option<EpochTicker>,
}

impl WasmTransformModule {
    /// Load a module (binary or WAT text) from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not compile.
    pub fn from_file(path: &Path, settings: GuestSettings) -> crate::error::Result<Self> {
        let bytes = std::fs::read(path)?;
        let module = Self::from_bytes(&bytes, settings)
            .map_err(|e| anyhow::anyhow!("Failed to load Wasm module {}: {e}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            sha256 = %sha256_hex(&bytes),
            "Loaded transform module"
        );
        Ok(module)
    }

    /// Compile a module from in-memory bytes (binary or WAT text).
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not compile or the host imports
    /// cannot be registered.
    pub fn from_bytes(bytes: &[u8], settings: GuestSettings) -> crate::error::Result<Self> {
        let engine = new_engine()?;
        let module = Module::new(&engine, bytes).context("Failed to compile Wasm module")?;
        let mut linker = Linker::new(&engine);
        add_host_imports(&mut linker)?;
        let ticker = settings.timeout_ms.map(|_| EpochTicker::start(&engine));
        Ok(Self {
            engine,
            module,
            linker: Arc::new(linker),
            settings,
            _ticker: ticker,
        })
    }

    pub fn settings(&self) -> &GuestSettings {
        &self.settings
    }

    fn new_store(&self, partition: i32) -> Store<HostState> {
        let state = HostState::builder()
            .transform(self.settings.name.clone())
            .partition(partition)
            .output_topics(self.settings.output_topics.iter().cloned())
            .env(self.settings.guest_env())
            .max_memory_bytes(self.settings.max_memory_bytes)
            .build();
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.store_limits);
        store
    }
}

impl GuestFactory for WasmTransformModule {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn instantiate(&self, partition: i32) -> crate::error::Result<Box<dyn GuestInstance>> {
        let mut store = self.new_store(partition);
        store.set_epoch_deadline(
            self.settings
                .timeout_ms
                .map_or(NO_DEADLINE_TICKS, deadline_ticks),
        );
        let instance = self
            .linker
            .instantiate(&mut store, &self.module)
            .context("Failed to instantiate guest module")?;

        let memory = instance
            .get_memory(&mut store, GUEST_MEMORY)
            .context("Guest does not export 'memory'")?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, GUEST_ALLOC)
            .context("Guest does not export recast_alloc")?;
        let setup = instance
            .get_typed_func::<(), i32>(&mut store, GUEST_SETUP)
            .context("Guest does not export setup")?;
        let on_record_written = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, GUEST_ON_RECORD_WRITTEN)
            .context("Guest does not export on_record_written")?;
        let teardown = instance
            .get_typed_func::<(), i32>(&mut store, GUEST_TEARDOWN)
            .context("Guest does not export teardown")?;

        Ok(Box::new(WasmGuest {
            store,
            memory,
            alloc,
            setup,
            on_record_written,
            teardown,
            timeout_ms: self.settings.timeout_ms,
            poisoned: false,
        }))
    }
}

/// One instantiated guest.
pub struct WasmGuest {
    store: Store<HostState>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    setup: TypedFunc<(), i32>,
    on_record_written: TypedFunc<(i32, i32), i32>,
    teardown: TypedFunc<(), i32>,
    timeout_ms: Option<u64>,
    poisoned: bool,
}

fn is_interrupt(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt))
}

impl WasmGuest {
    fn arm_deadline(&mut self) {
        let ticks = self.timeout_ms.map_or(NO_DEADLINE_TICKS, deadline_ticks);
        self.store.set_epoch_deadline(ticks);
    }

    fn ensure_live(&self) -> crate::error::Result<()> {
        if self.poisoned {
            return Err(RuntimeError::Stopped(self.store.data().transform.clone()));
        }
        Ok(())
    }

    /// A trap leaves the instance in an unknown state; it is never called again.
    fn call_failed(&mut self, err: &anyhow::Error) -> InvocationReport {
        self.poisoned = true;
        let state = self.store.data_mut();
        state.take_pending();
        let transform = state.transform.as_str();
        let offset = state.meta.offset;
        if is_interrupt(err) {
            tracing::warn!(
                transform,
                offset,
                timeout_ms = ?self.timeout_ms,
                "Invocation exceeded its deadline; abandoning instance"
            );
            InvocationReport::abandoned(format!(
                "invocation exceeded its {} ms deadline",
                self.timeout_ms.unwrap_or_default()
            ))
        } else {
            tracing::error!(transform, offset, error = %err, "Guest trapped");
            InvocationReport::trapped(format!("{err:#}"))
        }
    }

    fn lifecycle_call(
        &mut self,
        call: &TypedFunc<(), i32>,
        what: &str,
    ) -> crate::error::Result<(Status, Option<Diagnostic>)> {
        self.ensure_live()?;
        self.store
            .data_mut()
            .begin_invocation(InvocationMeta::default());
        self.arm_deadline();
        match call.call(&mut self.store, ()) {
            Ok(code) => Ok((
                Status::from_code(code),
                self.store.data_mut().take_diagnostic(),
            )),
            Err(err) => {
                let report = self.call_failed(&err);
                tracing::error!(error = %err, "Guest {what} trapped");
                Ok((Status::FatalError, report.diagnostic))
            }
        }
    }
}

fn missing_diagnostic(what: &str, status: Status) -> Diagnostic {
    Diagnostic::new(
        FailureKind::LifecycleViolation,
        false,
        "MISSING_DIAGNOSTIC",
        format!("guest {what} returned {status}"),
    )
}

impl GuestInstance for WasmGuest {
    fn setup(&mut self) -> crate::error::Result<()> {
        let setup = self.setup.clone();
        let (status, diagnostic) = self.lifecycle_call(&setup, "setup")?;
        if status == Status::Ok {
            Ok(())
        } else {
            Err(RuntimeError::SetupFailed(
                diagnostic.unwrap_or_else(|| missing_diagnostic("setup", status)),
            ))
        }
    }

    fn invoke(&mut self, delivery: &Delivery) -> crate::error::Result<InvocationReport> {
        self.ensure_live()?;
        self.store.data_mut().begin_invocation(delivery.meta());
        let wire = codec::encode(&delivery.record);
        self.arm_deadline();

        let (ptr, len) = match write_to_guest(&mut self.store, &self.alloc, &self.memory, &wire) {
            Ok(pair) => pair,
            Err(err) => return Ok(self.call_failed(&err)),
        };
        match self.on_record_written.call(&mut self.store, (ptr, len)) {
            Ok(code) => {
                let state = self.store.data_mut();
                Ok(InvocationReport::from_guest(
                    Status::from_code(code),
                    state.take_pending(),
                    state.take_diagnostic(),
                ))
            }
            Err(err) => Ok(self.call_failed(&err)),
        }
    }

    fn teardown(&mut self) -> crate::error::Result<Vec<Routed>> {
        let teardown = self.teardown.clone();
        let (status, diagnostic) = self.lifecycle_call(&teardown, "teardown")?;
        let emitted = self.store.data_mut().take_pending();
        if status == Status::Ok {
            Ok(emitted)
        } else {
            Err(RuntimeError::TeardownFailed(
                diagnostic.unwrap_or_else(|| missing_diagnostic("teardown", status)),
            ))
        }
    }

    fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
