//! Sandbox configuration: engine setup, store limits and deadline ticking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use wasmtime::{Config, Engine, StoreLimits, StoreLimitsBuilder};

/// Wall-clock length of one epoch tick.
pub const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Epoch delta used when a store has no deadline.
pub(crate) const NO_DEADLINE_TICKS: u64 = u64::MAX / 2;

/// Build Wasmtime store limits for one guest instance.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn build_store_limits(max_memory_bytes: Option<u64>) -> StoreLimits {
    let mut builder = StoreLimitsBuilder::new();
    if let Some(max_bytes) = max_memory_bytes {
        builder = builder.memory_size(max_bytes as usize);
    }
    builder = builder.instances(1);
    builder = builder.trap_on_grow_failure(true);
    builder.build()
}

/// Engine with epoch interruption enabled so invocations can be cut off at
/// their deadline.
///
/// # Errors
///
/// Returns an error if Wasmtime rejects the configuration.
pub fn new_engine() -> Result<Engine> {
    let mut config = Config::new();
    config.epoch_interruption(true);
    Engine::new(&config).context("Failed to initialize Wasmtime engine")
}

/// Number of epoch ticks covering `timeout_ms`, rounded up.
#[must_use]
pub fn deadline_ticks(timeout_ms: u64) -> u64 {
    let tick_ms = u64::try_from(EPOCH_TICK.as_millis()).unwrap_or(1).max(1);
    timeout_ms.div_ceil(tick_ms).max(1)
}

/// Background thread advancing an engine's epoch every [`EPOCH_TICK`].
/// Stops when dropped.
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    pub fn start(engine: &Engine) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let engine = engine.clone();
        let handle = std::thread::Builder::new()
            .name("recast-epoch".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })
            .map_err(|e| tracing::warn!(error = %e, "Failed to spawn epoch ticker; deadlines disabled"))
            .ok();
        Self { stop, handle }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
