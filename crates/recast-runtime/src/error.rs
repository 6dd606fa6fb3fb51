//! Runtime error types.

use recast_types::Diagnostic;

/// Errors from the host runtime layer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Wasmtime engine, module or linker error.
    #[error("wasmtime: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// I/O error (module reads).
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The guest's `setup` entry point failed.
    #[error("guest setup failed: {0}")]
    SetupFailed(Diagnostic),

    /// An invocation failed fatally; the guest instance is stopped.
    #[error("guest stopped on fatal error: {0}")]
    GuestFatal(Diagnostic),

    /// The guest's teardown hook failed.
    #[error("guest teardown failed: {0}")]
    TeardownFailed(Diagnostic),

    /// A delivery was attempted after the runner stopped.
    #[error("transform '{0}' is stopped")]
    Stopped(String),

    /// The destination sink is gone.
    #[error("output sink closed")]
    SinkClosed,

    /// The worker for a partition exited early.
    #[error("partition {0} worker stopped")]
    PartitionStopped(i32),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use recast_types::FailureKind;

    #[test]
    fn runtime_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = RuntimeError::from(io_err);
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn runtime_error_from_anyhow() {
        let err = RuntimeError::from(anyhow::anyhow!("boom"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn fatal_display_carries_diagnostic() {
        let diag = Diagnostic::new(FailureKind::Transform, false, "BROKEN", "bad state");
        let err = RuntimeError::GuestFatal(diag);
        assert_eq!(
            err.to_string(),
            "guest stopped on fatal error: [transform] BROKEN: bad state"
        );
    }
}
