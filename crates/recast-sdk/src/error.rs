//! Failures raised inside the guest shim and their ABI classification.

use recast_types::{CodecError, Diagnostic, FailureKind, Status, TransformError};

use crate::emission::EmissionLimitExceeded;
use crate::host_ffi::HostRejection;
use crate::lifecycle::InvalidTransition;

/// Every way an entry point can fail. Each variant maps to one status code
/// and one [`Diagnostic`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShimError {
    #[error("decode inbound record: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    EmissionLimit(#[from] EmissionLimitExceeded),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("a transform is already registered")]
    DoubleRegistration,
    #[error("no transform was registered during setup")]
    NotRegistered,
    #[error(transparent)]
    LifecycleViolation(#[from] InvalidTransition),
    #[error("transform panicked: {0}")]
    Panicked(String),
    #[error("host rejected output: {0}")]
    HostRejected(#[from] HostRejection),
}

impl ShimError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Codec(_) => FailureKind::Codec,
            Self::EmissionLimit(_) => FailureKind::EmissionLimit,
            Self::Transform(_) => FailureKind::Transform,
            Self::DoubleRegistration => FailureKind::DoubleRegistration,
            Self::NotRegistered | Self::LifecycleViolation(_) => FailureKind::LifecycleViolation,
            Self::Panicked(_) => FailureKind::Panicked,
            Self::HostRejected(_) => FailureKind::HostRejected,
        }
    }

    /// Whether redelivering the same record may succeed. Everything else stops
    /// the instance.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Codec(_) => true,
            Self::EmissionLimit(e) => !e.is_structural(),
            Self::Transform(e) => e.retryable,
            _ => false,
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        if self.is_retryable() {
            Status::RetryableError
        } else {
            Status::FatalError
        }
    }

    fn code(&self) -> &str {
        match self {
            Self::Codec(_) => "DECODE_FAILED",
            Self::EmissionLimit(_) => "EMISSION_LIMIT",
            Self::Transform(e) => &e.code,
            Self::DoubleRegistration => "DOUBLE_REGISTRATION",
            Self::NotRegistered => "NOT_REGISTERED",
            Self::LifecycleViolation(_) => "LIFECYCLE_VIOLATION",
            Self::Panicked(_) => "PANICKED",
            Self::HostRejected(_) => "HOST_REJECTED",
        }
    }

    #[must_use]
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Transform(e) => Diagnostic::from(e.clone()),
            other => Diagnostic::new(
                other.kind(),
                other.is_retryable(),
                other.code(),
                other.to_string(),
            ),
        }
    }
}
