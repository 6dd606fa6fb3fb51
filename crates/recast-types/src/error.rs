//! Structured failure model for transform invocations.
//!
//! [`TransformError`] is what user transform code returns. [`Diagnostic`] is
//! the serialized form of any invocation failure as it crosses the bridge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Retry backoff strategy the host should apply to a retryable failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    #[default]
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Failure raised by user transform logic.
///
/// Construct via [`TransformError::retryable`] or [`TransformError::fatal`].
/// A fatal failure stops the guest instance; a retryable one leaves it
/// running and asks the host to redeliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TransformError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TransformError {
    fn new(retryable: bool, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
            backoff_class: BackoffClass::Normal,
            retry_after_ms: None,
            details: None,
        }
    }

    /// Failure the host may retry by redelivering the same record.
    #[must_use]
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(true, code, message)
    }

    /// Failure that stops the instance.
    #[must_use]
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(false, code, message)
    }

    #[must_use]
    pub fn with_backoff(mut self, class: BackoffClass) -> Self {
        self.backoff_class = class;
        self
    }

    #[must_use]
    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Which part of the execution contract a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Inbound record could not be decoded.
    Codec,
    /// Emission buffer limits were exceeded.
    EmissionLimit,
    /// User transform returned an error.
    Transform,
    /// A second transform registration was attempted.
    DoubleRegistration,
    /// An entry point was called in a state that does not allow it.
    LifecycleViolation,
    /// User code panicked.
    Panicked,
    /// The host refused a bridge call (unknown topic, malformed payload).
    HostRejected,
    /// The host abandoned the invocation (deadline, trap).
    Abandoned,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Codec => "codec",
            Self::EmissionLimit => "emission_limit",
            Self::Transform => "transform",
            Self::DoubleRegistration => "double_registration",
            Self::LifecycleViolation => "lifecycle_violation",
            Self::Panicked => "panicked",
            Self::HostRejected => "host_rejected",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Serialized failure payload reported by the guest alongside an error status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {code}: {message}")]
pub struct Diagnostic {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default)]
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Diagnostic {
    pub fn new(
        kind: FailureKind,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            retryable,
            backoff_class: BackoffClass::Normal,
            retry_after_ms: None,
            details: None,
        }
    }

    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload is not a diagnostic.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// # Errors
    ///
    /// Serialization only fails if `details` holds a non-string map key.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl From<TransformError> for Diagnostic {
    fn from(err: TransformError) -> Self {
        Self {
            kind: FailureKind::Transform,
            code: err.code,
            message: err.message,
            retryable: err.retryable,
            backoff_class: err.backoff_class,
            retry_after_ms: err.retry_after_ms,
            details: err.details,
        }
    }
}
