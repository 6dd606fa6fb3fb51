//! Host view of a guest instance, independent of how the guest is hosted.

use std::collections::HashMap;

use recast_types::{Diagnostic, EmissionLimits, FailureKind, InvocationMeta, Record, Routed, Status};

use crate::error::Result;

/// One inbound record handed to a guest, with its delivery metadata.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub record: Record,
    pub offset: i64,
    pub attempt: u32,
    pub deadline_ms: Option<i64>,
}

impl Delivery {
    pub fn new(record: Record, offset: i64) -> Self {
        Self {
            record,
            offset,
            attempt: 1,
            deadline_ms: None,
        }
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: Option<i64>) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    pub fn meta(&self) -> InvocationMeta {
        InvocationMeta {
            offset: self.offset,
            attempt: self.attempt,
            deadline_ms: self.deadline_ms,
        }
    }
}

/// Result of one invocation as seen by the host.
#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub status: Status,
    /// Emissions to drain, in order. Empty unless `status` is a success.
    pub emitted: Vec<Routed>,
    pub diagnostic: Option<Diagnostic>,
    /// The host cut the invocation off and discarded the instance.
    pub abandoned: bool,
}

impl InvocationReport {
    /// Build a report from a guest status code and what it pushed across the
    /// bridge. Emissions are only kept on success.
    pub fn from_guest(status: Status, emitted: Vec<Routed>, diagnostic: Option<Diagnostic>) -> Self {
        let emitted = if status.is_success() {
            emitted
        } else {
            Vec::new()
        };
        let diagnostic = match (status, diagnostic) {
            (Status::RetryableError | Status::FatalError, None) => Some(Diagnostic::new(
                FailureKind::HostRejected,
                status == Status::RetryableError,
                "MISSING_DIAGNOSTIC",
                format!("guest returned {status} without reporting an error"),
            )),
            (_, diagnostic) => diagnostic,
        };
        Self {
            status,
            emitted,
            diagnostic,
            abandoned: false,
        }
    }

    /// The instance was interrupted at its deadline. Retryable from the outside.
    pub fn abandoned(message: impl Into<String>) -> Self {
        Self {
            status: Status::RetryableError,
            emitted: Vec::new(),
            diagnostic: Some(Diagnostic::new(
                FailureKind::Abandoned,
                true,
                "DEADLINE_EXCEEDED",
                message,
            )),
            abandoned: true,
        }
    }

    /// The guest trapped outside a deadline interruption.
    pub fn trapped(message: impl Into<String>) -> Self {
        Self {
            status: Status::FatalError,
            emitted: Vec::new(),
            diagnostic: Some(Diagnostic::new(
                FailureKind::Panicked,
                false,
                "GUEST_TRAP",
                message,
            )),
            abandoned: false,
        }
    }
}

/// Everything a host needs to instantiate a guest for one transform.
#[derive(Debug, Clone)]
pub struct GuestSettings {
    pub name: String,
    pub output_topics: Vec<String>,
    pub env: HashMap<String, String>,
    pub emission: EmissionLimits,
    pub max_memory_bytes: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl GuestSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_topics: Vec::new(),
            env: HashMap::new(),
            emission: EmissionLimits::default(),
            max_memory_bytes: None,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn output_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_topics = topics.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn emission(mut self, limits: EmissionLimits) -> Self {
        self.emission = limits;
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn max_memory_bytes(mut self, bytes: Option<u64>) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Environment visible to the guest: the configured entries plus the
    /// emission limits under their well-known keys.
    pub fn guest_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.insert(
            EmissionLimits::MAX_BYTES_ENV.to_string(),
            self.emission.max_bytes.to_string(),
        );
        env.insert(
            EmissionLimits::MAX_RECORDS_ENV.to_string(),
            self.emission.max_records.to_string(),
        );
        env
    }
}

/// A live guest instance. The host owns it exclusively, so calls never
/// overlap.
pub trait GuestInstance: Send {
    /// Run the guest's `setup` entry point.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::SetupFailed`](crate::error::RuntimeError::SetupFailed)
    /// with the guest's diagnostic, or an engine error.
    fn setup(&mut self) -> Result<()>;

    /// Deliver one record.
    ///
    /// # Errors
    ///
    /// Engine-level failures only; guest failures are reported in the
    /// [`InvocationReport`].
    fn invoke(&mut self, delivery: &Delivery) -> Result<InvocationReport>;

    /// Run the guest's `teardown` entry point and return its final emissions.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::TeardownFailed`](crate::error::RuntimeError::TeardownFailed)
    /// or an engine error.
    fn teardown(&mut self) -> Result<Vec<Routed>>;

    /// The instance was abandoned and must not be called again.
    fn is_poisoned(&self) -> bool {
        false
    }
}

/// Produces fresh guest instances for one transform.
pub trait GuestFactory: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the instance cannot be created.
    fn instantiate(&self, partition: i32) -> Result<Box<dyn GuestInstance>>;
}
