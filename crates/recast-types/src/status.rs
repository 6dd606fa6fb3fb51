//! Status codes returned by guest entry points.

use std::fmt;

/// Outcome of a guest entry point call, as it crosses the ABI.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Invocation succeeded and emitted at least one record.
    Ok = 0,
    /// Invocation succeeded and emitted nothing.
    Filtered = 1,
    /// Invocation failed; the host may redeliver the same record.
    RetryableError = 2,
    /// Invocation failed; the instance is stopped.
    FatalError = 3,
}

impl Status {
    /// Decode a raw status code. Unknown codes are treated as fatal since
    /// they indicate a host/guest protocol mismatch.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Filtered,
            2 => Self::RetryableError,
            _ => Self::FatalError,
        }
    }

    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Filtered)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Filtered => "filtered",
            Self::RetryableError => "retryable_error",
            Self::FatalError => "fatal_error",
        };
        f.write_str(s)
    }
}
