//! Redelivery policy for retryable invocation failures.

use std::time::Duration;

use recast_types::{BackoffClass, Diagnostic};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Default number of deliveries (including the first) before a record is
/// dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Compute retry delay based on diagnostic hints and attempt number.
#[must_use]
pub fn compute_backoff(diagnostic: &Diagnostic, attempt: u32) -> Duration {
    if let Some(ms) = diagnostic.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let base_ms: u64 = match diagnostic.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let exponent = attempt.saturating_sub(1).min(32);
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

/// How often, and how patiently, a retryable record is redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Sleep between attempts using [`compute_backoff`]. Off for tests and
    /// for hosts that schedule redelivery themselves.
    pub backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_attempts` deliveries without sleeping.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: false,
        }
    }

    /// Whether another delivery is allowed after `attempt` failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    #[must_use]
    pub fn delay(&self, diagnostic: &Diagnostic, attempt: u32) -> Duration {
        if self.backoff {
            compute_backoff(diagnostic, attempt)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_types::{FailureKind, TransformError};

    fn diag(class: BackoffClass) -> Diagnostic {
        Diagnostic::from(TransformError::retryable("X", "y").with_backoff(class))
    }

    #[test]
    fn backoff_fast() {
        let d = diag(BackoffClass::Fast);
        assert_eq!(compute_backoff(&d, 1), Duration::from_millis(100));
        assert_eq!(compute_backoff(&d, 2), Duration::from_millis(200));
        assert_eq!(compute_backoff(&d, 3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_normal_and_slow() {
        assert_eq!(
            compute_backoff(&diag(BackoffClass::Normal), 2),
            Duration::from_millis(2000)
        );
        assert_eq!(
            compute_backoff(&diag(BackoffClass::Slow), 2),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn backoff_respects_retry_after() {
        let d = Diagnostic::from(TransformError::retryable("X", "y").with_retry_after_ms(7500));
        assert_eq!(compute_backoff(&d, 1), Duration::from_millis(7500));
        assert_eq!(compute_backoff(&d, 5), Duration::from_millis(7500));
    }

    #[test]
    fn backoff_capped_at_60s() {
        let d = Diagnostic::new(FailureKind::Codec, true, "X", "y");
        assert_eq!(compute_backoff(&d, 20), Duration::from_millis(60_000));
        assert_eq!(compute_backoff(&d, u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn immediate_policy_never_sleeps() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(1));
        assert_eq!(policy.delay(&diag(BackoffClass::Slow), 1), Duration::ZERO);
        assert!(RetryPolicy::default().should_retry(2));
        assert!(!RetryPolicy::default().should_retry(3));
    }
}
