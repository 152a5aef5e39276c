//! Retry policy for calls to the auth collaborator.

use super::{ExponentialBackoff, RetryStrategy};
use crate::errors::{classify_failure, FailureClass};
use std::time::Duration;

/// Exponential backoff that only retries transport-shaped failures.
///
/// Credential failures (bad password, unconfirmed email, 401/403) will fail
/// the same way every time, so they stop immediately. Failures with no
/// transport signature stop too.
#[derive(Debug, Clone, Default)]
pub struct AuthAwareRetryStrategy {
    backoff: ExponentialBackoff,
}

impl AuthAwareRetryStrategy {
    /// Wraps a backoff policy.
    #[must_use]
    pub const fn new(backoff: ExponentialBackoff) -> Self {
        Self { backoff }
    }

    /// Returns the wrapped backoff policy.
    #[must_use]
    pub const fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }
}

impl RetryStrategy for AuthAwareRetryStrategy {
    fn should_retry(&self, attempt: u32, error: &anyhow::Error) -> bool {
        match classify_failure(error) {
            FailureClass::Credential | FailureClass::Other => false,
            FailureClass::Transient => self.backoff.should_retry(attempt, error),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}
