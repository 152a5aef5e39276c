//! Retry policies consulted by the asynchronous pipeline executor.
//!
//! A [`RetryStrategy`] answers two questions for a failed attempt: may the
//! step run again, and how long to wait first. Attempts are numbered from 1.
//! Strategies are stateless and shared behind `Arc`.

mod auth_aware;
mod backoff;

pub use auth_aware::AuthAwareRetryStrategy;
pub use backoff::{BackoffConfig, ExponentialBackoff};

use std::fmt::Debug;
use std::time::Duration;

/// Decides whether and when a failed step attempt is retried.
pub trait RetryStrategy: Send + Sync + Debug {
    /// Returns true if the step may run again after failing `attempt`.
    fn should_retry(&self, attempt: u32, error: &anyhow::Error) -> bool;

    /// Returns how long to wait after failed `attempt` before the next one.
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}
