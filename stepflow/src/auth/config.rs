//! Controller configuration.

use crate::retry::{AuthAwareRetryStrategy, BackoffConfig, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_session_retry() -> BackoffConfig {
    BackoffConfig::new()
        .with_max_retries(3)
        .with_base_delay_ms(1000)
        .with_backoff_factor(2.0)
}

fn default_profile_retry() -> BackoffConfig {
    BackoffConfig::new()
        .with_max_retries(2)
        .with_base_delay_ms(500)
        .with_backoff_factor(2.0)
}

fn default_renewal_lead_ms() -> u64 {
    5 * 60 * 1000
}

fn default_request_timeout_ms() -> Option<u64> {
    Some(10_000)
}

fn default_command_buffer() -> usize {
    32
}

/// Configuration for [`AuthController`](super::AuthController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Backoff for session bootstrap, sign-in and session renewal.
    #[serde(default = "default_session_retry")]
    pub session_retry: BackoffConfig,
    /// Backoff for profile loads and saves.
    #[serde(default = "default_profile_retry")]
    pub profile_retry: BackoffConfig,
    /// How long before expiry the session is renewed.
    #[serde(default = "default_renewal_lead_ms")]
    pub renewal_lead_ms: u64,
    /// Limit on each collaborator call attempt.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: Option<u64>,
    /// Trace every collaborator pipeline at debug level.
    #[serde(default)]
    pub trace: bool,
    /// Capacity of the command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_retry: default_session_retry(),
            profile_retry: default_profile_retry(),
            renewal_lead_ms: default_renewal_lead_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            trace: false,
            command_buffer: default_command_buffer(),
        }
    }
}

impl AuthConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session backoff.
    #[must_use]
    pub fn with_session_retry(mut self, retry: BackoffConfig) -> Self {
        self.session_retry = retry;
        self
    }

    /// Sets the profile backoff.
    #[must_use]
    pub fn with_profile_retry(mut self, retry: BackoffConfig) -> Self {
        self.profile_retry = retry;
        self
    }

    /// Sets the renewal lead time.
    #[must_use]
    pub fn with_renewal_lead(mut self, lead: Duration) -> Self {
        self.renewal_lead_ms = u64::try_from(lead.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets or clears the per-call timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_ms =
            timeout.map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enables pipeline tracing.
    #[must_use]
    pub const fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Returns the renewal lead time.
    pub const fn renewal_lead(&self) -> Duration {
        Duration::from_millis(self.renewal_lead_ms)
    }

    /// Returns the per-call timeout.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Builds the session-oriented retry strategy.
    pub fn session_strategy(&self) -> AuthAwareRetryStrategy {
        AuthAwareRetryStrategy::new(ExponentialBackoff::new(self.session_retry.clone()))
    }

    /// Builds the profile-oriented retry strategy.
    pub fn profile_strategy(&self) -> AuthAwareRetryStrategy {
        AuthAwareRetryStrategy::new(ExponentialBackoff::new(self.profile_retry.clone()))
    }
}
