//! Exponential backoff with symmetric jitter.

use super::RetryStrategy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_ratio() -> f64 {
    0.2
}

/// Configuration for [`ExponentialBackoff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Retries allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per further retry.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Maximum relative perturbation of each delay, in `[0, 1]`.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Cap applied before jitter.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_ratio: default_jitter_ratio(),
            max_delay_ms: None,
        }
    }
}

impl BackoffConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the jitter ratio. Values outside `[0, 1]` are clamped.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Caps the pre-jitter delay.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = Some(delay);
        self
    }
}

/// Retries up to `max_retries` times regardless of the error, waiting
/// `base * factor^(attempt - 1)` jittered by `±jitter_ratio`.
#[derive(Debug, Clone, Default)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Creates a strategy from a config.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Creates a strategy with default delays and the given retry count.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::new(BackoffConfig::default().with_max_retries(max_retries))
    }

    /// Returns the config.
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Returns the number of retries allowed after the first attempt.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Returns the delay for `attempt` before jitter is applied.
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        from_millis_f64(self.base_millis(attempt))
    }

    fn base_millis(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.config.base_delay_ms as f64 * self.config.backoff_factor.powi(exponent);
        let millis = match self.config.max_delay_ms {
            Some(cap) => millis.min(cap as f64),
            None => millis,
        };
        // 0 * inf is NaN once the factor overflows.
        if millis.is_nan() {
            0.0
        } else {
            millis.clamp(0.0, MAX_DELAY_MS)
        }
    }
}

/// Largest delay a `Duration` built from whole nanoseconds can hold.
const MAX_DELAY_MS: f64 = u64::MAX as f64 / 1_000_000.0;

fn from_millis_f64(millis: f64) -> Duration {
    Duration::from_nanos((millis.max(0.0) * 1_000_000.0).round() as u64)
}

impl RetryStrategy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, _error: &anyhow::Error) -> bool {
        attempt <= self.config.max_retries
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_millis(attempt);
        let spread = base * self.config.jitter_ratio;
        if !(spread.is_finite() && spread > 0.0) {
            return from_millis_f64(base);
        }

        from_millis_f64(base + rand::thread_rng().gen_range(-spread..=spread))
    }
}
