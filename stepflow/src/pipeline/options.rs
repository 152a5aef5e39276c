//! Pipeline configuration and per-invocation execution options.

use crate::cancellation::CancellationToken;
use crate::events::EventSink;
use crate::retry::{BackoffConfig, ExponentialBackoff, RetryStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

fn default_strict_validation() -> bool {
    true
}

/// Build-time behaviour of pipelines and memoized functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Reject malformed step lists when a pipeline is built.
    ///
    /// When off, the same defects are reported as execution errors on the
    /// first run instead.
    #[serde(default = "default_strict_validation")]
    pub strict_validation: bool,
    /// Count hits and misses in memoized functions.
    #[serde(default)]
    pub collect_stats: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strict_validation: default_strict_validation(),
            collect_stats: false,
        }
    }
}

impl PipelineConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables build-time validation.
    #[must_use]
    pub const fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    /// Enables or disables memoization statistics.
    #[must_use]
    pub const fn with_collect_stats(mut self, collect: bool) -> Self {
        self.collect_stats = collect;
        self
    }
}

/// Options applied to every run of an asynchronous pipeline.
///
/// Everything is optional: the default is no tracing, no timeout, a single
/// attempt per step and no abort signal.
#[derive(Clone)]
pub struct ExecutionOptions {
    /// Log input, intermediate values and output at debug level.
    pub trace: bool,
    /// Label used in traces, logs and events.
    pub label: Option<String>,
    /// Limit on each attempt of each asynchronous step.
    pub timeout: Option<Duration>,
    /// Total attempts per step; 0 and 1 both mean a single attempt.
    pub retry_attempts: u32,
    /// Base delay between attempts for the default backoff.
    pub retry_delay: Duration,
    /// Checked before every step and every retry attempt.
    pub abort_signal: Option<CancellationToken>,
    /// Overrides the default exponential backoff.
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    /// Receives `pipeline.*` events.
    pub event_sink: Option<Arc<dyn EventSink>>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            trace: false,
            label: None,
            timeout: None,
            retry_attempts: 1,
            retry_delay: Duration::from_millis(1000),
            abort_signal: None,
            retry_strategy: None,
            event_sink: None,
        }
    }
}

impl ExecutionOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables tracing.
    #[must_use]
    pub const fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the per-step timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the total number of attempts per step.
    #[must_use]
    pub const fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the base retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the abort signal.
    #[must_use]
    pub fn with_abort_signal(mut self, token: CancellationToken) -> Self {
        self.abort_signal = Some(token);
        self
    }

    /// Sets an explicit retry strategy.
    #[must_use]
    pub fn with_retry_strategy(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Returns the label, or `"pipeline"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("pipeline")
    }

    /// Returns the effective number of attempts per step.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }

    /// Returns the explicit strategy, or exponential backoff derived from
    /// `retry_attempts` and `retry_delay`.
    #[must_use]
    pub fn strategy(&self) -> Arc<dyn RetryStrategy> {
        if let Some(strategy) = &self.retry_strategy {
            return Arc::clone(strategy);
        }

        let base_delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX);
        Arc::new(ExponentialBackoff::new(
            BackoffConfig::new()
                .with_max_retries(self.max_attempts() - 1)
                .with_base_delay_ms(base_delay_ms),
        ))
    }
}

impl std::fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("trace", &self.trace)
            .field("label", &self.label)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("abort_signal", &self.abort_signal)
            .field("retry_strategy", &self.retry_strategy)
            .field("event_sink", &self.event_sink.is_some())
            .finish()
    }
}
