//! Test fixtures for controller and pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use crate::auth::{AuthConfig, AuthController};
use crate::pipeline::Step;
use crate::retry::BackoffConfig;

use super::mocks::FakeAuthBackend;

/// Fast, jitter-free retries for tests.
#[must_use]
pub fn test_backoff(max_retries: u32) -> BackoffConfig {
    BackoffConfig::new()
        .with_max_retries(max_retries)
        .with_base_delay_ms(10)
        .with_backoff_factor(2.0)
        .with_jitter_ratio(0.0)
}

/// An [`AuthConfig`] with short, deterministic backoff.
#[must_use]
pub fn test_auth_config() -> AuthConfig {
    AuthConfig::new()
        .with_session_retry(test_backoff(2))
        .with_profile_retry(test_backoff(1))
        .with_request_timeout(Some(Duration::from_secs(5)))
}

/// A fake backend and an unmounted controller wired to it.
pub struct TestFixture {
    /// The collaborator.
    pub backend: Arc<FakeAuthBackend>,
    /// The controller under test.
    pub controller: AuthController,
}

impl TestFixture {
    /// Creates a fixture with [`test_auth_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_auth_config())
    }

    /// Creates a fixture with `config`.
    #[must_use]
    pub fn with_config(config: AuthConfig) -> Self {
        Self::with_backend(Arc::new(FakeAuthBackend::new()), config)
    }

    /// Creates a fixture over an already scripted backend.
    #[must_use]
    pub fn with_backend(backend: Arc<FakeAuthBackend>, config: AuthConfig) -> Self {
        let controller = AuthController::new(Arc::clone(&backend) as _, config);
        Self { backend, controller }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A step that fails its first `failures` calls, then adds one to its input.
///
/// The returned counter records every call.
#[must_use]
pub fn flaky_step(failures: usize) -> (Step<i64, i64>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let step = Step::new(move |x: i64| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= failures {
            Err(anyhow!("network error on call {call}"))
        } else {
            Ok(x + 1)
        }
    });
    (step, calls)
}

/// A step that always fails with `message`, counting its calls.
#[must_use]
pub fn failing_step(message: &'static str) -> (Step<i64, i64>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let step = Step::new(move |_: i64| -> anyhow::Result<i64> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!(message))
    });
    (step, calls)
}
