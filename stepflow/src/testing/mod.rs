//! Testing utilities for pipelines and the auth controller.
//!
//! This module provides:
//! - An in-memory, scriptable auth collaborator
//! - Fixtures wiring a controller to it
//! - Assertions for pipeline errors and controller state

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_auth_error, assert_idle_without_error, assert_pipeline_error, assert_state_error,
    wait_for_state, wait_until_idle, STATE_WAIT_LIMIT,
};
pub use fixtures::{failing_step, flaky_step, test_auth_config, test_backoff, TestFixture};
pub use mocks::{invalid_credentials, network_failure, BackendCall, FakeAuthBackend};
