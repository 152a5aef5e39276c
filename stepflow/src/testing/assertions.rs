//! Test assertions for pipeline results and controller state.

use std::fmt::Debug;
use std::time::Duration;

use crate::auth::{AuthController, AuthState, LoadingState};
use crate::errors::{AuthError, AuthErrorKind, PipelineError, PipelineErrorKind};

/// How long [`wait_for_state`] waits before failing the test.
pub const STATE_WAIT_LIMIT: Duration = Duration::from_secs(60);

/// Asserts that a pipeline failed with `kind` at `step`.
pub fn assert_pipeline_error<T: Debug>(
    result: &Result<T, PipelineError>,
    kind: PipelineErrorKind,
    step: usize,
) {
    match result {
        Ok(value) => panic!("Expected {kind} at step {step}, got Ok({value:?})"),
        Err(err) => {
            assert_eq!(err.kind(), kind, "Expected {kind}, got {err}");
            assert_eq!(err.step(), step, "Expected step {step}, got {err}");
        }
    }
}

/// Asserts that an auth error has `kind` and `retryable`.
pub fn assert_auth_error(error: &AuthError, kind: AuthErrorKind, retryable: bool) {
    assert_eq!(error.kind, kind, "Expected {kind} error, got {error}");
    assert_eq!(
        error.retryable, retryable,
        "Expected retryable={retryable} for {error}"
    );
}

/// Asserts that the controller holds an error of `kind`.
pub fn assert_state_error(state: &AuthState, kind: AuthErrorKind) {
    match &state.error {
        Some(error) => assert_eq!(error.kind, kind, "Expected {kind} error, got {error}"),
        None => panic!("Expected {kind} error, state has none: {state:?}"),
    }
}

/// Asserts that the controller is idle with no error.
pub fn assert_idle_without_error(state: &AuthState) {
    assert_eq!(state.loading, LoadingState::Idle, "Expected idle, got {state:?}");
    assert!(state.error.is_none(), "Expected no error, got {:?}", state.error);
}

/// Waits until the controller state satisfies `predicate` and returns it.
///
/// Panics after [`STATE_WAIT_LIMIT`].
pub async fn wait_for_state(
    controller: &AuthController,
    predicate: impl FnMut(&AuthState) -> bool,
) -> AuthState {
    let mut receiver = controller.watch();
    let waited = tokio::time::timeout(STATE_WAIT_LIMIT, receiver.wait_for(predicate))
        .await
        .map(|result| result.map(|state| state.clone()));
    match waited {
        Ok(Ok(state)) => state,
        Ok(Err(_)) => panic!("auth controller stopped while waiting for state"),
        Err(_) => panic!("timed out waiting for state; last: {:?}", *receiver.borrow()),
    }
}

/// Waits until the controller is idle.
pub async fn wait_until_idle(controller: &AuthController) -> AuthState {
    wait_for_state(controller, |state| state.loading == LoadingState::Idle).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_pipeline_error() {
        let result: Result<(), _> = Err(PipelineError::validation(2, "bad"));
        assert_pipeline_error(&result, PipelineErrorKind::Validation, 2);
    }

    #[test]
    #[should_panic(expected = "Expected ExecutionError")]
    fn test_assert_pipeline_error_rejects_ok() {
        let result: Result<i32, PipelineError> = Ok(1);
        assert_pipeline_error(&result, PipelineErrorKind::Execution, 1);
    }

    #[test]
    fn test_assert_auth_error() {
        assert_auth_error(&AuthError::network("down"), AuthErrorKind::Network, true);
        assert_auth_error(&AuthError::session("gone"), AuthErrorKind::Session, false);
    }

    #[test]
    #[should_panic(expected = "Expected retryable=true")]
    fn test_assert_auth_error_checks_retryable() {
        assert_auth_error(&AuthError::auth("bad password"), AuthErrorKind::Auth, true);
    }

    #[test]
    fn test_assert_state_error() {
        let state = AuthState {
            user: None,
            loading: LoadingState::Idle,
            error: Some(AuthError::profile("missing")),
        };
        assert_state_error(&state, AuthErrorKind::Profile);
    }
}
