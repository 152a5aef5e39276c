//! Error types for the stepflow framework.
//!
//! Two layers live here:
//!
//! - [`PipelineError`], the closed taxonomy of pipeline failure modes. Callers
//!   match on the variant (or [`PipelineErrorKind`]) to decide recovery, never
//!   on message text.
//! - The auth-facing types: [`ServiceError`] is what the remote collaborator
//!   reports, [`AuthError`] is what the controller stores and shows.
//!
//! [`classify_failure`] bridges the two by sorting an opaque step failure into
//! credential, transient or other.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;

/// Discriminant of a [`PipelineError`], for matching without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    /// An unclassified step failure.
    Execution,
    /// A step exceeded its allotted duration.
    Timeout,
    /// All configured attempts of a step failed.
    RetryExhausted,
    /// A malformed step list was supplied to a builder.
    Validation,
    /// Cancellation was observed before a step ran.
    Aborted,
}

impl PipelineErrorKind {
    /// Returns the stable type name used in serialized error payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execution => "ExecutionError",
            Self::Timeout => "TimeoutError",
            Self::RetryExhausted => "RetryExhaustedError",
            Self::Validation => "ValidationError",
            Self::Aborted => "AbortError",
        }
    }
}

impl fmt::Display for PipelineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned by every pipeline invocation.
///
/// Step positions are 1-based: `step == 1` is the first step of the list.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step returned an error that is not itself a propagated pipeline error.
    #[error("step {step} failed: {cause}")]
    Execution {
        /// Position of the failing step.
        step: usize,
        /// The error the step returned.
        #[source]
        cause: anyhow::Error,
    },

    /// A step did not settle within the configured timeout.
    #[error("step {step} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Position of the step that timed out.
        step: usize,
        /// The configured per-step timeout.
        timeout: Duration,
    },

    /// Every allowed attempt of a step failed.
    #[error("step {step} failed after {attempts} attempts: {cause}")]
    RetryExhausted {
        /// Position of the step.
        step: usize,
        /// Number of attempts made.
        attempts: u32,
        /// The error of the last attempt.
        #[source]
        cause: anyhow::Error,
    },

    /// A step list failed builder validation.
    #[error("invalid step {step}: {message}")]
    Validation {
        /// Position of the offending argument.
        step: usize,
        /// What is wrong with it.
        message: String,
    },

    /// The abort signal was set before the step could run.
    #[error("pipeline aborted before step {step}{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Aborted {
        /// Position of the step that was skipped.
        step: usize,
        /// Reason recorded on the cancellation token, if any.
        reason: Option<String>,
    },
}

impl PipelineError {
    /// Creates an execution error.
    pub fn execution(step: usize, cause: impl Into<anyhow::Error>) -> Self {
        Self::Execution {
            step,
            cause: cause.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub const fn timeout(step: usize, timeout: Duration) -> Self {
        Self::Timeout { step, timeout }
    }

    /// Creates a retry-exhausted error.
    pub fn retry_exhausted(step: usize, attempts: u32, cause: impl Into<anyhow::Error>) -> Self {
        Self::RetryExhausted {
            step,
            attempts,
            cause: cause.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(step: usize, message: impl Into<String>) -> Self {
        Self::Validation {
            step,
            message: message.into(),
        }
    }

    /// Creates an abort error.
    #[must_use]
    pub const fn aborted(step: usize, reason: Option<String>) -> Self {
        Self::Aborted { step, reason }
    }

    /// Turns whatever a step failed with into the error reported for it.
    ///
    /// Timeout, retry-exhausted, validation and abort errors raised inside the
    /// step (for instance by a nested pipeline) are returned unchanged. Any
    /// other failure, nested execution errors included, is wrapped as an
    /// [`PipelineError::Execution`] at `step`.
    #[must_use]
    pub fn from_step_failure(step: usize, failure: anyhow::Error) -> Self {
        match failure.downcast::<Self>() {
            Ok(err) if err.kind() != PipelineErrorKind::Execution => err,
            Ok(err) => Self::execution(step, err),
            Err(failure) => Self::execution(step, failure),
        }
    }

    /// Returns the variant discriminant.
    #[must_use]
    pub const fn kind(&self) -> PipelineErrorKind {
        match self {
            Self::Execution { .. } => PipelineErrorKind::Execution,
            Self::Timeout { .. } => PipelineErrorKind::Timeout,
            Self::RetryExhausted { .. } => PipelineErrorKind::RetryExhausted,
            Self::Validation { .. } => PipelineErrorKind::Validation,
            Self::Aborted { .. } => PipelineErrorKind::Aborted,
        }
    }

    /// Returns the 1-based step position the error refers to.
    #[must_use]
    pub const fn step(&self) -> usize {
        match self {
            Self::Execution { step, .. }
            | Self::Timeout { step, .. }
            | Self::RetryExhausted { step, .. }
            | Self::Validation { step, .. }
            | Self::Aborted { step, .. } => *step,
        }
    }

    /// Returns the underlying step failure, if the variant carries one.
    #[must_use]
    pub const fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Execution { cause, .. } | Self::RetryExhausted { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Returns true if the executor must never retry past this error.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Aborted { .. } | Self::Validation { .. } | Self::RetryExhausted { .. }
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind().as_str()));
        map.insert("step".to_string(), serde_json::json!(self.step()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::Timeout { timeout, .. } => {
                map.insert("timeout_ms".to_string(), serde_json::json!(timeout.as_millis() as u64));
            }
            Self::RetryExhausted { attempts, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            Self::Aborted { reason: Some(reason), .. } => {
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            _ => {}
        }

        if let Some(cause) = self.cause() {
            map.insert("cause".to_string(), serde_json::json!(format!("{cause:#}")));
        }

        map
    }
}

/// Collaborator error codes that will fail the same way on every attempt.
const CREDENTIAL_FAILURE_CODES: &[&str] = &[
    "invalid_credentials",
    "invalid_grant",
    "email_not_confirmed",
    "user_not_found",
    "user_banned",
    "bad_jwt",
    "not_authorized",
    "weak_password",
];

/// A failure reported by the remote auth/database collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ServiceError {
    /// Machine-readable error code, when the service sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, when the failure came from a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ServiceError {
    /// Creates a service error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            status: None,
        }
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the HTTP status.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns true for credential and authorization failures.
    #[must_use]
    pub fn is_credential_failure(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| CREDENTIAL_FAILURE_CODES.contains(&code))
            || matches!(self.status, Some(401 | 403))
    }
}

/// Coarse classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Bad credentials or missing authorization; retrying cannot help.
    Credential,
    /// Looks like a network or transport blip.
    Transient,
    /// Anything else.
    Other,
}

#[allow(clippy::expect_used)]
static TRANSPORT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)fetch|network|timeout|timed out|connection (refused|reset|closed)|econn\w*|dns|socket|unreachable",
    )
    .expect("transport marker pattern is valid")
});

/// Classifies a step failure by walking its error chain.
///
/// A credential [`ServiceError`] anywhere in the chain wins, then a
/// [`PipelineError::Timeout`], then transport markers in the rendered message.
#[must_use]
pub fn classify_failure(error: &anyhow::Error) -> FailureClass {
    for cause in error.chain() {
        if cause
            .downcast_ref::<ServiceError>()
            .is_some_and(ServiceError::is_credential_failure)
        {
            return FailureClass::Credential;
        }
        if matches!(cause.downcast_ref::<PipelineError>(), Some(PipelineError::Timeout { .. })) {
            return FailureClass::Transient;
        }
    }

    if TRANSPORT_MARKER.is_match(&format!("{error:#}")) {
        FailureClass::Transient
    } else {
        FailureClass::Other
    }
}

fn find_service_error(error: &anyhow::Error) -> Option<&ServiceError> {
    error.chain().find_map(|cause| cause.downcast_ref::<ServiceError>())
}

/// Auth-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// Transport failure talking to the collaborator.
    Network,
    /// Credentials rejected, or sign-in/sign-out refused.
    Auth,
    /// The user's profile could not be loaded or saved.
    Profile,
    /// No usable session.
    Session,
    /// A collaborator call timed out.
    Timeout,
    /// Anything the controller cannot attribute.
    Unknown,
}

impl AuthErrorKind {
    /// Whether errors of this kind are retryable unless stated otherwise.
    #[must_use]
    pub const fn default_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Profile)
    }

    /// Returns the stable type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "NetworkError",
            Self::Auth => "AuthError",
            Self::Profile => "ProfileError",
            Self::Session => "SessionError",
            Self::Timeout => "TimeoutError",
            Self::Unknown => "UnknownError",
        }
    }
}

impl fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured error held in auth state and returned by controller calls.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct AuthError {
    /// Category.
    pub kind: AuthErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Collaborator error code, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Whether `retry_last_operation` will act on this error.
    pub retryable: bool,
    #[serde(skip)]
    cause: Option<Arc<anyhow::Error>>,
}

impl AuthError {
    /// Creates an error with the kind's default retryability.
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            retryable: kind.default_retryable(),
            cause: None,
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Network, message)
    }

    /// Creates an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Auth, message)
    }

    /// Creates a profile error.
    pub fn profile(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Profile, message)
    }

    /// Creates a session error.
    pub fn session(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Session, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Timeout, message)
    }

    /// Creates an unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AuthErrorKind::Unknown, message)
    }

    /// Sets the collaborator error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Overrides retryability.
    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(Arc::new(cause.into()));
        self
    }

    /// Returns the underlying cause, if one was attached.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }

    /// Translates a pipeline failure into an auth error.
    ///
    /// `fallback` is used when the cause is neither a credential failure nor
    /// transport-shaped.
    #[must_use]
    pub fn from_pipeline(err: PipelineError, fallback: AuthErrorKind) -> Self {
        match err.kind() {
            PipelineErrorKind::Aborted | PipelineErrorKind::Validation => {
                Self::unknown(err.to_string()).with_cause(err)
            }
            PipelineErrorKind::Timeout => Self::timeout(err.to_string()).with_cause(err),
            PipelineErrorKind::Execution | PipelineErrorKind::RetryExhausted => {
                let (class, service) = match err.cause() {
                    Some(cause) => (classify_failure(cause), find_service_error(cause).cloned()),
                    None => (FailureClass::Other, None),
                };
                let kind = match class {
                    FailureClass::Credential => AuthErrorKind::Auth,
                    FailureClass::Transient => AuthErrorKind::Network,
                    FailureClass::Other => fallback,
                };
                let message = service
                    .as_ref()
                    .map_or_else(|| err.to_string(), |service| service.message.clone());

                let mut error = Self::new(kind, message).with_cause(err);
                if let Some(code) = service.and_then(|service| service.code) {
                    error = error.with_code(code);
                }
                error
            }
        }
    }
}

impl From<PipelineError> for AuthError {
    fn from(err: PipelineError) -> Self {
        Self::from_pipeline(err, AuthErrorKind::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn invalid_password() -> ServiceError {
        ServiceError::new("Invalid login credentials")
            .with_code("invalid_credentials")
            .with_status(400)
    }

    #[test]
    fn test_constructors_carry_step_and_kind() {
        let err = PipelineError::execution(2, anyhow::anyhow!("boom"));
        assert_eq!(err.kind(), PipelineErrorKind::Execution);
        assert_eq!(err.step(), 2);
        assert_eq!(err.cause().map(ToString::to_string), Some("boom".to_string()));

        let err = PipelineError::timeout(1, Duration::from_millis(50));
        assert_eq!(err.kind(), PipelineErrorKind::Timeout);
        assert_eq!(err.to_string(), "step 1 timed out after 50ms");

        let err = PipelineError::aborted(3, Some("unmounted".to_string()));
        assert_eq!(err.to_string(), "pipeline aborted before step 3: unmounted");
        assert!(err.is_terminal());
    }

    #[test]
    fn test_from_step_failure_keeps_propagated_kinds() {
        let nested = anyhow::Error::new(PipelineError::timeout(1, Duration::from_secs(1)));
        let err = PipelineError::from_step_failure(4, nested);
        assert_eq!(err.kind(), PipelineErrorKind::Timeout);
        assert_eq!(err.step(), 1);

        let nested = anyhow::Error::new(PipelineError::aborted(2, None));
        let err = PipelineError::from_step_failure(5, nested);
        assert_eq!(err.kind(), PipelineErrorKind::Aborted);
        assert_eq!(err.step(), 2);
    }

    #[test]
    fn test_from_step_failure_wraps_nested_execution() {
        let nested = anyhow::Error::new(PipelineError::execution(1, anyhow::anyhow!("inner")));
        let err = PipelineError::from_step_failure(3, nested);
        assert_eq!(err.kind(), PipelineErrorKind::Execution);
        assert_eq!(err.step(), 3);
    }

    #[test]
    fn test_to_dict() {
        let err = PipelineError::retry_exhausted(2, 3, anyhow::anyhow!("offline"));
        let dict = err.to_dict();
        assert_eq!(dict.get("type").unwrap(), "RetryExhaustedError");
        assert_eq!(dict.get("attempts").unwrap(), 3);
        assert_eq!(dict.get("step").unwrap(), 2);
    }

    #[test]
    fn test_credential_failure_codes() {
        assert!(invalid_password().is_credential_failure());
        assert!(ServiceError::new("nope").with_status(401).is_credential_failure());
        assert!(!ServiceError::new("Failed to fetch").is_credential_failure());
    }

    #[test]
    fn test_classify_failure() {
        let credential = anyhow::Error::new(invalid_password());
        assert_eq!(classify_failure(&credential), FailureClass::Credential);

        let network = anyhow::Error::new(ServiceError::new("TypeError: Failed to fetch"));
        assert_eq!(classify_failure(&network), FailureClass::Transient);

        let refused = anyhow::anyhow!("Connection refused by peer");
        assert_eq!(classify_failure(&refused), FailureClass::Transient);

        let timeout = anyhow::Error::new(PipelineError::timeout(1, Duration::from_secs(2)));
        assert_eq!(classify_failure(&timeout), FailureClass::Transient);

        let other = anyhow::anyhow!("row violates check constraint");
        assert_eq!(classify_failure(&other), FailureClass::Other);
    }

    #[test]
    fn test_classify_failure_sees_through_wrapping() {
        let wrapped = anyhow::Error::new(PipelineError::retry_exhausted(1, 3, invalid_password()));
        assert_eq!(classify_failure(&wrapped), FailureClass::Credential);
    }

    #[test]
    fn test_auth_error_defaults() {
        assert!(AuthError::network("down").retryable);
        assert!(AuthError::profile("missing").retryable);
        assert!(!AuthError::auth("bad password").retryable);
        assert!(!AuthError::session("expired").retryable);
        assert!(AuthError::session("expired").with_retryable(true).retryable);
        assert_eq!(AuthError::auth("x").to_string(), "AuthError: x");
    }

    #[test]
    fn test_from_pipeline_credential() {
        let err = PipelineError::execution(1, invalid_password());
        let auth = AuthError::from_pipeline(err, AuthErrorKind::Session);
        assert_eq!(auth.kind, AuthErrorKind::Auth);
        assert!(!auth.retryable);
        assert_eq!(auth.code.as_deref(), Some("invalid_credentials"));
        assert_eq!(auth.message, "Invalid login credentials");
        assert!(auth.cause().is_some());
    }

    #[test]
    fn test_from_pipeline_transient_and_fallback() {
        let err = PipelineError::retry_exhausted(1, 3, ServiceError::new("network error"));
        let auth = AuthError::from_pipeline(err, AuthErrorKind::Session);
        assert_eq!(auth.kind, AuthErrorKind::Network);
        assert!(auth.retryable);

        let err = PipelineError::execution(1, ServiceError::new("database is read-only"));
        let auth = AuthError::from_pipeline(err, AuthErrorKind::Session);
        assert_eq!(auth.kind, AuthErrorKind::Session);
        assert!(!auth.retryable);
    }

    #[test]
    fn test_from_pipeline_timeout_and_abort() {
        let auth = AuthError::from_pipeline(
            PipelineError::timeout(1, Duration::from_secs(10)),
            AuthErrorKind::Auth,
        );
        assert_eq!(auth.kind, AuthErrorKind::Timeout);
        assert!(auth.retryable);

        let auth: AuthError = PipelineError::aborted(1, None).into();
        assert_eq!(auth.kind, AuthErrorKind::Unknown);
        assert!(!auth.retryable);
    }
}
