//! # Stepflow
//!
//! Sequential step pipelines and an auth session controller built on them.
//!
//! Stepflow provides:
//!
//! - **Step pipelines**: compose unary steps left to right, synchronously or
//!   asynchronously, with 1-based step positions in every error
//! - **Timeout, retry and cancellation**: per-step limits, pluggable retry
//!   strategies and a cooperative abort signal for asynchronous runs
//! - **Branching and memoization**: conditional steps and cached step functions
//! - **Auth controller**: session bootstrap, login/logout, profile loading and
//!   proactive session renewal over an injected collaborator
//!
//! ## Quick Start
//!
//! ```rust
//! use stepflow::prelude::*;
//!
//! let pipeline = pipe!(|x: i64| Ok(x + 1), |x: i64| Ok(x * 2)).unwrap();
//! assert_eq!(pipeline.run(3).unwrap(), 8);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod auth;
pub mod cancellation;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod predicates;
pub mod retry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{
        AuthBackend, AuthConfig, AuthController, AuthEvent, AuthState, LoadingState, Profile,
        ProfilePatch, Session,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::errors::{
        AuthError, AuthErrorKind, PipelineError, PipelineErrorKind, ServiceError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogConfig, LogFormat};
    pub use crate::pipeline::{
        compose, memoize, pipe, pipe_async, pipe_async_with_options, pipe_if, pipe_if_else,
        AsyncPipeline, Condition, ExecutionOptions, Pipeline, PipelineConfig, Step, SyncPipeline,
    };
    pub use crate::retry::{
        AuthAwareRetryStrategy, BackoffConfig, ExponentialBackoff, RetryStrategy,
    };
    pub use crate::{compose, pipe, pipe_async};
}
