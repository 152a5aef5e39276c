//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is the abort signal handed to asynchronous
//! pipelines and owned by the auth controller for its lifetime.

mod token;

pub use token::CancellationToken;
