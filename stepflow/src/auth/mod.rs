//! Auth session controller.
//!
//! [`AuthController`] keeps a signed-in user's session and profile current:
//! it bootstraps from an existing session, follows the collaborator's
//! notifications, renews the session ahead of expiry and exposes login,
//! logout and profile operations. All collaborator calls go through
//! [`AsyncPipeline`](crate::pipeline::AsyncPipeline)s with auth-aware retry.

mod backend;
mod config;
mod controller;
mod renewal;
mod types;


pub use backend::AuthBackend;
#[cfg(test)]
pub use backend::MockAuthBackend;
pub use config::AuthConfig;
pub use controller::AuthController;
pub use renewal::renewal_delay;
pub use types::{
    AuthEvent, AuthState, Credentials, Identity, LoadingState, Profile, ProfilePatch, Role, Session,
};
