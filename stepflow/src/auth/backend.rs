//! The remote auth/database collaborator.

use super::types::{AuthEvent, Identity, Profile, ProfilePatch, Session};
use crate::errors::ServiceError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Everything the controller needs from the hosted auth and profile service.
///
/// Implementations are injected as `Arc<dyn AuthBackend>`; the controller
/// never reaches for a global client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Returns the current session, if one exists.
    async fn get_session(&self) -> Result<Option<Session>, ServiceError>;

    /// Returns the identity behind the current session, if any.
    async fn get_current_identity(&self) -> Result<Option<Identity>, ServiceError>;

    /// Signs in with email and password.
    ///
    /// Success is followed by a [`AuthEvent::SignedIn`] notification.
    async fn sign_in(&self, email: &str, password: &str) -> Result<(), ServiceError>;

    /// Signs out.
    ///
    /// Success is followed by a [`AuthEvent::SignedOut`] notification.
    async fn sign_out(&self) -> Result<(), ServiceError>;

    /// Exchanges the refresh token for a new session.
    async fn refresh_session(&self) -> Result<Session, ServiceError>;

    /// Subscribes to auth notifications.
    ///
    /// The first event delivered is [`AuthEvent::InitialSession`]. Dropping
    /// the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthEvent>;

    /// Loads the profile row for `id`.
    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>, ServiceError>;

    /// Creates or updates the profile row for `id`.
    async fn upsert_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<Profile, ServiceError>;
}
