//! Records exchanged with the auth collaborator and the controller's state.

use crate::errors::AuthError;
use crate::predicates::{is_integer, is_object};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The authenticated principal as the collaborator knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity id; also the profile id.
    pub id: Uuid,
    /// Sign-in email.
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token.
    pub access_token: String,
    /// Token used to obtain a new session.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Who the session belongs to.
    pub user: Identity,
}

impl Session {
    /// Returns the expiry, reading the access token's `exp` claim when
    /// `expires_at` is absent.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_at.or_else(|| {
            let payload = self.access_token.split('.').nth(1)?;
            let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
            let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
            if !is_object(&claims) || !is_integer(&claims["exp"]) {
                return None;
            }
            Utc.timestamp_opt(claims["exp"].as_i64()?, 0).single()
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expiry())
            .finish_non_exhaustive()
    }
}

/// Application role stored on a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Enrolled in classes.
    Student,
    /// Runs classes.
    Teacher,
    /// Manages the installation.
    Admin,
}

/// A user's profile row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same as the identity id.
    pub id: Uuid,
    /// Contact email.
    #[serde(default)]
    pub email: Option<String>,
    /// Display name.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Role, if assigned.
    #[serde(default)]
    pub role: Option<Role>,
    /// Avatar image URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Creates an otherwise empty profile for `id`.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self {
            id,
            email: None,
            full_name: None,
            role: None,
            avatar_url: None,
            updated_at: None,
        }
    }

    /// Applies the fields present in `patch`.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        if let Some(email) = &patch.email {
            self.email = Some(email.clone());
        }
        if let Some(full_name) = &patch.full_name {
            self.full_name = Some(full_name.clone());
        }
        if let Some(role) = patch.role {
            self.role = Some(role);
        }
        if let Some(avatar_url) = &patch.avatar_url {
            self.avatar_url = Some(avatar_url.clone());
        }
    }
}

/// A partial profile update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    /// New email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// New role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// New avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    /// Sets the display name.
    #[must_use]
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Sets the role.
    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Sets the avatar URL.
    #[must_use]
    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }
}

/// A push notification from the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Delivered once on subscription with whatever session exists.
    InitialSession(Option<Session>),
    /// A user signed in.
    SignedIn(Option<Session>),
    /// The user signed out or the session was revoked.
    SignedOut,
    /// The session was renewed.
    TokenRefreshed(Option<Session>),
    /// The identity's attributes changed.
    UserUpdated(Option<Session>),
    /// A password recovery link was followed.
    PasswordRecovery,
}

impl AuthEvent {
    /// Returns the session carried by the event, if any.
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::InitialSession(session)
            | Self::SignedIn(session)
            | Self::TokenRefreshed(session)
            | Self::UserUpdated(session) => session.as_ref(),
            Self::SignedOut | Self::PasswordRecovery => None,
        }
    }

    /// Returns the collaborator's name for the event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InitialSession(_) => "INITIAL_SESSION",
            Self::SignedIn(_) => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed(_) => "TOKEN_REFRESHED",
            Self::UserUpdated(_) => "USER_UPDATED",
            Self::PasswordRecovery => "PASSWORD_RECOVERY",
        }
    }
}

/// What the controller is currently doing. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingState {
    /// Nothing in progress.
    Idle,
    /// Session bootstrap after mount.
    Initializing,
    /// A login call is in progress.
    SigningIn,
    /// A logout call is in progress.
    SigningOut,
    /// The profile is being loaded or saved.
    RefreshingProfile,
    /// The session is being renewed.
    RefreshingSession,
}

impl fmt::Display for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::SigningIn => "signing_in",
            Self::SigningOut => "signing_out",
            Self::RefreshingProfile => "refreshing_profile",
            Self::RefreshingSession => "refreshing_session",
        };
        f.write_str(name)
    }
}

/// Observable controller state.
#[derive(Debug, Clone, Serialize)]
pub struct AuthState {
    /// The signed-in user's profile.
    pub user: Option<Profile>,
    /// Current activity.
    pub loading: LoadingState,
    /// Last error, until cleared by a successful transition.
    pub error: Option<AuthError>,
}

impl AuthState {
    /// Returns true while any operation is in progress.
    pub fn is_busy(&self) -> bool {
        self.loading != LoadingState::Idle
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            loading: LoadingState::Initializing,
            error: None,
        }
    }
}

/// Email and password for [`AuthBackend::sign_in`](super::AuthBackend::sign_in).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Sign-in email.
    pub email: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}
