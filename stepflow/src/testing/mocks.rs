//! An in-memory auth collaborator for tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{AuthBackend, AuthEvent, Identity, Profile, ProfilePatch, Session};
use crate::errors::ServiceError;

/// The collaborator operations a [`FakeAuthBackend`] can count, fail or slow down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCall {
    /// `get_session`
    GetSession,
    /// `get_current_identity`
    GetCurrentIdentity,
    /// `sign_in`
    SignIn,
    /// `sign_out`
    SignOut,
    /// `refresh_session`
    RefreshSession,
    /// `fetch_profile`
    FetchProfile,
    /// `upsert_profile`
    UpsertProfile,
}

#[derive(Debug)]
struct Account {
    password: String,
    identity: Identity,
}

#[derive(Debug)]
struct FakeState {
    accounts: HashMap<String, Account>,
    profiles: HashMap<Uuid, Profile>,
    session: Option<Session>,
    session_lifetime: chrono::Duration,
    failures: HashMap<BackendCall, VecDeque<ServiceError>>,
    delays: HashMap<BackendCall, Duration>,
    calls: HashMap<BackendCall, usize>,
}

/// A scriptable [`AuthBackend`] holding accounts, profiles and one session.
///
/// Sign-in, sign-out and renewal push the same notifications a hosted
/// service would. Failures are queued per operation and consumed one call at
/// a time.
#[derive(Debug)]
pub struct FakeAuthBackend {
    state: Mutex<FakeState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuthEvent>>>,
}

impl FakeAuthBackend {
    /// Creates an empty backend issuing one-hour sessions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                accounts: HashMap::new(),
                profiles: HashMap::new(),
                session: None,
                session_lifetime: chrono::Duration::hours(1),
                failures: HashMap::new(),
                delays: HashMap::new(),
                calls: HashMap::new(),
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Sets how long newly issued sessions last.
    pub fn set_session_lifetime(&self, lifetime: Duration) {
        self.state.lock().session_lifetime =
            chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::days(365));
    }

    /// Registers an account with a profile and returns its identity.
    pub fn add_account(&self, email: &str, password: &str) -> Identity {
        let identity = self.add_account_without_profile(email, password);
        let mut profile = Profile::new(identity.id);
        profile.email = Some(email.to_string());
        self.state.lock().profiles.insert(identity.id, profile);
        identity
    }

    /// Registers an account that has no profile row.
    pub fn add_account_without_profile(&self, email: &str, password: &str) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        self.state.lock().accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Starts a session for `email` without notifying subscribers.
    pub fn start_session(&self, email: &str) -> Option<Session> {
        let mut state = self.state.lock();
        let identity = state.accounts.get(email)?.identity.clone();
        let session = issue_session(identity, state.session_lifetime);
        state.session = Some(session.clone());
        Some(session)
    }

    /// Drops the current session without notifying subscribers.
    pub fn clear_session(&self) {
        self.state.lock().session = None;
    }

    /// Returns the current session.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    /// Replaces a stored profile.
    pub fn set_profile(&self, profile: Profile) {
        self.state.lock().profiles.insert(profile.id, profile);
    }

    /// Returns a stored profile.
    #[must_use]
    pub fn profile(&self, id: Uuid) -> Option<Profile> {
        self.state.lock().profiles.get(&id).cloned()
    }

    /// Makes the next call to `call` fail with `error`.
    pub fn fail_next(&self, call: BackendCall, error: ServiceError) {
        self.fail_times(call, 1, error);
    }

    /// Makes the next `times` calls to `call` fail with `error`.
    pub fn fail_times(&self, call: BackendCall, times: usize, error: ServiceError) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(call).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Makes every call to `call` take `delay` before answering.
    pub fn set_delay(&self, call: BackendCall, delay: Duration) {
        self.state.lock().delays.insert(call, delay);
    }

    /// Returns how many times `call` was made.
    #[must_use]
    pub fn calls(&self, call: BackendCall) -> usize {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.len()
    }

    /// Pushes `event` to every subscriber.
    pub fn emit(&self, event: AuthEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    async fn enter(&self, call: BackendCall) -> Result<(), ServiceError> {
        let (failure, delay) = {
            let mut state = self.state.lock();
            *state.calls.entry(call).or_default() += 1;
            let failure = state.failures.get_mut(&call).and_then(VecDeque::pop_front);
            (failure, state.delays.get(&call).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        failure.map_or(Ok(()), Err)
    }
}

impl Default for FakeAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn issue_session(identity: Identity, lifetime: chrono::Duration) -> Session {
    Session {
        access_token: format!("access-{}", Uuid::new_v4()),
        refresh_token: Some(format!("refresh-{}", Uuid::new_v4())),
        expires_at: Some(Utc::now() + lifetime),
        user: identity,
    }
}

/// The error a hosted service returns for a bad email or password.
#[must_use]
pub fn invalid_credentials() -> ServiceError {
    ServiceError::new("Invalid login credentials")
        .with_code("invalid_credentials")
        .with_status(400)
}

/// A transport-shaped failure.
#[must_use]
pub fn network_failure() -> ServiceError {
    ServiceError::new("network error: connection reset").with_status(503)
}

#[async_trait]
impl AuthBackend for FakeAuthBackend {
    async fn get_session(&self) -> Result<Option<Session>, ServiceError> {
        self.enter(BackendCall::GetSession).await?;
        Ok(self.session())
    }

    async fn get_current_identity(&self) -> Result<Option<Identity>, ServiceError> {
        self.enter(BackendCall::GetCurrentIdentity).await?;
        Ok(self.session().map(|session| session.user))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), ServiceError> {
        self.enter(BackendCall::SignIn).await?;

        let session = {
            let mut state = self.state.lock();
            let identity = match state.accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(invalid_credentials()),
            };
            let session = issue_session(identity, state.session_lifetime);
            state.session = Some(session.clone());
            session
        };

        self.emit(AuthEvent::SignedIn(Some(session)));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), ServiceError> {
        self.enter(BackendCall::SignOut).await?;
        self.clear_session();
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session, ServiceError> {
        self.enter(BackendCall::RefreshSession).await?;

        let session = {
            let mut state = self.state.lock();
            let Some(current) = state.session.as_ref() else {
                return Err(ServiceError::new("no session to refresh").with_code("session_not_found"));
            };
            let session = issue_session(current.user.clone(), state.session_lifetime);
            state.session = Some(session.clone());
            session
        };

        self.emit(AuthEvent::TokenRefreshed(Some(session.clone())));
        Ok(session)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<AuthEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(AuthEvent::InitialSession(self.session()));
        self.subscribers.lock().push(sender);
        receiver
    }

    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>, ServiceError> {
        self.enter(BackendCall::FetchProfile).await?;
        Ok(self.profile(id))
    }

    async fn upsert_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<Profile, ServiceError> {
        self.enter(BackendCall::UpsertProfile).await?;

        let mut state = self.state.lock();
        let profile = state.profiles.entry(id).or_insert_with(|| Profile::new(id));
        profile.apply(&patch);
        profile.updated_at = Some(Utc::now());
        Ok(profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_sign_in_issues_session_and_notifies() {
        let backend = FakeAuthBackend::new();
        let identity = backend.add_account("ada@example.com", "pw");
        let mut events = backend.subscribe();
        assert_eq!(events.recv().await, Some(AuthEvent::InitialSession(None)));

        backend.sign_in("ada@example.com", "pw").await.unwrap();

        let session = backend.session().unwrap();
        assert_eq!(session.user, identity);
        assert_eq!(events.recv().await, Some(AuthEvent::SignedIn(Some(session))));
        assert_eq!(backend.calls(BackendCall::SignIn), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let backend = FakeAuthBackend::new();
        backend.add_account("ada@example.com", "pw");

        let err = backend.sign_in("ada@example.com", "nope").await.unwrap_err();
        assert!(err.is_credential_failure());
        assert!(backend.session().is_none());
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let backend = FakeAuthBackend::new();
        backend.fail_times(BackendCall::GetSession, 2, network_failure());

        assert!(backend.get_session().await.is_err());
        assert!(backend.get_session().await.is_err());
        assert_eq!(backend.get_session().await, Ok(None));
        assert_eq!(backend.calls(BackendCall::GetSession), 3);
    }

    #[tokio::test]
    async fn test_upsert_creates_and_patches() {
        let backend = FakeAuthBackend::new();
        let id = Uuid::new_v4();

        let profile = backend
            .upsert_profile(id, ProfilePatch::default().with_full_name("Ada"))
            .await
            .unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Ada"));
        assert!(profile.updated_at.is_some());
        assert_eq!(backend.profile(id), Some(profile));
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let backend = FakeAuthBackend::new();
        let events = backend.subscribe();
        assert_eq!(backend.subscriber_count(), 1);

        drop(events);
        backend.emit(AuthEvent::PasswordRecovery);
        assert_eq!(backend.subscriber_count(), 0);
    }
}
