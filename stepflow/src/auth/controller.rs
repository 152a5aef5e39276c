//! The auth controller: an actor owning auth state.
//!
//! [`AuthController`] is a cheap handle. Mounting spawns one task that owns
//! the state, the renewal deadline and the collaborator subscription, and
//! processes commands, notifications and the renewal timer one at a time.
//! Every collaborator call runs as an asynchronous pipeline with the
//! controller's cancellation token as its abort signal.

use super::backend::AuthBackend;
use super::config::AuthConfig;
use super::renewal::RenewalTimer;
use super::types::{AuthEvent, AuthState, Identity, LoadingState, Profile, ProfilePatch, Session};
use crate::cancellation::CancellationToken;
use crate::errors::{AuthError, AuthErrorKind, PipelineError, PipelineErrorKind, ServiceError};
use crate::pipeline::{ExecutionOptions, Pipeline, StepValue};
use crate::retry::RetryStrategy;
use anyhow::anyhow;
use futures::TryFutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, AuthError>>;

enum Command {
    Login {
        email: String,
        password: String,
        reply: Reply<()>,
    },
    Logout {
        reply: Reply<()>,
    },
    RefreshUser {
        reply: Reply<Profile>,
    },
    UpdateProfile {
        patch: ProfilePatch,
        reply: Reply<Profile>,
    },
    RetryLastOperation {
        reply: Reply<()>,
    },
}

/// Handle to an auth controller.
///
/// Create with [`AuthController::new`], then call [`AuthController::mount`]
/// from within a Tokio runtime. Dropping the handle stops the controller.
pub struct AuthController {
    commands: mpsc::Sender<Command>,
    pending: Mutex<Option<(Worker, mpsc::Receiver<Command>)>>,
    state: watch::Receiver<AuthState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    mounted: AtomicBool,
}

impl AuthController {
    /// Creates an unmounted controller over `backend`.
    pub fn new(backend: Arc<dyn AuthBackend>, config: AuthConfig) -> Self {
        let (commands, receiver) = mpsc::channel(config.command_buffer.max(1));
        let (state_tx, state) = watch::channel(AuthState::default());
        let cancel = CancellationToken::new();

        let worker = Worker {
            session_strategy: Arc::new(config.session_strategy()),
            profile_strategy: Arc::new(config.profile_strategy()),
            backend,
            config,
            state: state_tx,
            cancel: cancel.clone(),
            timer: RenewalTimer::default(),
            session: None,
        };

        Self {
            commands,
            pending: Mutex::new(Some((worker, receiver))),
            state,
            cancel,
            task: Mutex::new(None),
            mounted: AtomicBool::new(false),
        }
    }

    /// Starts the controller: subscribes to notifications and bootstraps the
    /// session.
    ///
    /// Runs at most once per controller; later calls do nothing.
    pub fn mount(&self) {
        let Some((worker, commands)) = self.pending.lock().take() else {
            debug!("auth controller already mounted");
            return;
        };

        self.mounted.store(true, Ordering::SeqCst);
        *self.task.lock() = Some(tokio::spawn(worker.run(commands)));
    }

    /// Returns true between [`AuthController::mount`] and
    /// [`AuthController::unmount`].
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of the state.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Returns the signed-in user's profile.
    pub fn user(&self) -> Option<Profile> {
        self.state.borrow().user.clone()
    }

    /// Returns the current activity.
    pub fn loading(&self) -> LoadingState {
        self.state.borrow().loading
    }

    /// Returns true while any operation is in progress.
    pub fn is_busy(&self) -> bool {
        self.state.borrow().is_busy()
    }

    /// Returns the stored error.
    pub fn error(&self) -> Option<AuthError> {
        self.state.borrow().error.clone()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    /// Signs in.
    ///
    /// Returns once the collaborator accepted the credentials; the user is
    /// loaded when the resulting sign-in notification is processed.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.request(|reply| Command::Login {
            email: email.to_string(),
            password: password.to_string(),
            reply,
        })
        .await
    }

    /// Signs out. State is cleared when the sign-out notification arrives.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::Logout { reply }).await
    }

    /// Reloads the current identity and its profile.
    pub async fn refresh_user(&self) -> Result<Profile, AuthError> {
        self.request(|reply| Command::RefreshUser { reply }).await
    }

    /// Saves changes to the current user's profile.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Profile, AuthError> {
        self.request(|reply| Command::UpdateProfile { patch, reply }).await
    }

    /// Re-runs whatever produced the stored error, if it is retryable.
    ///
    /// Returns the error stored afterwards.
    pub async fn retry_last_operation(&self) -> Result<(), AuthError> {
        self.request(|reply| Command::RetryLastOperation { reply }).await
    }

    /// Stops the controller and waits for its task to finish.
    pub async fn unmount(&self) {
        self.cancel.cancel("auth controller unmounted");
        self.mounted.store(false, Ordering::SeqCst);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "auth controller task ended abnormally");
            }
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, AuthError> {
        if !self.is_mounted() {
            return Err(AuthError::unknown("auth controller is not mounted"));
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AuthError::unknown("auth controller has stopped"))?;
        response
            .await
            .map_err(|_| AuthError::unknown("auth controller dropped the request"))?
    }
}

impl Drop for AuthController {
    fn drop(&mut self) {
        self.cancel.cancel("auth controller dropped");
    }
}

impl std::fmt::Debug for AuthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthController")
            .field("mounted", &self.is_mounted())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Session,
    Profile,
}

/// Owns the state inside the spawned task.
struct Worker {
    backend: Arc<dyn AuthBackend>,
    config: AuthConfig,
    state: watch::Sender<AuthState>,
    cancel: CancellationToken,
    timer: RenewalTimer,
    /// Last session the renewal timer was armed from.
    session: Option<Session>,
    session_strategy: Arc<dyn RetryStrategy>,
    profile_strategy: Arc<dyn RetryStrategy>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut events = Some(self.backend.subscribe());
        info!("auth controller mounted");

        self.bootstrap().await;

        loop {
            let deadline = self.timer.deadline();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = recv_event(&mut events) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("auth notification channel closed");
                        events = None;
                    }
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() => self.renew_session().await,
            }
        }

        self.timer.cancel();
        drop(events);
        info!(reason = ?self.cancel.reason(), "auth controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Login {
                email,
                password,
                reply,
            } => {
                let _ = reply.send(self.login(email, password).await);
            }
            Command::Logout { reply } => {
                let _ = reply.send(self.logout().await);
            }
            Command::RefreshUser { reply } => {
                let _ = reply.send(self.refresh_user().await);
            }
            Command::UpdateProfile { patch, reply } => {
                let _ = reply.send(self.update_profile(patch).await);
            }
            Command::RetryLastOperation { reply } => {
                let _ = reply.send(self.retry_last_operation().await);
            }
        }
    }

    async fn handle_event(&mut self, event: AuthEvent) {
        debug!(event = event.name(), "auth notification");
        match event {
            AuthEvent::InitialSession(_) => {}
            AuthEvent::SignedIn(Some(session)) => {
                info!(user = %session.user.id, "signed in");
                self.adopt_session(session).await;
            }
            AuthEvent::SignedIn(None) => self.bootstrap().await,
            AuthEvent::SignedOut => {
                info!("signed out");
                self.forget_session();
                self.update(|state| {
                    state.user = None;
                    state.loading = LoadingState::Idle;
                    state.error = None;
                });
            }
            AuthEvent::TokenRefreshed(_) | AuthEvent::UserUpdated(_) if self.is_signed_out() => {
                debug!(event = event.name(), "ignoring notification while signed out");
            }
            AuthEvent::TokenRefreshed(session) => {
                if let Some(session) = &session {
                    self.arm_renewal(session);
                }
                self.refresh_profile_quietly(session.as_ref()).await;
            }
            AuthEvent::UserUpdated(session) => {
                self.refresh_profile_quietly(session.as_ref()).await;
            }
            AuthEvent::PasswordRecovery => info!("password recovery requested"),
        }
    }

    async fn bootstrap(&mut self) {
        self.update(|state| {
            state.loading = LoadingState::Initializing;
            state.error = None;
        });

        let fetched = self
            .call("auth.get_session", CallKind::Session, |backend| async move {
                backend.get_session().await
            })
            .await;

        match fetched {
            Ok(Some(session)) => self.adopt_session(session).await,
            Ok(None) => {
                debug!("no active session");
                self.forget_session();
                self.update(|state| {
                    state.user = None;
                    state.loading = LoadingState::Idle;
                    state.error = None;
                });
            }
            Err(err) => {
                if !self.is_shutdown(&err) {
                    let error = AuthError::from_pipeline(err, AuthErrorKind::Session);
                    self.fail(error, |state| state.user = None);
                }
            }
        }
    }

    async fn adopt_session(&mut self, session: Session) {
        self.update(|state| state.loading = LoadingState::RefreshingProfile);

        match self.fetch_profile(session.user.id).await {
            Ok(profile) => {
                self.update(|state| {
                    state.user = Some(profile);
                    state.loading = LoadingState::Idle;
                    state.error = None;
                });
                self.arm_renewal(&session);
            }
            Err(err) => {
                if !self.is_shutdown(&err) {
                    self.fail(profile_error(err), |state| state.user = None);
                }
            }
        }
    }

    async fn refresh_profile_quietly(&mut self, session: Option<&Session>) {
        let id = session
            .map(|session| session.user.id)
            .or_else(|| self.state.borrow().user.as_ref().map(|user| user.id));
        let Some(id) = id else {
            return;
        };

        match self.fetch_profile(id).await {
            Ok(profile) => self.update(|state| state.user = Some(profile)),
            Err(err) => debug!(error = %err, "best-effort profile refresh failed"),
        }
    }

    async fn renew_session(&mut self) {
        self.timer.cancel();
        self.update(|state| state.loading = LoadingState::RefreshingSession);

        let renewed = self
            .call("auth.refresh_session", CallKind::Session, |backend| async move {
                backend.refresh_session().await
            })
            .await;

        match renewed {
            Ok(session) => {
                info!(expires_at = ?session.expiry(), "session renewed");
                self.update(|state| {
                    state.loading = LoadingState::Idle;
                    state.error = None;
                });
                self.arm_renewal(&session);
            }
            Err(err) => {
                if !self.is_shutdown(&err) {
                    let mut error = AuthError::from_pipeline(err, AuthErrorKind::Session);
                    error.kind = AuthErrorKind::Session;
                    error.retryable = true;
                    self.fail(error, |_| {});
                }
            }
        }
    }

    async fn login(&mut self, email: String, password: String) -> Result<(), AuthError> {
        self.update(|state| {
            state.loading = LoadingState::SigningIn;
            state.error = None;
        });

        let signed_in = self
            .call("auth.sign_in", CallKind::Session, move |backend| {
                let email = email.clone();
                let password = password.clone();
                async move { backend.sign_in(&email, &password).await }
            })
            .await;

        match signed_in {
            Ok(()) => {
                debug!("sign-in accepted; waiting for notification");
                Ok(())
            }
            Err(err) => {
                let error = AuthError::from_pipeline(err, AuthErrorKind::Auth);
                self.fail(error.clone(), |_| {});
                Err(error)
            }
        }
    }

    async fn logout(&mut self) -> Result<(), AuthError> {
        self.update(|state| state.loading = LoadingState::SigningOut);
        self.timer.cancel();

        let signed_out = self
            .call("auth.sign_out", CallKind::Session, |backend| async move {
                backend.sign_out().await
            })
            .await;

        match signed_out {
            Ok(()) => {
                self.forget_session();
                Ok(())
            }
            Err(err) => {
                let mut error = AuthError::from_pipeline(err, AuthErrorKind::Auth);
                error.kind = AuthErrorKind::Auth;
                error.retryable = false;
                self.fail(error.clone(), |_| {});
                // Still signed in, so renewal has to keep running.
                if let Some(session) = self.session.clone() {
                    self.arm_renewal(&session);
                }
                Err(error)
            }
        }
    }

    async fn refresh_user(&mut self) -> Result<Profile, AuthError> {
        self.update(|state| {
            state.loading = LoadingState::RefreshingProfile;
            state.error = None;
        });

        let identity = match self.current_identity().await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                let error = AuthError::session("no authenticated user");
                self.fail(error.clone(), |state| state.user = None);
                return Err(error);
            }
            Err(err) => {
                let error = AuthError::from_pipeline(err, AuthErrorKind::Session);
                self.fail(error.clone(), |_| {});
                return Err(error);
            }
        };

        match self.fetch_profile(identity.id).await {
            Ok(profile) => {
                self.update(|state| {
                    state.user = Some(profile.clone());
                    state.loading = LoadingState::Idle;
                    state.error = None;
                });
                Ok(profile)
            }
            Err(err) => {
                let error = profile_error(err);
                self.fail(error.clone(), |_| {});
                Err(error)
            }
        }
    }

    async fn update_profile(&mut self, patch: ProfilePatch) -> Result<Profile, AuthError> {
        let known = self.state.borrow().user.as_ref().map(|user| user.id);
        self.update(|state| {
            state.loading = LoadingState::RefreshingProfile;
            state.error = None;
        });

        let id = match known {
            Some(id) => id,
            None => match self.current_identity().await {
                Ok(Some(identity)) => identity.id,
                Ok(None) => {
                    let error = AuthError::session("no authenticated user");
                    self.fail(error.clone(), |_| {});
                    return Err(error);
                }
                Err(err) => {
                    let error = AuthError::from_pipeline(err, AuthErrorKind::Session);
                    self.fail(error.clone(), |_| {});
                    return Err(error);
                }
            },
        };

        let saved = self
            .call("auth.upsert_profile", CallKind::Profile, move |backend| {
                let patch = patch.clone();
                async move { backend.upsert_profile(id, patch).await }
            })
            .await;

        match saved {
            Ok(profile) => {
                info!(user = %profile.id, "profile saved");
                self.update(|state| {
                    state.user = Some(profile.clone());
                    state.loading = LoadingState::Idle;
                    state.error = None;
                });
                Ok(profile)
            }
            Err(err) => {
                let error = profile_error(err);
                self.fail(error.clone(), |_| {});
                Err(error)
            }
        }
    }

    async fn retry_last_operation(&mut self) -> Result<(), AuthError> {
        let Some(error) = self.state.borrow().error.clone() else {
            return Ok(());
        };
        if !error.retryable {
            debug!(kind = %error.kind, "stored error is not retryable");
            return Err(error);
        }

        match error.kind {
            AuthErrorKind::Network | AuthErrorKind::Session | AuthErrorKind::Timeout => {
                self.bootstrap().await;
            }
            AuthErrorKind::Profile => {
                let _ = self.refresh_user().await;
            }
            AuthErrorKind::Auth | AuthErrorKind::Unknown => return Err(error),
        }

        let outcome = self.state.borrow().error.clone();
        outcome.map_or(Ok(()), Err)
    }

    async fn current_identity(&self) -> Result<Option<Identity>, PipelineError> {
        self.call("auth.get_current_identity", CallKind::Session, |backend| async move {
            backend.get_current_identity().await
        })
        .await
    }

    async fn fetch_profile(&self, id: Uuid) -> Result<Profile, PipelineError> {
        let backend = Arc::clone(&self.backend);
        Pipeline::new()
            .then_async(move |()| {
                let backend = Arc::clone(&backend);
                async move { backend.fetch_profile(id).await.map_err(anyhow::Error::from) }
            })
            .then(move |profile: Option<Profile>| {
                profile.ok_or_else(|| anyhow!("no profile found for user {id}"))
            })
            .build_async_with_options(self.options("auth.fetch_profile", CallKind::Profile))?
            .run(())
            .await
    }

    /// Runs one collaborator call as a single-step pipeline.
    async fn call<T, F, Fut>(&self, label: &str, kind: CallKind, f: F) -> Result<T, PipelineError>
    where
        T: StepValue,
        F: Fn(Arc<dyn AuthBackend>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        Pipeline::new()
            .then_async(move |()| f(Arc::clone(&backend)).map_err(anyhow::Error::from))
            .build_async_with_options(self.options(label, kind))?
            .run(())
            .await
    }

    fn options(&self, label: &str, kind: CallKind) -> ExecutionOptions {
        let (retry, strategy) = match kind {
            CallKind::Session => (&self.config.session_retry, &self.session_strategy),
            CallKind::Profile => (&self.config.profile_retry, &self.profile_strategy),
        };

        let options = ExecutionOptions::new()
            .with_label(label)
            .with_trace(self.config.trace)
            .with_retry_attempts(retry.max_retries.saturating_add(1))
            .with_retry_strategy(Arc::clone(strategy))
            .with_abort_signal(self.cancel.clone());
        match self.config.request_timeout() {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }

    fn arm_renewal(&mut self, session: &Session) {
        match self.timer.arm(session.expiry(), self.config.renewal_lead()) {
            Some(delay) => debug!(delay_secs = delay.as_secs(), "session renewal scheduled"),
            None => debug!("session renewal not scheduled"),
        }
        self.session = Some(session.clone());
    }

    fn forget_session(&mut self) {
        self.timer.cancel();
        self.session = None;
    }

    fn is_signed_out(&self) -> bool {
        self.state.borrow().user.is_none()
    }

    fn is_shutdown(&self, err: &PipelineError) -> bool {
        err.kind() == PipelineErrorKind::Aborted && self.cancel.is_cancelled()
    }

    fn update(&self, change: impl FnOnce(&mut AuthState)) {
        self.state.send_modify(|state| {
            let before = state.loading;
            change(state);
            if state.loading != before {
                debug!(from = %before, to = %state.loading, "auth loading state changed");
            }
        });
    }

    /// Stores `error`, returns to idle and applies `change`.
    fn fail(&self, error: AuthError, change: impl FnOnce(&mut AuthState)) {
        warn!(
            kind = %error.kind,
            retryable = error.retryable,
            code = ?error.code,
            cause = ?error.cause().map(|cause| format!("{cause:#}")),
            "{}",
            error.message
        );
        self.update(|state| {
            change(state);
            state.loading = LoadingState::Idle;
            state.error = Some(error);
        });
    }
}

fn profile_error(err: PipelineError) -> AuthError {
    let mut error = AuthError::from_pipeline(err, AuthErrorKind::Profile);
    error.kind = AuthErrorKind::Profile;
    error.retryable = true;
    error
}

async fn recv_event(events: &mut Option<mpsc::UnboundedReceiver<AuthEvent>>) -> Option<AuthEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
