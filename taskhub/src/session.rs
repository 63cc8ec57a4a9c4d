//! Session controller.
//!
//! Drives the login/logout state machine and owns every session-scoped
//! object: the credential-bound repository, the [`Synchronizer`] and the
//! push subscription. Opening a session builds all three through a
//! [`SessionFactory`]; closing it tears them down so nothing from the old
//! session can write to state afterwards.
//!
//! ```text
//! Anonymous ──begin_login──▶ Authenticating ──complete_login──▶ Authenticated
//!     ▲                                                              │
//!     └──────────────── logout / Auth error ◀────────────────────────┘
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use taskhub_proto::api::{AUTH_LOGIN_PATH, TOKEN_QUERY_PARAM};

use crate::config::ClientConfig;
use crate::credential::{Credential, CredentialError, CredentialStore};
use crate::push::{self, PushError, PushSubscription, RemoteEventSink};
use crate::repo::http::HttpTaskRepository;
use crate::repo::{RepoError, TaskRepository};
use crate::sync::Synchronizer;

/// Login state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credential.
    Anonymous,
    /// Sent to the identity provider, waiting for the return redirect.
    Authenticating,
    /// A credential is active and the session objects are open.
    Authenticated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// Errors from session transitions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The action is not allowed in the current state.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// State the controller was in.
        state: SessionState,
        /// Attempted action.
        action: &'static str,
    },

    /// The return URL carried no `token` parameter.
    #[error("return url has no token")]
    MissingToken,

    /// The return URL could not be parsed.
    #[error("invalid return url: {0}")]
    InvalidReturnUrl(#[from] url::ParseError),

    /// The identity-provider URL could not be built from the service URL.
    #[error("service url {0} cannot be a base")]
    InvalidServiceUrl(Url),

    /// Persisting or reading the credential failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The session repository could not be built.
    #[error(transparent)]
    Repository(#[from] RepoError),
}

/// Builds the session-scoped objects for a credential.
pub trait SessionFactory: Send + Sync {
    /// Repository type handed to the synchronizer.
    type Repository: TaskRepository + 'static;

    /// Builds a repository bound to `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the repository cannot be built.
    fn repository(&self, credential: &Credential) -> Result<Self::Repository, SessionError>;

    /// Opens the push channel for `credential`, delivering into `sink`.
    ///
    /// `Ok(None)` means live updates are disabled for this factory.
    fn subscribe_push(
        &self,
        credential: &Credential,
        sink: Arc<dyn RemoteEventSink>,
    ) -> impl Future<Output = Result<Option<PushSubscription>, PushError>> + Send;
}

impl<T: SessionFactory> SessionFactory for Arc<T> {
    type Repository = T::Repository;

    fn repository(&self, credential: &Credential) -> Result<Self::Repository, SessionError> {
        T::repository(self, credential)
    }

    fn subscribe_push(
        &self,
        credential: &Credential,
        sink: Arc<dyn RemoteEventSink>,
    ) -> impl Future<Output = Result<Option<PushSubscription>, PushError>> + Send {
        T::subscribe_push(self, credential, sink)
    }
}

/// Production factory: HTTP repository plus WebSocket push channel.
#[derive(Debug, Clone)]
pub struct RemoteSessionFactory {
    service_url: Url,
    push_url: Url,
    request_timeout: Duration,
    push_connect_timeout: Duration,
    live: bool,
}

impl RemoteSessionFactory {
    /// Creates a factory from resolved client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            service_url: config.service_url.clone(),
            push_url: config.push_url.clone(),
            request_timeout: config.request_timeout,
            push_connect_timeout: config.push_connect_timeout,
            live: true,
        }
    }

    /// Enables or disables the push channel for sessions built by this factory.
    #[must_use]
    pub const fn with_live_updates(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// The service base URL.
    #[must_use]
    pub const fn service_url(&self) -> &Url {
        &self.service_url
    }
}

impl SessionFactory for RemoteSessionFactory {
    type Repository = HttpTaskRepository;

    fn repository(&self, credential: &Credential) -> Result<Self::Repository, SessionError> {
        Ok(HttpTaskRepository::new(
            self.service_url.clone(),
            Some(credential.clone()),
            self.request_timeout,
        )?)
    }

    async fn subscribe_push(
        &self,
        credential: &Credential,
        sink: Arc<dyn RemoteEventSink>,
    ) -> Result<Option<PushSubscription>, PushError> {
        if !self.live {
            return Ok(None);
        }
        let subscription =
            push::websocket::connect(&self.push_url, credential, self.push_connect_timeout, sink)
                .await?;
        Ok(Some(subscription))
    }
}

/// Objects that live exactly as long as one authenticated session.
struct ActiveSession<R> {
    credential: Credential,
    synchronizer: Arc<Synchronizer<R>>,
    push: Option<PushSubscription>,
}

impl<R> ActiveSession<R> {
    fn close(mut self) {
        if let Some(push) = self.push.take() {
            push.unsubscribe();
        }
        self.synchronizer.shutdown();
    }
}

/// Login/logout state machine over a credential store and a session factory.
pub struct SessionController<S, F: SessionFactory> {
    store: S,
    factory: F,
    service_url: Url,
    state: SessionState,
    session: Option<ActiveSession<F::Repository>>,
}

impl<S: CredentialStore, F: SessionFactory> SessionController<S, F> {
    /// Creates an anonymous controller. Call [`SessionController::restore`]
    /// to pick up a persisted credential.
    pub const fn new(store: S, factory: F, service_url: Url) -> Self {
        Self {
            store,
            factory,
            service_url,
            state: SessionState::Anonymous,
            session: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The session's synchronizer, while authenticated.
    #[must_use]
    pub fn synchronizer(&self) -> Option<&Arc<Synchronizer<F::Repository>>> {
        self.session.as_ref().map(|s| &s.synchronizer)
    }

    /// Whether the session has a live push channel.
    #[must_use]
    pub fn push_active(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.push.as_ref())
            .is_some_and(PushSubscription::is_active)
    }

    /// The identity-provider URL (`<service>/auth/google`).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidServiceUrl`] if the service URL cannot
    /// take path segments.
    pub fn login_url(&self) -> Result<Url, SessionError> {
        let mut url = self.service_url.clone();
        url.path_segments_mut()
            .map_err(|()| SessionError::InvalidServiceUrl(self.service_url.clone()))?
            .pop_if_empty()
            .extend(AUTH_LOGIN_PATH);
        Ok(url)
    }

    /// Starts login and returns the URL to send the user to.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] while authenticated.
    pub fn begin_login(&mut self) -> Result<Url, SessionError> {
        if self.state == SessionState::Authenticated {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "begin login",
            });
        }
        let url = self.login_url()?;
        self.state = SessionState::Authenticating;
        tracing::info!(url = %url, "login started");
        Ok(url)
    }

    /// Completes login from the identity provider's return URL.
    ///
    /// Returns the URL with the `token` parameter removed. Completing twice
    /// with the same credential is a no-op; a different credential replaces
    /// the current session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidReturnUrl`] if `return_url` does not parse.
    /// - [`SessionError::MissingToken`] if it carries no usable token; the
    ///   state is left unchanged.
    /// - [`SessionError::Credential`] if the credential cannot be persisted;
    ///   the current session, if any, is kept.
    /// - [`SessionError::Repository`] if the session cannot be opened; the
    ///   controller ends up `Anonymous` with an empty store.
    pub async fn complete_login(&mut self, return_url: &str) -> Result<Url, SessionError> {
        let url = Url::parse(return_url)?;
        let (token, cleaned) = extract_token(&url);
        let credential = token
            .and_then(|t| Credential::new(t).ok())
            .ok_or(SessionError::MissingToken)?;

        if self
            .session
            .as_ref()
            .is_some_and(|current| current.credential == credential)
        {
            tracing::debug!("login already completed for this credential");
            return Ok(cleaned);
        }

        // Persist first: a failed write leaves the current session untouched.
        self.store.store(&credential)?;
        if self.session.is_some() {
            tracing::info!("new credential, replacing current session");
            self.close_session();
        }

        if let Err(e) = self.open_session(credential).await {
            tracing::warn!(err = %e, "session could not be opened, logging out");
            self.state = SessionState::Anonymous;
            if let Err(clear_err) = self.store.clear() {
                tracing::warn!(err = %clear_err, "failed to clear credential");
            }
            return Err(e);
        }
        tracing::info!("login completed");
        Ok(cleaned)
    }

    /// Enters `Authenticated` directly if a credential was persisted.
    ///
    /// Returns whether a session was restored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Credential`] if the store cannot be read, or
    /// [`SessionError::Repository`] if the session cannot be opened.
    pub async fn restore(&mut self) -> Result<bool, SessionError> {
        if self.session.is_some() {
            return Ok(true);
        }
        let Some(credential) = self.store.load()? else {
            tracing::debug!("no persisted credential");
            return Ok(false);
        };
        self.open_session(credential).await?;
        tracing::info!("session restored from persisted credential");
        Ok(true)
    }

    /// Ends the session from any state and clears the persisted credential.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Credential`] if the store cannot be cleared.
    /// The in-memory session is closed regardless.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.close_session();
        self.state = SessionState::Anonymous;
        self.store.clear()?;
        tracing::info!("logged out");
        Ok(())
    }

    /// Logs out if `err` is an authorization failure. Returns whether it did.
    ///
    /// # Errors
    ///
    /// Same as [`SessionController::logout`].
    pub fn enforce(&mut self, err: &RepoError) -> Result<bool, SessionError> {
        if !err.is_auth() {
            return Ok(false);
        }
        tracing::warn!(err = %err, "authorization rejected, forcing logout");
        self.logout()?;
        Ok(true)
    }

    /// Applies [`SessionController::enforce`] to the synchronizer's last error.
    ///
    /// # Errors
    ///
    /// Same as [`SessionController::logout`].
    pub fn enforce_sync_state(&mut self) -> Result<bool, SessionError> {
        let last_error = self
            .synchronizer()
            .and_then(|sync| sync.snapshot().last_error);
        match last_error {
            Some(err) => self.enforce(&err),
            None => Ok(false),
        }
    }

    async fn open_session(&mut self, credential: Credential) -> Result<(), SessionError> {
        let repo = self.factory.repository(&credential)?;
        let synchronizer = Synchronizer::spawn(repo);

        let sink = Arc::clone(&synchronizer) as Arc<dyn RemoteEventSink>;
        let push = match self.factory.subscribe_push(&credential, sink).await {
            Ok(push) => push,
            Err(e) => {
                tracing::warn!(err = %e, "push channel unavailable, continuing without live updates");
                None
            }
        };

        self.session = Some(ActiveSession {
            credential,
            synchronizer,
            push,
        });
        self.state = SessionState::Authenticated;
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}

impl<S, F: SessionFactory> Drop for SessionController<S, F> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}

/// Splits the `token` parameter off a return URL.
fn extract_token(url: &Url) -> (Option<String>, Url) {
    let mut token = None;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter_map(|(key, value)| {
            if key == TOKEN_QUERY_PARAM {
                if token.is_none() {
                    token = Some(value.into_owned());
                }
                None
            } else {
                Some((key.into_owned(), value.into_owned()))
            }
        })
        .collect();

    let mut cleaned = url.clone();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    (token, cleaned)
}
