//! Session state and the manager that owns it.
//!
//! SYSTEM CONTEXT
//! ==============
//! One `SessionManager` per process, shared by `Arc`. Route gates read its
//! snapshot; the shell clears identity on session loss; login, logout and
//! the startup bootstrap are the only other writers.
//!
//! DESIGN
//! ======
//! State is published through a `watch` channel. `ready` is a one-way latch:
//! the bootstrap sets it in the same write that publishes its outcome, so no
//! observer ever sees `ready == true` with a half-resolved identity. Writes
//! use `send_modify`, which succeeds with zero receivers, so a torn-down
//! observer turns the final write into a no-op instead of an error.
//!
//! Every identity write that follows a network round trip (bootstrap, login)
//! carries the generation it started under and is dropped if logout or
//! invalidation moved the generation on meanwhile. Logout and invalidation
//! bump it inside the same `send_modify` that clears identity, and writers
//! check it inside theirs, so a check and its publish cannot straddle a
//! logout.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;

use crate::error::{ApiError, detail_message};
use crate::net::http::{
    ApiClient, LOGIN_PATH, LOGOUT_PATH, ME_PATH, PendingRequest, REGISTER_PATH, RESEND_VERIFICATION_PATH,
    VERIFY_EMAIL_PREFIX,
};
use crate::net::types::{EmailRequest, LoginRequest, RefreshRequest, RegisterRequest, TokenPair, User};

/// Current identity and bootstrap readiness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<User>,
    pub ready: bool,
}

impl SessionState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

pub struct SessionManager {
    client: Arc<ApiClient>,
    state: watch::Sender<SessionState>,
    boot: OnceCell<()>,
    generation: AtomicU64,
}

impl SessionManager {
    #[must_use]
    pub fn new(client: Arc<ApiClient>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self { client, state, boot: OnceCell::new(), generation: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Resolve identity from the stored access token, once per process.
    ///
    /// Later calls (including concurrent ones) wait for the first run and
    /// return without touching the network.
    pub async fn bootstrap(&self) {
        self.boot.get_or_init(|| self.run_bootstrap()).await;
    }

    /// Run [`SessionManager::bootstrap`] in the background.
    ///
    /// The task holds only a weak reference until it starts; if the manager
    /// is gone by then, the task completes without doing anything.
    pub fn spawn_bootstrap(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(manager) = weak.upgrade() else {
                tracing::debug!("session manager dropped before bootstrap; skipping");
                return;
            };
            manager.bootstrap().await;
        })
    }

    /// Wait until the bootstrap latch is set and return the settled state.
    pub async fn wait_ready(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| s.ready).await {
            Ok(state) => state.clone(),
            // The sender lives in `self`, so this only happens during teardown.
            Err(_) => self.snapshot(),
        }
    }

    async fn run_bootstrap(&self) {
        let started = self.generation.load(Ordering::Acquire);
        let identity = if self.client.tokens().access_token().is_none() {
            tracing::debug!("no stored access token; starting anonymous");
            None
        } else {
            match self.fetch_identity().await {
                Ok(user) => {
                    tracing::info!(username = %user.username, role = %user.role, "session restored");
                    Some(user)
                }
                Err(e) if self.is_current(started) => {
                    tracing::warn!(error = %e, "identity lookup failed; clearing stored tokens");
                    if let Err(e) = self.client.discard_tokens().await {
                        tracing::error!(error = %e, "failed to clear tokens after bootstrap failure");
                    }
                    None
                }
                Err(e) => {
                    tracing::debug!(error = %e, "identity lookup failed after the session changed; leaving tokens");
                    None
                }
            }
        };

        self.state.send_modify(|s| {
            if self.is_current(started) {
                s.identity = identity;
            } else {
                tracing::info!("session changed during bootstrap; discarding restored identity");
            }
            s.ready = true;
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Clear identity and move the generation on in one write.
    fn clear_identity(&self) {
        self.state.send_modify(|s| {
            self.generation.fetch_add(1, Ordering::AcqRel);
            s.identity = None;
        });
    }

    async fn fetch_identity(&self) -> Result<User, ApiError> {
        self.client.send_json(PendingRequest::get(ME_PATH)).await
    }

    /// Exchange credentials for tokens, persist them, and resolve identity.
    ///
    /// # Errors
    ///
    /// Bad credentials or an unverified account surface as
    /// [`ApiError::Validation`] with the server's message. If the identity
    /// lookup fails after a successful login, the new tokens are discarded.
    /// A logout that lands while the login is in flight wins: the login's
    /// tokens are dropped and [`ApiError::SessionInvalid`] is returned.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let started = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let req = PendingRequest::post(LOGIN_PATH).json(&LoginRequest { username, password });
        let pair: TokenPair = self.client.send_json(req).await?;
        let refresh = pair.refresh.clone();
        self.client.install_tokens(pair).await?;

        let result = self.fetch_identity().await;
        let published = match &result {
            Ok(user) => self.state.send_if_modified(|s| {
                if !self.is_current(started) {
                    return false;
                }
                s.identity = Some(user.clone());
                true
            }),
            Err(_) => false,
        };

        match result {
            Ok(user) if published => {
                tracing::info!(username = %user.username, role = %user.role, "logged in");
                Ok(user)
            }
            Ok(_) => {
                tracing::info!("logged out while login was in flight; dropping its tokens");
                self.client.discard_tokens_if_refresh(&refresh).await?;
                Err(ApiError::SessionInvalid)
            }
            Err(e) => {
                tracing::warn!(error = %e, "identity lookup after login failed");
                if self.is_current(started) {
                    self.client.discard_tokens().await?;
                } else {
                    self.client.discard_tokens_if_refresh(&refresh).await?;
                }
                Err(e)
            }
        }
    }

    /// Best-effort server logout, then unconditional local cleanup.
    pub async fn logout(&self) {
        if let Some(refresh) = self.client.tokens().refresh_token() {
            let req = PendingRequest::post(LOGOUT_PATH).json(&RefreshRequest { refresh: &refresh });
            if let Err(e) = self.client.send(req).await {
                tracing::debug!(error = %e, "server logout failed; clearing locally anyway");
            }
        }
        if let Err(e) = self.client.discard_tokens().await {
            tracing::error!(error = %e, "failed to clear stored tokens on logout");
        }
        self.clear_identity();
        tracing::info!("logged out");
    }

    /// Drop the identity after the client reported the session unrecoverable.
    /// Tokens are already gone by then.
    pub fn invalidate(&self) {
        self.clear_identity();
    }

    /// Create an inactive account; the server emails a verification link.
    ///
    /// # Errors
    ///
    /// Field-level problems (taken username, short password) come back as
    /// [`ApiError::Validation`].
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<String, ApiError> {
        let req = PendingRequest::post(REGISTER_PATH).json(&RegisterRequest { username, email, password });
        self.client.send(req).await.map(|v| detail_message(&v))
    }

    /// Follow an email verification link.
    ///
    /// # Errors
    ///
    /// An invalid or expired link surfaces as [`ApiError::Validation`].
    pub async fn verify_email(&self, uid: &str, token: &str) -> Result<String, ApiError> {
        let req = PendingRequest::get(format!("{VERIFY_EMAIL_PREFIX}{uid}/{token}/"));
        self.client.send(req).await.map(|v| detail_message(&v))
    }

    /// # Errors
    ///
    /// Propagates [`ApiError`] from the client.
    pub async fn resend_verification(&self, email: &str) -> Result<String, ApiError> {
        let req = PendingRequest::post(RESEND_VERIFICATION_PATH).json(&EmailRequest { email });
        self.client.send(req).await.map(|v| detail_message(&v))
    }
}
