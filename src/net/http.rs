//! The single network path: bearer attachment plus refresh-and-retry.
//!
//! ARCHITECTURE
//! ============
//! Every call is described by a [`PendingRequest`] so it can be rebuilt and
//! replayed after token renewal. A 401 on a protected path triggers at most
//! one renewal and one replay per call; the `retried` marker on the request
//! is what stops loops.
//!
//! CONCURRENCY
//! ===========
//! Token renewal runs under one async mutex. Each call records the token
//! epoch it started with; the first caller to take the lock with an
//! unchanged epoch performs the refresh (or invalidates the session), and
//! everyone queued behind it sees a newer epoch and reuses the outcome. So
//! N simultaneous 401s produce one refresh request and at most one
//! `SessionEvent::Invalidated`. Login and logout write tokens under the same
//! mutex, so a logout can never be overwritten by a refresh finishing late.

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::net::token_store::TokenStore;
use crate::net::types::{RefreshRequest, RefreshResponse, TokenPair};

pub const LOGIN_PATH: &str = "/auth/login/";
pub const REGISTER_PATH: &str = "/auth/register/";
pub const LOGOUT_PATH: &str = "/auth/logout/";
pub const REFRESH_PATH: &str = "/auth/token/refresh/";
pub const ME_PATH: &str = "/auth/me/";
pub const VERIFY_EMAIL_PREFIX: &str = "/auth/verify-email/";
pub const RESEND_VERIFICATION_PATH: &str = "/auth/resend-verification/";

/// Paths whose 401s belong to the caller (bad credentials, stale link) rather
/// than to an expired session.
pub const PUBLIC_AUTH_PATHS: [&str; 4] = [LOGIN_PATH, REGISTER_PATH, VERIFY_EMAIL_PREFIX, RESEND_VERIFICATION_PATH];

const EVENT_CHANNEL_CAPACITY: usize = 16;
const CLIENT_USER_AGENT: &str = concat!("catalog-client/", env!("CARGO_PKG_VERSION"));

/// Signals emitted by the client for the top-level shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Renewal failed or was impossible; tokens are already cleared.
    Invalidated,
}

#[must_use]
pub fn is_public_auth_path(path: &str) -> bool {
    PUBLIC_AUTH_PATHS.iter().any(|p| path.starts_with(p))
}

// =============================================================================
// PENDING REQUEST
// =============================================================================

/// An outgoing call, kept in rebuildable form for a single replay.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Set when the body failed to serialize; the request is refused at send.
    body_error: Option<String>,
    retried: bool,
}

impl PendingRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), method, path: path.into(), query: Vec::new(), body: None, body_error: None, retried: false }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body. A serialization failure is reported by
    /// [`ApiClient::send`] as [`ApiError::InvalidArgument`] before any I/O.
    #[must_use]
    pub fn json<T: serde::Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.body = Some(value);
                self.body_error = None;
            }
            Err(e) => {
                self.body = None;
                self.body_error = Some(e.to_string());
            }
        }
        self
    }

    /// Append a query parameter; empty values are skipped.
    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        if !value.is_empty() {
            self.query.push((key.to_owned(), value));
        }
        self
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        is_public_auth_path(&self.path)
    }

    #[must_use]
    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Mark the request as replayed. Returns `false` if it already was.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

struct RawResponse {
    status: u16,
    body: String,
}

/// Authenticated REST client shared by the session manager and the catalog API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    renewal: Mutex<()>,
    /// Bumped on every token write made through this client.
    epoch: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    /// Build a client for `config.api_base` backed by `tokens`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.request())
            .connect_timeout(config.timeouts.connect())
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            http,
            base_url: config.api_base.clone(),
            tokens,
            renewal: Mutex::new(()),
            epoch: AtomicU64::new(0),
            events,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Subscribe to session-loss signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send and decode the JSON response into `T`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; additionally [`ApiError::Decode`] on shape mismatch.
    pub async fn send_json<T: DeserializeOwned>(&self, req: PendingRequest) -> Result<T, ApiError> {
        let value = self.send(req).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Send a request, transparently renewing the access token once on 401.
    ///
    /// Returns the decoded JSON body, or `Value::Null` for an empty body.
    ///
    /// # Errors
    ///
    /// - [`ApiError::InvalidArgument`] if the body could not be serialized
    /// - [`ApiError::Validation`] for 4xx, including 401 from a public auth path
    /// - [`ApiError::SessionInvalid`] when renewal is impossible
    /// - [`ApiError::AuthExpired`] when the replayed call is still rejected
    /// - [`ApiError::Network`] / [`ApiError::Server`] otherwise
    pub async fn send(&self, mut req: PendingRequest) -> Result<Value, ApiError> {
        if let Some(e) = &req.body_error {
            tracing::warn!(request_id = %req.id, path = %req.path, error = %e, "request body failed to serialize");
            return Err(ApiError::InvalidArgument(format!("request body: {e}")));
        }
        // Epoch before token: a renewal landing in between then looks newer, never older.
        let mut epoch = self.epoch.load(Ordering::Acquire);
        let mut access = self.tokens.access_token();

        loop {
            let resp = self.dispatch(&req, access.as_deref()).await?;
            if resp.status != 401 {
                return into_result(resp);
            }
            if req.is_public() {
                return into_result(resp);
            }
            if !req.mark_retried() {
                tracing::warn!(request_id = %req.id, path = %req.path, "still unauthorized after renewal");
                return Err(ApiError::AuthExpired);
            }

            tracing::debug!(request_id = %req.id, path = %req.path, "access token rejected; renewing");
            access = Some(self.renew(epoch).await?);
            epoch = self.epoch.load(Ordering::Acquire);
        }
    }

    /// Persist a freshly issued pair (login).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Storage`] if the pair could not be written.
    pub async fn install_tokens(&self, pair: TokenPair) -> Result<(), ApiError> {
        let _guard = self.renewal.lock().await;
        self.tokens.set(pair)?;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop the stored pair without signalling (logout, failed bootstrap).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Storage`] if the pair could not be removed.
    pub async fn discard_tokens(&self) -> Result<(), ApiError> {
        let _guard = self.renewal.lock().await;
        self.tokens.clear()?;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop the stored pair only if it still carries `refresh`. Returns
    /// whether anything was removed; a pair installed or rotated since is
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Storage`] if the pair could not be removed.
    pub async fn discard_tokens_if_refresh(&self, refresh: &str) -> Result<bool, ApiError> {
        let _guard = self.renewal.lock().await;
        if self.tokens.refresh_token().as_deref() != Some(refresh) {
            return Ok(false);
        }
        self.tokens.clear()?;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    async fn renew(&self, seen_epoch: u64) -> Result<String, ApiError> {
        let _guard = self.renewal.lock().await;

        if self.epoch.load(Ordering::Acquire) != seen_epoch {
            // Someone else already refreshed or invalidated while we waited.
            return match self.tokens.access_token() {
                Some(access) => {
                    tracing::debug!("reusing access token renewed by a concurrent request");
                    Ok(access)
                }
                None => Err(ApiError::SessionInvalid),
            };
        }

        let Some(current) = self.tokens.get() else {
            tracing::info!("no refresh token stored; session invalid");
            self.invalidate_locked();
            return Err(ApiError::SessionInvalid);
        };

        match self.exchange_refresh(&current.refresh).await {
            Ok(renewed) => {
                let access = renewed.access;
                let refresh = renewed.refresh.unwrap_or(current.refresh);
                self.tokens.set(TokenPair { access: access.clone(), refresh })?;
                self.epoch.fetch_add(1, Ordering::AcqRel);
                tracing::info!("access token renewed");
                Ok(access)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed; session invalid");
                self.invalidate_locked();
                Err(ApiError::SessionInvalid)
            }
        }
    }

    /// Caller must hold `renewal`.
    fn invalidate_locked(&self) {
        if let Err(e) = self.tokens.clear() {
            tracing::error!(error = %e, "failed to clear tokens during invalidation");
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        // No subscribers is fine; nobody is around to navigate.
        let _ = self.events.send(SessionEvent::Invalidated);
    }

    async fn exchange_refresh(&self, refresh: &str) -> Result<RefreshResponse, ApiError> {
        let url = format!("{}{REFRESH_PATH}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .json(&RefreshRequest { refresh })
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        let value = into_result(RawResponse { status, body })?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn dispatch(&self, req: &PendingRequest, access: Option<&str>) -> Result<RawResponse, ApiError> {
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .header(USER_AGENT, CLIENT_USER_AGENT);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(token) = access {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            tracing::warn!(request_id = %req.id, method = %req.method, path = %req.path, error = %e, "request failed");
            ApiError::Network(e)
        })?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::debug!(
            request_id = %req.id,
            method = %req.method,
            path = %req.path,
            status,
            retried = req.retried,
            "api response"
        );
        Ok(RawResponse { status, body })
    }
}

fn into_result(resp: RawResponse) -> Result<Value, ApiError> {
    let RawResponse { status, body } = resp;
    match status {
        200..=299 => {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
        }
        400..=499 => {
            let detail = serde_json::from_str(&body).unwrap_or(Value::String(body));
            Err(ApiError::Validation { status, detail })
        }
        _ => Err(ApiError::Server { status, body }),
    }
}
