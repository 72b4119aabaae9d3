//! In-process mock of the catalog API for client tests.
//!
//! Bound to `127.0.0.1:0` on the test's own runtime. Access tokens are
//! accepted only while they match `valid_access`; each successful refresh
//! issues `a{n+1}` where `n` is the number of refresh calls so far.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

use crate::config::ClientConfig;
use crate::net::http::ApiClient;
use crate::net::token_store::{MemoryTokenStore, TokenStore};
use crate::net::types::TokenPair;

pub(crate) struct MockState {
    pub valid_access: Mutex<String>,
    pub valid_refresh: Mutex<String>,
    pub role: Mutex<String>,
    pub refresh_delay: Mutex<Duration>,
    /// Delay applied to `/auth/me/` after the token check passed.
    pub me_delay: Mutex<Duration>,
    pub reject_all_access: AtomicBool,
    pub logout_fails: AtomicBool,
    pub refresh_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub protected_calls: AtomicUsize,
    /// `Authorization` headers seen on protected catalog routes, in order.
    pub seen_auth: Mutex<Vec<Option<String>>>,
    pub last_body: Mutex<Option<Value>>,
    pub last_query: Mutex<Option<String>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            valid_access: Mutex::new("a1".into()),
            valid_refresh: Mutex::new("r1".into()),
            role: Mutex::new("buyer".into()),
            refresh_delay: Mutex::new(Duration::ZERO),
            me_delay: Mutex::new(Duration::ZERO),
            reject_all_access: AtomicBool::new(false),
            logout_fails: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            protected_calls: AtomicUsize::new(0),
            seen_auth: Mutex::new(Vec::new()),
            last_body: Mutex::new(None),
            last_query: Mutex::new(None),
        }
    }
}

impl MockState {
    pub fn expire_access(&self) {
        *self.valid_access.lock().unwrap() = "server-side-only".into();
    }

    pub fn set_role(&self, role: &str) {
        *self.role.lock().unwrap() = role.into();
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn set_me_delay(&self, delay: Duration) {
        *self.me_delay.lock().unwrap() = delay;
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn me_count(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all_access.load(Ordering::SeqCst) {
            return false;
        }
        let expected = format!("Bearer {}", self.valid_access.lock().unwrap());
        bearer(headers).as_deref() == Some(expected.as_str())
    }
}

pub(crate) struct MockApi {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockApi {
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState::default());
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { base_url: format!("http://{addr}/api"), state }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::with_base(&self.base_url, std::env::temp_dir()).unwrap()
    }

    /// Client over an in-memory store seeded with `pair`.
    pub fn client(&self, pair: Option<TokenPair>) -> (Arc<ApiClient>, Arc<dyn TokenStore>) {
        let store: Arc<dyn TokenStore> = Arc::new(match pair {
            Some(p) => MemoryTokenStore::with_pair(p),
            None => MemoryTokenStore::new(),
        });
        let client = ApiClient::new(&self.config(), store.clone()).unwrap();
        (Arc::new(client), store)
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Given token not valid for any token type" }))).into_response()
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/auth/login/", post(login))
        .route("/api/auth/register/", post(register))
        .route("/api/auth/logout/", post(logout))
        .route("/api/auth/token/refresh/", post(refresh))
        .route("/api/auth/me/", get(me))
        .route("/api/auth/verify-email/{uid}/{token}/", get(verify_email))
        .route("/api/auth/resend-verification/", post(resend_verification))
        .route("/api/products/", get(protected).post(protected))
        .route("/api/products/mine/", get(protected))
        .route("/api/products/{id}/", get(protected).patch(protected).delete(protected_empty))
        .route("/api/products/{id}/price-history/", get(protected_list))
        .route("/api/forecast/", get(protected))
        .route("/api/forecast/overview/", get(protected))
        .route("/api/forecast/chart-data/", get(protected))
        .route("/api/forecast/generate/", post(protected))
        .route("/api/forecast/{id}/", get(protected).delete(protected_empty))
        .route("/api/pricing/optimize_all/", get(protected))
        .route("/api/pricing/market_analysis/", get(protected))
        .route("/api/pricing/apply_optimization/", post(protected))
        .route("/api/auth/supplier-request/", get(supplier_lookup).post(protected))
        .route("/api/auth/admin/supplier-requests/", get(protected))
        .route("/api/auth/admin/supplier-requests/{id}/", axum::routing::patch(protected))
        .with_state(state)
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if body["password"] != "pw" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "No active account found with the given credentials" })),
        )
            .into_response();
    }
    *state.valid_access.lock().unwrap() = "a1".into();
    *state.valid_refresh.lock().unwrap() = "r1".into();
    Json(json!({ "access": "a1", "refresh": "r1" })).into_response()
}

async fn register(Json(body): Json<Value>) -> Response {
    if body["username"] == "taken" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "username": ["Username already taken."] }))).into_response();
    }
    (StatusCode::CREATED, Json(json!({ "detail": "Check your email to verify." }))).into_response()
}

async fn logout(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock().unwrap() = Some(body);
    if state.logout_fails.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    StatusCode::OK.into_response()
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let valid = state.valid_refresh.lock().unwrap().clone();
    if body["refresh"] != valid.as_str() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Token is invalid or expired", "code": "token_not_valid" })),
        )
            .into_response();
    }
    let access = format!("a{}", n + 1);
    *state.valid_access.lock().unwrap() = access.clone();
    Json(json!({ "access": access })).into_response()
}

async fn me(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.me_calls.fetch_add(1, Ordering::SeqCst);
    if !state.authorized(&headers) {
        return unauthorized();
    }
    let delay = *state.me_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let role = state.role.lock().unwrap().clone();
    Json(json!({ "id": 1, "username": "alice", "email": "alice@example.test", "role": role })).into_response()
}

async fn verify_email(Path((_uid, token)): Path<(String, String)>) -> Response {
    match token.as_str() {
        "good" => Json(json!({ "detail": "Email verified." })).into_response(),
        "expired" => (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Link expired." }))).into_response(),
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "detail": "Invalid link." }))).into_response(),
    }
}

async fn resend_verification(Json(body): Json<Value>) -> Response {
    if body["email"] == "locked@example.test" {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Account locked." }))).into_response();
    }
    Json(json!({ "detail": "Verification email sent." })).into_response()
}

async fn supplier_lookup(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "exists": true,
        "request": { "id": 9, "username": "alice", "company": "Acme", "reason": "wholesale", "status": "pending" }
    }))
    .into_response()
}

fn record(state: &MockState, headers: &HeaderMap, uri: &axum::http::Uri, body: Option<Value>) -> bool {
    state.protected_calls.fetch_add(1, Ordering::SeqCst);
    state.seen_auth.lock().unwrap().push(bearer(headers));
    *state.last_query.lock().unwrap() = uri.query().map(str::to_owned);
    if body.is_some() {
        *state.last_body.lock().unwrap() = body;
    }
    state.authorized(headers)
}

async fn protected(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    body: axum::body::Bytes,
) -> Response {
    if !record(&state, &headers, &uri, serde_json::from_slice(&body).ok()) {
        return unauthorized();
    }
    Json(json!({ "count": 1, "results": [{ "id": 1, "name": "Pen", "category": "stationery", "current_price": "2.50" }] }))
        .into_response()
}

async fn protected_list(State(state): State<Arc<MockState>>, headers: HeaderMap, uri: axum::http::Uri) -> Response {
    if !record(&state, &headers, &uri, None) {
        return unauthorized();
    }
    Json(json!([{ "id": 3, "product": 1, "old_price": "2.00", "new_price": "2.50", "reason": "promo" }])).into_response()
}

async fn protected_empty(State(state): State<Arc<MockState>>, headers: HeaderMap, uri: axum::http::Uri) -> Response {
    if !record(&state, &headers, &uri, None) {
        return unauthorized();
    }
    StatusCode::NO_CONTENT.into_response()
}
