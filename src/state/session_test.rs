use super::*;
use crate::net::test_server::MockApi;
use crate::net::types::Role;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn manager(api: &MockApi, pair: Option<TokenPair>) -> (Arc<SessionManager>, Arc<dyn crate::net::token_store::TokenStore>) {
    let (client, store) = api.client(pair);
    (Arc::new(SessionManager::new(client)), store)
}

// =============================================================================
// BOOTSTRAP
// =============================================================================

#[tokio::test]
async fn bootstrap_without_token_is_ready_and_anonymous_without_network() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, None);

    session.bootstrap().await;

    assert_eq!(session.snapshot(), SessionState { identity: None, ready: true });
    assert_eq!(api.state.me_count(), 0);
}

#[tokio::test]
async fn bootstrap_with_valid_token_restores_identity() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, Some(TokenPair::new("a1", "r1")));

    session.bootstrap().await;

    let state = session.snapshot();
    assert!(state.ready);
    let user = state.identity.unwrap();
    assert_eq!(user.username, "alice");
    assert_eq!(user.role, Role::Buyer);
}

#[tokio::test]
async fn bootstrap_failure_clears_tokens_and_still_sets_ready() {
    let api = MockApi::spawn().await;
    api.state.expire_access();
    let (session, store) = manager(&api, Some(TokenPair::new("a1", "revoked")));

    session.bootstrap().await;

    assert_eq!(session.snapshot(), SessionState { identity: None, ready: true });
    assert!(store.get().is_none());
}

#[tokio::test]
async fn repeated_bootstrap_resolves_identity_once() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, Some(TokenPair::new("a1", "r1")));

    let first = session.spawn_bootstrap();
    let second = session.spawn_bootstrap();
    session.bootstrap().await;
    first.await.unwrap();
    second.await.unwrap();
    session.bootstrap().await;

    assert_eq!(api.state.me_count(), 1);
    assert!(session.snapshot().is_authenticated());
}

#[tokio::test]
async fn ready_stays_false_while_identity_lookup_is_pending() {
    let api = MockApi::spawn().await;
    api.state.expire_access();
    api.state.set_refresh_delay(Duration::from_millis(150));
    let (session, _) = manager(&api, Some(TokenPair::new("a1", "r1")));
    let mut rx = session.subscribe();

    let handle = session.spawn_bootstrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!session.snapshot().ready);

    let settled = session.wait_ready().await;
    handle.await.unwrap();

    assert!(settled.ready);
    assert_eq!(settled.identity.unwrap().username, "alice");
    // The latch and the identity arrive in the same publication.
    let seen = rx.borrow_and_update().clone();
    assert!(seen.ready && seen.identity.is_some());
}

#[tokio::test]
async fn spawned_bootstrap_is_a_no_op_after_manager_dropped() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, Some(TokenPair::new("a1", "r1")));

    let handle = session.spawn_bootstrap();
    drop(session);
    handle.await.unwrap();

    assert_eq!(api.state.me_count(), 0);
}

// =============================================================================
// LOGIN / LOGOUT
// =============================================================================

#[tokio::test]
async fn login_persists_tokens_and_sets_identity() {
    let api = MockApi::spawn().await;
    let (session, store) = manager(&api, None);

    let user = session.login("alice", "pw").await.unwrap();

    assert_eq!(user.username, "alice");
    assert_eq!(store.get(), Some(TokenPair::new("a1", "r1")));
    assert_eq!(session.snapshot().identity, Some(user));
}

#[tokio::test]
async fn login_with_bad_password_surfaces_message_and_stores_nothing() {
    let api = MockApi::spawn().await;
    let (session, store) = manager(&api, None);

    let err = session.login("alice", "wrong").await.unwrap_err();

    assert!(matches!(err, ApiError::Validation { status: 401, .. }));
    assert_eq!(err.to_string(), "request rejected: status 401: No active account found with the given credentials");
    assert!(store.get().is_none());
    assert!(session.snapshot().identity.is_none());
    assert_eq!(api.state.refresh_count(), 0);
}

#[tokio::test]
async fn login_discards_tokens_when_identity_cannot_be_decoded() {
    let api = MockApi::spawn().await;
    api.state.set_role("superuser");
    let (session, store) = manager(&api, None);

    let err = session.login("alice", "pw").await.unwrap_err();

    assert!(matches!(err, ApiError::Decode(_)), "{err:?}");
    assert!(store.get().is_none());
    assert!(session.snapshot().identity.is_none());
}

#[tokio::test]
async fn logout_sends_refresh_token_and_clears_everything() {
    let api = MockApi::spawn().await;
    let (session, store) = manager(&api, Some(TokenPair::new("a1", "r1")));
    session.bootstrap().await;

    session.logout().await;

    assert_eq!(api.state.last_body.lock().unwrap().clone(), Some(serde_json::json!({ "refresh": "r1" })));
    assert!(store.get().is_none());
    assert_eq!(session.snapshot(), SessionState { identity: None, ready: true });
}

#[tokio::test]
async fn logout_clears_locally_when_server_call_fails() {
    let api = MockApi::spawn().await;
    api.state.logout_fails.store(true, Ordering::SeqCst);
    let (session, store) = manager(&api, Some(TokenPair::new("a1", "r1")));
    session.login("alice", "pw").await.unwrap();

    session.logout().await;

    assert_eq!(api.state.logout_calls.load(Ordering::SeqCst), 1);
    assert!(store.get().is_none());
    assert!(session.snapshot().identity.is_none());
}

#[tokio::test]
async fn logout_without_tokens_skips_server_call() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, None);

    session.logout().await;

    assert_eq!(api.state.logout_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// LOGOUT RACES
// =============================================================================

async fn wait_until(done: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn logout_during_bootstrap_is_not_undone_by_late_identity() {
    let api = MockApi::spawn().await;
    api.state.set_me_delay(Duration::from_millis(150));
    let (session, store) = manager(&api, Some(TokenPair::new("a1", "r1")));

    let handle = session.spawn_bootstrap();
    wait_until(|| api.state.me_count() == 1).await;
    session.logout().await;
    let settled = session.wait_ready().await;
    handle.await.unwrap();

    assert_eq!(settled, SessionState { identity: None, ready: true });
    assert_eq!(session.snapshot(), SessionState { identity: None, ready: true });
    assert!(store.get().is_none());
}

#[tokio::test]
async fn logout_during_login_wins() {
    let api = MockApi::spawn().await;
    api.state.set_me_delay(Duration::from_millis(150));
    let (session, store) = manager(&api, None);

    let login = {
        let session = session.clone();
        tokio::spawn(async move { session.login("alice", "pw").await })
    };
    wait_until(|| api.state.me_count() == 1).await;
    session.logout().await;
    let result = login.await.unwrap();

    assert!(matches!(result, Err(ApiError::SessionInvalid)), "{result:?}");
    assert!(session.snapshot().identity.is_none());
    assert!(store.get().is_none());
    assert_eq!(api.state.logout_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_during_refresh_leaves_store_empty() {
    let api = MockApi::spawn().await;
    api.state.expire_access();
    api.state.set_refresh_delay(Duration::from_millis(150));
    let (session, store) = manager(&api, Some(TokenPair::new("a1", "r1")));

    let call = {
        let client = session.client().clone();
        tokio::spawn(async move { client.send(PendingRequest::get("/products/")).await })
    };
    wait_until(|| api.state.refresh_count() == 1).await;
    session.logout().await;
    let _ = call.await.unwrap();

    assert!(store.get().is_none());
    assert!(session.snapshot().identity.is_none());
    assert_eq!(api.state.refresh_count(), 1);
}

#[tokio::test]
async fn login_after_logout_is_kept() {
    let api = MockApi::spawn().await;
    let (session, store) = manager(&api, Some(TokenPair::new("a1", "r1")));
    session.bootstrap().await;
    session.logout().await;

    let user = session.login("alice", "pw").await.unwrap();

    assert_eq!(session.snapshot().identity, Some(user));
    assert_eq!(store.get(), Some(TokenPair::new("a1", "r1")));
}

#[tokio::test]
async fn invalidate_clears_identity_but_keeps_ready() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, Some(TokenPair::new("a1", "r1")));
    session.bootstrap().await;

    session.invalidate();

    assert_eq!(session.snapshot(), SessionState { identity: None, ready: true });
}

// =============================================================================
// ACCOUNT LIFECYCLE
// =============================================================================

#[tokio::test]
async fn register_reports_field_errors() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, None);

    let ok = session.register("bob", "bob@example.test", "secret123").await.unwrap();
    let err = session.register("taken", "t@example.test", "secret123").await.unwrap_err();

    assert_eq!(ok, "Check your email to verify.");
    assert_eq!(err.to_string(), "request rejected: status 400: username: Username already taken.");
}

#[tokio::test]
async fn verify_email_distinguishes_good_and_bad_links() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, None);

    assert_eq!(session.verify_email("MQ", "good").await.unwrap(), "Email verified.");
    let err = session.verify_email("MQ", "nonsense").await.unwrap_err();
    assert!(matches!(err, ApiError::Validation { status: 400, .. }));
}

#[tokio::test]
async fn resend_verification_returns_server_message() {
    let api = MockApi::spawn().await;
    let (session, _) = manager(&api, None);

    let msg = session.resend_verification("alice@example.test").await.unwrap();
    assert_eq!(msg, "Verification email sent.");
}
