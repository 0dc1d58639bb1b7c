use chrono::Duration;
use futures::future::join_all;

use catalog_identity::config::AuthPolicy;
use catalog_identity::modules::auth::interface::{AuthError, SessionRepository};
use catalog_identity::modules::auth::model::UserId;
use catalog_identity::services::hashing::hash_refresh_token;

use crate::common::TestContext;

#[tokio::test]
async fn issued_access_token_validates_to_its_user() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();

    let pair = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();

    assert_eq!(ctx.state.jwt.validate(&pair.access_token).unwrap(), user_id);
    assert_eq!(pair.expires_in, 15 * 60);
}

#[tokio::test]
async fn expired_access_token_fails_with_expired_token() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();

    let token = ctx.state.jwt.mint_access(&user_id, Duration::seconds(-120)).unwrap();

    assert!(matches!(ctx.state.jwt.validate(&token), Err(AuthError::ExpiredToken)));
}

#[tokio::test]
async fn only_the_refresh_token_hash_is_stored() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();

    let (refresh_token, session) = ctx.state.sessions.issue(&user_id, Some("phone".to_string())).await.unwrap();

    assert_eq!(session.token_hash, hash_refresh_token(&refresh_token));
    assert_ne!(session.token_hash, refresh_token);
    assert!(ctx.store.find_by_token_hash(&refresh_token).await.unwrap().is_none());
    assert_eq!(session.expires_at, session.created_at + Duration::days(60));
}

#[tokio::test]
async fn second_rotation_of_the_same_token_fails_with_session_revoked() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();
    let pair = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();

    let rotated = ctx.state.sessions.rotate(&pair.refresh_token).await.unwrap();
    assert_ne!(rotated.refresh_token, pair.refresh_token);
    assert_ne!(rotated.session_id, pair.session_id);
    assert_eq!(ctx.state.jwt.validate(&rotated.access_token).unwrap(), user_id);

    let again = ctx.state.sessions.rotate(&pair.refresh_token).await;
    assert!(matches!(again, Err(AuthError::SessionRevoked)));

    // The successor is unaffected by the rejected reuse.
    assert!(ctx.state.sessions.rotate(&rotated.refresh_token).await.is_ok());
}

#[tokio::test]
async fn unknown_refresh_token_fails_with_session_not_found() {
    let ctx = TestContext::new();

    let result = ctx.state.sessions.rotate("not-a-real-token").await;

    assert!(matches!(result, Err(AuthError::SessionNotFound)));
}

#[tokio::test]
async fn rotation_after_expiry_fails_with_session_expired() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();
    let pair = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();

    ctx.clock.advance(Duration::days(60));

    let result = ctx.state.sessions.rotate(&pair.refresh_token).await;
    assert!(matches!(result, Err(AuthError::SessionExpired)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotations_of_one_token_succeed_exactly_once() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();
    let pair = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();

    let results = join_all((0..8).map(|_| ctx.state.sessions.rotate(&pair.refresh_token))).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let revoked = results
        .iter()
        .filter(|r| matches!(r, Err(AuthError::SessionRevoked)))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(revoked, 7);
    assert_eq!(ctx.store.session_count().await, 2);
}

#[tokio::test]
async fn reuse_leaves_the_family_alone_by_default() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();
    let pair = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();
    let rotated = ctx.state.sessions.rotate(&pair.refresh_token).await.unwrap();

    assert!(ctx.state.sessions.rotate(&pair.refresh_token).await.is_err());

    assert!(ctx.state.sessions.rotate(&rotated.refresh_token).await.is_ok());
}

#[tokio::test]
async fn reuse_revokes_the_family_when_enabled() {
    let ctx = TestContext::with_policy(AuthPolicy {
        reuse_revokes_family: true,
        ..AuthPolicy::default()
    });
    let user_id = UserId::generate();
    let pair = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();
    let other_login = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();
    let rotated = ctx.state.sessions.rotate(&pair.refresh_token).await.unwrap();

    let reuse = ctx.state.sessions.rotate(&pair.refresh_token).await;
    assert!(matches!(reuse, Err(AuthError::SessionRevoked)));

    let successor = ctx.state.sessions.rotate(&rotated.refresh_token).await;
    assert!(matches!(successor, Err(AuthError::SessionRevoked)));

    // A separate login is a separate family.
    assert!(ctx.state.sessions.rotate(&other_login.refresh_token).await.is_ok());
}

#[tokio::test]
async fn revoke_all_ends_every_session_of_the_user() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();
    let other_user = UserId::generate();
    let mut pairs = Vec::new();
    for _ in 0..3 {
        pairs.push(ctx.state.sessions.start(&user_id, None, "email").await.unwrap());
    }
    let unrelated = ctx.state.sessions.start(&other_user, None, "email").await.unwrap();

    assert_eq!(ctx.state.sessions.revoke_all(&user_id).await.unwrap(), 3);

    for pair in &pairs {
        let result = ctx.state.sessions.rotate(&pair.refresh_token).await;
        assert!(matches!(result, Err(AuthError::SessionRevoked)));
    }
    assert!(ctx.state.sessions.rotate(&unrelated.refresh_token).await.is_ok());
    assert!(ctx.state.sessions.list_active(&user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn revoking_someone_elses_session_is_reported_as_missing() {
    let ctx = TestContext::new();
    let owner = UserId::generate();
    let intruder = UserId::generate();
    let pair = ctx.state.sessions.start(&owner, None, "email").await.unwrap();

    let result = ctx.state.sessions.revoke_owned(&intruder, &pair.session_id).await;
    assert!(matches!(result, Err(AuthError::SessionNotFound)));

    ctx.state.sessions.revoke_owned(&owner, &pair.session_id).await.unwrap();
    let rotate = ctx.state.sessions.rotate(&pair.refresh_token).await;
    assert!(matches!(rotate, Err(AuthError::SessionRevoked)));
}

#[tokio::test]
async fn list_active_shows_only_live_sessions_newest_first() {
    let ctx = TestContext::new();
    let user_id = UserId::generate();
    let first = ctx.state.sessions.start(&user_id, Some("laptop".to_string()), "email").await.unwrap();
    ctx.clock.advance(Duration::seconds(5));
    let second = ctx.state.sessions.start(&user_id, Some("phone".to_string()), "email").await.unwrap();
    ctx.clock.advance(Duration::seconds(5));
    let third = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();
    ctx.state.sessions.revoke(&third.session_id).await.unwrap();

    let active = ctx.state.sessions.list_active(&user_id).await.unwrap();

    let ids: Vec<_> = active.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids, vec![second.session_id, first.session_id]);
    assert_eq!(active[0].device_info.as_deref(), Some("phone"));
}
