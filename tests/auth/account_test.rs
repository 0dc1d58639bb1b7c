use chrono::Duration;

use catalog_identity::modules::auth::interface::{AuthError, IdentityRepository, UserRepository};
use catalog_identity::modules::auth::model::{PolicyTier, ProfileHints, Provider};
use catalog_identity::modules::quota::interface::UsageRepository;
use catalog_identity::services::maintenance::MaintenanceService;

use std::sync::Arc;

use crate::common::{test_email, TestContext};

#[tokio::test]
async fn deleting_an_account_revokes_and_unlinks_everything() {
    let ctx = TestContext::new();
    let email = test_email();
    let user_id = ctx.create_user(&email).await;
    let pair = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();
    ctx.state
        .identities
        .link(&user_id, Provider::Google, "g-del", ProfileHints::default())
        .await
        .unwrap();
    ctx.state.quota.consume(&user_id).await.unwrap();

    let now = ctx.clock_now();
    assert!(ctx.store.soft_delete(&user_id, now).await.unwrap());
    assert!(!ctx.store.soft_delete(&user_id, now).await.unwrap());

    assert!(ctx.store.find_by_id(&user_id).await.unwrap().is_none());
    assert!(ctx.store.find_by_email(&email).await.unwrap().is_none());
    assert!(ctx.store.find_owner(Provider::Google, "g-del").await.unwrap().is_none());
    assert!(ctx.store.current(&user_id).await.unwrap().is_none());

    let rotate = ctx.state.sessions.rotate(&pair.refresh_token).await;
    assert!(matches!(rotate, Err(AuthError::SessionRevoked)));

    let quota = ctx.state.quota.consume(&user_id).await;
    assert!(matches!(quota, Err(AuthError::UserNotFound)));
}

#[tokio::test]
async fn a_deleted_email_can_sign_up_again_as_a_new_user() {
    let ctx = TestContext::new();
    let email = test_email();
    let first = ctx.create_user(&email).await;
    ctx.store.soft_delete(&first, ctx.clock_now()).await.unwrap();

    ctx.clock.advance(Duration::minutes(1));
    let second = ctx.create_user(&email).await;

    assert_ne!(first, second);
    assert_eq!(ctx.store.user_count().await, 2);
}

#[tokio::test]
async fn profile_updates_touch_only_live_users() {
    let ctx = TestContext::new();
    let user_id = ctx.create_user(&test_email()).await;

    ctx.store
        .update_display_name(&user_id, Some("Ann"), ctx.clock_now())
        .await
        .unwrap();
    ctx.store
        .set_policy_tier(&user_id, PolicyTier::Pro, ctx.clock_now())
        .await
        .unwrap();

    let user = ctx.store.find_by_id(&user_id).await.unwrap().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Ann"));
    assert_eq!(user.policy_tier, PolicyTier::Pro);

    ctx.store.soft_delete(&user_id, ctx.clock_now()).await.unwrap();
    let result = ctx.store.update_display_name(&user_id, None, ctx.clock_now()).await;
    assert!(matches!(result, Err(AuthError::UserNotFound)));
}

#[tokio::test]
async fn purge_drops_only_rows_past_retention() {
    let ctx = TestContext::new();
    let user_id = ctx.create_user(&test_email()).await;
    let dead = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();
    ctx.state.sessions.revoke(&dead.session_id).await.unwrap();

    ctx.clock.advance(Duration::days(8));
    let live = ctx.state.sessions.start(&user_id, None, "email").await.unwrap();
    ctx.state.verification.request(&test_email()).await.unwrap();

    let maintenance = MaintenanceService::new(
        Arc::new(ctx.store.clone()),
        Arc::new(ctx.store.clone()),
        ctx.clock.clone(),
        Duration::days(7),
    );
    let report = maintenance.purge_stale().await.unwrap();

    // The revoked session and the consumed sign-up code are old enough.
    assert_eq!(report.sessions, 1);
    assert_eq!(report.codes, 1);
    // The sign-up session and the later one are both still live.
    assert_eq!(ctx.store.session_count().await, 2);
    assert!(ctx.state.sessions.rotate(&live.refresh_token).await.is_ok());
}
