use axum::http::StatusCode;
use serde_json::json;

use catalog_identity::config::{AuthPolicy, HttpSettings};

use crate::common::{test_email, TestContext};

#[tokio::test]
async fn email_sign_in_returns_a_token_pair() {
    let ctx = TestContext::new();
    let email = test_email();

    let response = ctx
        .server
        .post("/auth/email/request")
        .json(&json!({ "email": &email }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["expires_at"].is_string());
    assert!(body["resend_available_at"].is_string());

    let code = ctx.mailer.last_code_for(&email).unwrap();
    let response = ctx
        .server
        .post("/auth/email/verify")
        .json(&json!({ "email": &email, "code": code }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["created"], true);
    assert_eq!(body["expires_in"], 900);
    assert!(body["access_token"].as_str().unwrap().split('.').count() == 3);
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_email_is_a_bad_request() {
    let ctx = TestContext::new();

    let response = ctx
        .server
        .post("/auth/email/request")
        .json(&json!({ "email": "nope" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_email");
}

#[tokio::test]
async fn wrong_code_is_a_bad_request() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.server
        .post("/auth/email/request")
        .json(&json!({ "email": &email }))
        .await
        .assert_status_ok();
    let code = ctx.mailer.last_code_for(&email).unwrap();
    let wrong = if code == "999999" { "000000" } else { "999999" };

    let response = ctx
        .server
        .post("/auth/email/verify")
        .json(&json!({ "email": &email, "code": wrong }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_code");
}

#[tokio::test]
async fn early_resend_reports_when_to_retry() {
    let ctx = TestContext::new();
    let email = test_email();
    ctx.server
        .post("/auth/email/request")
        .json(&json!({ "email": &email }))
        .await
        .assert_status_ok();

    let response = ctx
        .server
        .post("/auth/email/resend")
        .json(&json!({ "email": &email }))
        .await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "resend_too_soon");
    assert!(body["retry_at"].is_string());
}

#[tokio::test]
async fn code_endpoints_are_rate_limited_per_client() {
    let ctx = TestContext::build(
        AuthPolicy::default(),
        HttpSettings {
            email_route_burst: 2,
            ..HttpSettings::default()
        },
    );

    for _ in 0..2 {
        ctx.server
            .post("/auth/email/request")
            .json(&json!({ "email": test_email() }))
            .await
            .assert_status_ok();
    }

    let response = ctx
        .server
        .post("/auth/email/request")
        .json(&json!({ "email": test_email() }))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "rate_limited");

    // Other routes are not limited.
    ctx.server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_the_limit() {
    let ctx = TestContext::build(
        AuthPolicy::default(),
        HttpSettings {
            email_route_burst: 2,
            ..HttpSettings::default()
        },
    );

    let mut statuses = Vec::new();
    for n in 0..3 {
        let response = ctx
            .server
            .post("/auth/email/request")
            .add_header("x-forwarded-for", format!("198.51.100.{n}"))
            .json(&json!({ "email": test_email() }))
            .await;
        statuses.push(response.status_code());
    }

    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
}

#[tokio::test]
async fn forwarded_for_keys_the_limit_behind_a_trusted_proxy() {
    let ctx = TestContext::build(
        AuthPolicy::default(),
        HttpSettings {
            email_route_burst: 1,
            trust_forwarded_headers: true,
            ..HttpSettings::default()
        },
    );

    for client in ["198.51.100.1", "198.51.100.2"] {
        ctx.server
            .post("/auth/email/request")
            .add_header("x-forwarded-for", client)
            .json(&json!({ "email": test_email() }))
            .await
            .assert_status_ok();
    }

    ctx.server
        .post("/auth/email/request")
        .add_header("x-forwarded-for", "198.51.100.1")
        .json(&json!({ "email": test_email() }))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn me_requires_a_valid_bearer_token() {
    let ctx = TestContext::new();

    let response = ctx.server.get("/auth/me").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_token");

    ctx.server
        .get("/auth/me")
        .authorization_bearer("not.a.token")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_returns_and_updates_the_profile() {
    let ctx = TestContext::new();
    let email = test_email();
    let (access_token, _, user_id) = ctx.sign_in_with_email(&email).await;

    let response = ctx.server.get("/auth/me").authorization_bearer(&access_token).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], user_id.as_str());
    assert_eq!(body["email"], email.as_str());
    assert_eq!(body["email_verified"], true);
    assert_eq!(body["policy_tier"], "basic");

    let response = ctx
        .server
        .patch("/auth/me")
        .authorization_bearer(&access_token)
        .json(&json!({ "display_name": "  Ann  " }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["display_name"], "Ann");
}

#[tokio::test]
async fn refresh_rotates_and_rejects_the_old_token() {
    let ctx = TestContext::new();
    let (_, refresh_token, _) = ctx.sign_in_with_email(&test_email()).await;

    let response = ctx
        .server
        .post("/auth/refresh")
        .json(&json!({ "refresh_token": &refresh_token }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let new_refresh = body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(new_refresh, refresh_token);

    let response = ctx
        .server
        .post("/auth/refresh")
        .json(&json!({ "refresh_token": &refresh_token }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "session_revoked");
}

#[tokio::test]
async fn logout_invalidates_the_refresh_token() {
    let ctx = TestContext::new();
    let (_, refresh_token, _) = ctx.sign_in_with_email(&test_email()).await;

    ctx.server
        .post("/auth/logout")
        .json(&json!({ "refresh_token": &refresh_token }))
        .await
        .assert_status_ok();

    ctx.server
        .post("/auth/refresh")
        .json(&json!({ "refresh_token": &refresh_token }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_all_revokes_every_device() {
    let ctx = TestContext::new();
    let email = test_email();
    let (access_token, first_refresh, _) = ctx.sign_in_with_email(&email).await;
    let (_, second_refresh, _) = ctx.sign_in_with_email(&email).await;

    let response = ctx
        .server
        .post("/auth/logout-all")
        .authorization_bearer(&access_token)
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["revoked"], 2);

    for token in [first_refresh, second_refresh] {
        ctx.server
            .post("/auth/refresh")
            .json(&json!({ "refresh_token": token }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn sessions_can_be_listed_and_revoked_individually() {
    let ctx = TestContext::new();
    let email = test_email();
    let (access_token, _, _) = ctx.sign_in_with_email(&email).await;
    let (_, other_refresh, _) = ctx.sign_in_with_email(&email).await;

    let response = ctx.server.get("/auth/sessions").authorization_bearer(&access_token).await;
    response.assert_status_ok();
    let sessions: Vec<serde_json::Value> = response.json();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["device_info"], "test-device");

    for session in &sessions {
        let id = session["id"].as_str().unwrap();
        ctx.server
            .delete(&format!("/auth/sessions/{id}"))
            .authorization_bearer(&access_token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    ctx.server
        .post("/auth/refresh")
        .json(&json!({ "refresh_token": other_refresh }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deleting_the_account_ends_access() {
    let ctx = TestContext::new();
    let (access_token, refresh_token, _) = ctx.sign_in_with_email(&test_email()).await;

    ctx.server
        .delete("/auth/me")
        .authorization_bearer(&access_token)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let response = ctx.server.get("/auth/me").authorization_bearer(&access_token).await;
    response.assert_status(StatusCode::NOT_FOUND);

    ctx.server
        .post("/auth/refresh")
        .json(&json!({ "refresh_token": refresh_token }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn federated_sign_in_creates_then_reuses_the_user() {
    let ctx = TestContext::new();

    let response = ctx
        .server
        .post("/auth/federated/google")
        .json(&json!({ "id_token": "google-sub-1", "device_info": "pixel" }))
        .await;
    response.assert_status_ok();
    let first: serde_json::Value = response.json();
    assert_eq!(first["created"], true);

    let response = ctx
        .server
        .post("/auth/federated/GOOGLE")
        .json(&json!({ "id_token": "google-sub-1" }))
        .await;
    response.assert_status_ok();
    let second: serde_json::Value = response.json();
    assert_eq!(second["created"], false);
    assert_eq!(second["user_id"], first["user_id"]);
}

#[tokio::test]
async fn federated_sign_in_rejects_bad_input() {
    let ctx = TestContext::new();

    ctx.server
        .post("/auth/federated/facebook")
        .json(&json!({ "id_token": "whatever" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = ctx
        .server
        .post("/auth/federated/apple")
        .json(&json!({ "id_token": "invalid" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_assertion");
}

#[tokio::test]
async fn identities_can_be_linked_and_listed() {
    let ctx = TestContext::new();
    let (access_token, _, _) = ctx.sign_in_with_email(&test_email()).await;

    let response = ctx
        .server
        .post("/auth/identities/apple")
        .authorization_bearer(&access_token)
        .json(&json!({ "id_token": "apple-sub|relay@privaterelay.appleid.com" }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let response = ctx
        .server
        .get("/auth/identities")
        .authorization_bearer(&access_token)
        .await;
    response.assert_status_ok();
    let identities: Vec<serde_json::Value> = response.json();
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0]["provider"], "apple");

    // A second account cannot claim the same identity.
    let (other_token, _, _) = ctx.sign_in_with_email(&test_email()).await;
    let response = ctx
        .server
        .post("/auth/identities/apple")
        .authorization_bearer(&other_token)
        .json(&json!({ "id_token": "apple-sub" }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let ctx = TestContext::new();

    let response = ctx.server.get("/health").await;

    response.assert_status_ok();
    assert_eq!(response.header("cache-control"), "no-store");
    assert_eq!(response.header("x-content-type-options"), "nosniff");
}

#[tokio::test]
async fn metrics_are_exported() {
    let ctx = TestContext::new();
    ctx.sign_in_with_email(&test_email()).await;

    let response = ctx.server.get("/metrics").await;

    response.assert_status_ok();
    let text = response.text();
    assert!(text.contains("identity_logins_total"));
    assert!(text.contains("identity_http_requests_total"));
    assert!(text.contains("/auth/email/verify"));
}
