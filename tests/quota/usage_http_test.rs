use axum::http::StatusCode;

use crate::common::{test_email, TestContext};

#[tokio::test]
async fn usage_endpoints_report_and_enforce_the_quota() {
    let ctx = TestContext::new();
    let (access_token, _, _) = ctx.sign_in_with_email(&test_email()).await;

    let response = ctx.server.get("/usage").authorization_bearer(&access_token).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["tier"], "basic");
    assert_eq!(body["limit"], 5);
    assert_eq!(body["used"], 0);
    assert_eq!(body["remaining"], 5);

    for used in 1..=5 {
        let response = ctx
            .server
            .post("/usage/consume")
            .authorization_bearer(&access_token)
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["allowed"], true);
        assert_eq!(body["used"], used);
    }

    let response = ctx
        .server
        .post("/usage/consume")
        .authorization_bearer(&access_token)
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "quota_exceeded");
    assert!(body["retry_at"].is_string());
}

#[tokio::test]
async fn usage_requires_authentication() {
    let ctx = TestContext::new();

    ctx.server
        .post("/usage/consume")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
