//! Unsubscribe links, analytics ingestion and admin deletion.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::*;
use verse_api::signature::unsubscribe_token;
use verse_api::{ApiResult, Store};

#[tokio::test]
async fn unsubscribe_is_idempotent() -> ApiResult<()> {
    let app = TestApp::new();
    let token = unsubscribe_token(UNSUBSCRIBE_SECRET, "Fan@Example.com");
    let uri = format!("/api/email/unsubscribe?token={}", token);

    let (status, body) = app.send(empty(request("GET", &uri))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["email"], "fan@example.com");
    assert_eq!(body["alreadyUnsubscribed"], false);

    let (status, body) = app.send(empty(request("GET", &uri))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alreadyUnsubscribed"], true);

    assert!(app.store.email_is_unsubscribed("fan@example.com").await?);
    Ok(())
}

#[tokio::test]
async fn tampered_unsubscribe_token_is_400() {
    let app = TestApp::new();
    let token = unsubscribe_token("some-other-secret", "fan@example.com");
    let (status, body) = app
        .send(empty(request(
            "GET",
            &format!("/api/email/unsubscribe?token={}", token),
        )))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn unsubscribe_without_secret_is_unavailable() {
    let app = TestApp::with_services(verse_api::ServiceConfig::default());
    let (status, _) = app
        .send(empty(request("GET", "/api/email/unsubscribe?token=abc.def")))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn analytics_accepts_unidentified_callers() {
    let app = TestApp::new();

    let (status, _) = app
        .send(with_json(
            request("POST", "/api/analytics/pageview"),
            &json!({ "path": "/chat", "characterKey": "lexi", "referrer": "" }),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(app.store.page_view_count(), 1);

    let (status, _) = app
        .send(with_json(
            request("POST", "/api/analytics/heartbeat").header("x-user-id", "anon_visitor_0007"),
            &json!({ "sessionId": "sess-1", "path": "/chat" }),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(app.store.session_last_seen("sess-1"), Some(app.clock.0));
}

#[tokio::test]
async fn pageview_requires_path() {
    let app = TestApp::new();
    let (status, _) = app
        .send(with_json(
            request("POST", "/api/analytics/pageview"),
            &json!({ "path": "   " }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_delete_requires_valid_key() {
    let app = TestApp::new();
    let uri = format!("/api/admin/users/{}", new_user());

    let (status, _) = app.send(empty(request("DELETE", &uri))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(empty(request("DELETE", &uri).header("x-admin-key", "guess")))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_delete_removes_everything_the_user_owns() -> ApiResult<()> {
    let app = TestApp::new();
    let user = new_user();
    let other = new_user();
    let now = app.clock.0;

    app.store
        .wallet_credit(user, 500, "purchase", Some("seed"), now)
        .await?;
    app.store
        .wallet_credit(other, 500, "purchase", Some("seed"), now)
        .await?;
    app.store
        .crypto_subscription_extend(user, "lexi", verse_core::Tier::Premium, "charge_premium", now)
        .await?;

    let (status, body) = app
        .send(empty(
            request("DELETE", &format!("/api/admin/users/{}", user))
                .header("x-admin-key", ADMIN_KEY),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], user.to_string());
    assert!(body["total"].as_u64().unwrap_or(0) >= 3);

    assert_eq!(app.store.wallet_balance(user).await?, 0);
    assert!(app.store.crypto_subscription_get(user, "lexi").await?.is_none());
    assert_eq!(app.store.wallet_balance(other).await?, 500);
    Ok(())
}

#[tokio::test]
async fn admin_delete_rejects_malformed_ids() {
    let app = TestApp::new();
    let (status, _) = app
        .send(empty(
            request("DELETE", "/api/admin/users/not-a-uuid").header("x-admin-key", ADMIN_KEY),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
