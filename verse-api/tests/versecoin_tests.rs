//! VerseCoin wallet and tip flows through the router.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::*;
use verse_api::{ApiResult, Store};
use verse_core::{OrderKind, TipStatus, UserId};

async fn seed_wallet(app: &TestApp, user: UserId, coins: i64) -> ApiResult<()> {
    app.store
        .wallet_credit(user, coins, "purchase", Some("seed"), app.clock.0)
        .await?;
    Ok(())
}

fn bearer(app: &TestApp, user: UserId) -> String {
    format!("Bearer {}", app.token_for(user))
}

#[tokio::test]
async fn balance_lists_recent_entries() -> ApiResult<()> {
    let app = TestApp::new();
    let user = new_user();
    seed_wallet(&app, user, 300).await?;

    let (status, body) = app
        .send(empty(
            request("GET", "/api/versecoins/balance").header("authorization", bearer(&app, user)),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 300);
    assert_eq!(body["recent"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["recent"][0]["kind"], "credit");
    Ok(())
}

#[tokio::test]
async fn wallet_requires_sign_in() {
    let app = TestApp::new();
    let (status, _) = app
        .send(empty(
            request("GET", "/api/versecoins/balance").header("x-user-id", "anon_visitor_0003"),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn debit_short_balance_returns_402_with_balance() -> ApiResult<()> {
    let app = TestApp::new();
    let user = new_user();
    seed_wallet(&app, user, 10).await?;

    let (status, body) = app
        .send(with_json(
            request("POST", "/api/versecoins/debit").header("authorization", bearer(&app, user)),
            &json!({ "amount": 25, "reason": "voice message" }),
        ))
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["balance"], 10);
    assert_eq!(body["requested"], 25);
    assert_eq!(app.store.wallet_balance(user).await?, 10);
    Ok(())
}

#[tokio::test]
async fn concurrent_debits_never_overdraw() -> ApiResult<()> {
    let app = TestApp::new();
    let user = new_user();
    seed_wallet(&app, user, 100).await?;
    let auth = bearer(&app, user);

    let first = app.send(with_json(
        request("POST", "/api/versecoins/debit").header("authorization", auth.clone()),
        &json!({ "amount": 60, "reason": "voice" }),
    ));
    let second = app.send(with_json(
        request("POST", "/api/versecoins/debit").header("authorization", auth.clone()),
        &json!({ "amount": 60, "reason": "voice" }),
    ));
    let ((s1, _), (s2, _)) = tokio::join!(first, second);

    let mut statuses = [s1, s2];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, [StatusCode::OK, StatusCode::PAYMENT_REQUIRED]);
    assert_eq!(app.store.wallet_balance(user).await?, 40);
    Ok(())
}

#[tokio::test]
async fn repeated_idempotency_key_debits_once() -> ApiResult<()> {
    let app = TestApp::new();
    let user = new_user();
    seed_wallet(&app, user, 100).await?;
    let body = json!({ "amount": 30, "reason": "voice", "idempotencyKey": "msg-42" });

    let (status, first) = app
        .send(with_json(
            request("POST", "/api/versecoins/debit").header("authorization", bearer(&app, user)),
            &body,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["balance"], 70);
    assert_eq!(first["replayed"], false);

    let (status, second) = app
        .send(with_json(
            request("POST", "/api/versecoins/debit").header("authorization", bearer(&app, user)),
            &body,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["entryId"], first["entryId"]);
    assert_eq!(app.store.wallet_balance(user).await?, 70);
    Ok(())
}

#[tokio::test]
async fn debit_rejects_non_positive_amounts() {
    let app = TestApp::new();
    let user = new_user();
    let (status, _) = app
        .send(with_json(
            request("POST", "/api/versecoins/debit").header("authorization", bearer(&app, user)),
            &json!({ "amount": 0, "reason": "voice" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn purchase_opens_tagged_payment_intent() {
    let app = TestApp::new();
    let user = new_user();

    let (status, body) = app
        .send(with_json(
            request("POST", "/api/versecoins/purchase").header("authorization", bearer(&app, user)),
            &json!({ "packId": "plus" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["coins"], 1200);
    assert_eq!(body["amountCents"], 999);
    assert_eq!(body["clientSecret"], "pi_test_1_secret");

    let requests = app.gateway.requests.lock().map(|r| r.clone()).unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, OrderKind::VerseCoins);
    assert_eq!(requests[0].metadata.get("user_id"), Some(&user.to_string()));

    // Nothing is credited until the webhook arrives.
    let (_, balance) = app
        .send(empty(
            request("GET", "/api/versecoins/balance").header("authorization", bearer(&app, user)),
        ))
        .await;
    assert_eq!(balance["balance"], 0);
}

#[tokio::test]
async fn purchase_of_unknown_pack_is_not_found() {
    let app = TestApp::new();
    let user = new_user();
    let (status, _) = app
        .send(with_json(
            request("POST", "/api/versecoins/purchase").header("authorization", bearer(&app, user)),
            &json!({ "packId": "gigantic" }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn card_tip_starts_pending() {
    let app = TestApp::new();
    let (status, body) = app
        .send(with_json(
            request("POST", "/api/tips/create").header("x-user-id", "anon_visitor_0004"),
            &json!({ "characterKey": "lexi", "amount": 500, "message": "thanks!" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["clientSecret"], "pi_test_1_secret");

    let tip_id = body["tipId"]
        .as_str()
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .expect("tip id is a uuid");
    let tip = app.store.tip(tip_id).expect("tip stored");
    assert_eq!(tip.payment_intent_id.as_deref(), Some("pi_test_1"));
    assert_eq!(tip.status, TipStatus::Pending);
}

#[tokio::test]
async fn tip_amount_out_of_bounds_is_rejected() {
    let app = TestApp::new();
    let (status, _) = app
        .send(with_json(
            request("POST", "/api/tips/create").header("x-user-id", "anon_visitor_0004"),
            &json!({ "characterKey": "lexi", "amount": 50 }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn coin_tip_settles_immediately() -> ApiResult<()> {
    let app = TestApp::new();
    let user = new_user();
    seed_wallet(&app, user, 1000).await?;

    let (status, body) = app
        .send(with_json(
            request("POST", "/api/tips/create").header("authorization", bearer(&app, user)),
            &json!({ "characterKey": "nyx", "amount": 300, "payWith": "versecoins" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "succeeded");
    assert!(body["clientSecret"].is_null());
    assert_eq!(app.store.wallet_balance(user).await?, 700);
    assert_eq!(app.notifier.events().len(), 1);
    assert!(app.gateway.requests.lock().map(|r| r.is_empty()).unwrap_or(false));
    Ok(())
}

#[tokio::test]
async fn coin_tip_without_enough_coins_is_402() -> ApiResult<()> {
    let app = TestApp::new();
    let user = new_user();
    seed_wallet(&app, user, 100).await?;

    let (status, body) = app
        .send(with_json(
            request("POST", "/api/tips/create").header("authorization", bearer(&app, user)),
            &json!({ "characterKey": "lexi", "amount": 500, "payWith": "versecoins" }),
        ))
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["balance"], 100);
    assert!(app.notifier.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn anonymous_coin_tip_requires_sign_in() {
    let app = TestApp::new();
    let (status, _) = app
        .send(with_json(
            request("POST", "/api/tips/create").header("x-user-id", "anon_visitor_0005"),
            &json!({ "characterKey": "lexi", "amount": 500, "payWith": "versecoins" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
