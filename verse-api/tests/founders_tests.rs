//! Founders' Circle seat claims.

mod support;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use support::*;
use verse_api::notify::AdminEvent;
use verse_core::{Character, CharacterCatalog};

/// Catalog whose only character has two founder seats.
fn two_seat_app() -> TestApp {
    let character = Character {
        key: "solo".to_string(),
        display_name: "Solo".to_string(),
        domains: vec!["solo.chat".to_string()],
        premium_price_cents: 1299,
        vip_price_cents: 2999,
        founder_price_cents: 799,
        founder_seats: 2,
    };
    let catalog = CharacterCatalog::new(vec![character], "solo").expect("valid catalog");
    TestApp::with_services(verse_api::ServiceConfig {
        catalog: Arc::new(catalog),
        ..service_config()
    })
}

async fn claim(app: &TestApp, user: verse_core::UserId) -> (StatusCode, serde_json::Value) {
    app.send(with_json(
        request("POST", "/api/founders/claim")
            .header("authorization", format!("Bearer {}", app.token_for(user))),
        &json!({ "characterKey": "solo" }),
    ))
    .await
}

#[tokio::test]
async fn seats_run_out_with_409() {
    let app = two_seat_app();
    let (first, second, third) = (new_user(), new_user(), new_user());

    let (status, body) = claim(&app, first).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["seat"]["seatNumber"], 1);
    assert_eq!(body["seat"]["lockedPriceCents"], 799);
    assert_eq!(body["alreadyMember"], false);

    let (status, body) = claim(&app, second).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["seat"]["seatNumber"], 2);

    let (status, body) = claim(&app, third).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "FOUNDERS_FULL");

    let founder_events = app
        .notifier
        .events()
        .into_iter()
        .filter(|e| matches!(e, AdminEvent::FounderClaimed { .. }))
        .count();
    assert_eq!(founder_events, 2);
}

#[tokio::test]
async fn existing_member_claims_idempotently() {
    let app = two_seat_app();
    let user = new_user();

    claim(&app, user).await;
    let (status, body) = claim(&app, user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alreadyMember"], true);
    assert_eq!(body["seat"]["seatNumber"], 1);

    let (_, status_body) = app
        .send(empty(request("GET", "/api/founders/status?characterKey=solo").header(
            "authorization",
            format!("Bearer {}", app.token_for(user)),
        )))
        .await;
    assert_eq!(status_body["seatsTaken"], 1);
    assert_eq!(status_body["seatsRemaining"], 1);
    assert_eq!(status_body["isMember"], true);
    assert_eq!(status_body["lockedPriceCents"], 799);
}

#[tokio::test]
async fn concurrent_claims_never_exceed_cap() {
    let app = two_seat_app();
    let users: Vec<_> = (0..6).map(|_| new_user()).collect();

    let results = futures_join_all(&app, &users).await;
    let claimed = results.iter().filter(|s| **s == StatusCode::OK).count();
    let full = results.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!(claimed, 2);
    assert_eq!(full, 4);
}

async fn futures_join_all(app: &TestApp, users: &[verse_core::UserId]) -> Vec<StatusCode> {
    let mut handles = Vec::new();
    for user in users {
        let router = app.router.clone();
        let req = with_json(
            request("POST", "/api/founders/claim")
                .header("authorization", format!("Bearer {}", app.token_for(*user))),
            &json!({ "characterKey": "solo" }),
        );
        handles.push(tokio::spawn(async move {
            use tower::ServiceExt;
            router
                .oneshot(req)
                .await
                .map(|r| r.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }));
    }
    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    }
    statuses
}

#[tokio::test]
async fn status_is_public() {
    let app = two_seat_app();
    let (status, body) = app
        .send(empty(request("GET", "/api/founders/status?characterKey=solo")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["seatsTotal"], 2);
    assert_eq!(body["isMember"], false);
    assert!(body.get("lockedPriceCents").is_none());
}

#[tokio::test]
async fn anonymous_visitors_cannot_claim() {
    let app = two_seat_app();
    let (status, _) = app
        .send(with_json(
            request("POST", "/api/founders/claim").header("x-user-id", "anon_visitor_0006"),
            &json!({ "characterKey": "solo" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
