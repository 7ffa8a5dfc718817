//! Identity resolution and anonymous-to-account merging.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::*;

const ANON: &str = "anon_visitor_4242";

fn bearer(app: &TestApp, user: verse_core::UserId) -> String {
    format!("Bearer {}", app.token_for(user))
}

#[tokio::test]
async fn whoami_reports_each_identity_source() {
    let app = TestApp::new();
    let user = new_user();

    let (status, body) = app
        .send(empty(
            request("GET", "/api/auth/whoami").header("authorization", bearer(&app, user)),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "authenticated");
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["userId"], user.to_string());
    assert_eq!(body["email"], "fan@verse.example");

    let (status, body) = app
        .send(empty(request("GET", "/api/auth/whoami").header("x-user-id", ANON)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "anonymous");
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["userId"], ANON);
    assert!(body.get("email").is_none());

    let (status, body) = app.send(empty(request("GET", "/api/auth/whoami"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "none");
    assert!(body["userId"].is_null());
}

#[tokio::test]
async fn bad_bearer_is_rejected() {
    let app = TestApp::new();
    let (status, _) = app
        .send(empty(
            request("GET", "/api/auth/whoami").header("authorization", "Bearer not-a-jwt"),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn merge_moves_todays_anonymous_usage_onto_the_account() {
    let app = TestApp::new();
    let user = new_user();

    for _ in 0..3 {
        let (status, _) = app
            .send(with_json(
                request("POST", "/api/rate-limit/check").header("x-user-id", ANON),
                &json!({ "characterKey": "lexi" }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .send(with_json(
            request("POST", "/api/auth/merge-anonymous")
                .header("authorization", bearer(&app, user)),
            &json!({ "anonymousId": ANON }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["merged"], 3);
    assert_eq!(body["characters"], json!(["lexi"]));

    let (_, body) = app
        .send(empty(
            request("GET", "/api/rate-limit/status?characterKey=lexi")
                .header("authorization", bearer(&app, user)),
        ))
        .await;
    assert_eq!(body["used"], 3);

    let (_, body) = app
        .send(empty(
            request("GET", "/api/rate-limit/status?characterKey=lexi").header("x-user-id", ANON),
        ))
        .await;
    assert_eq!(body["used"], 0);

    // Nothing left to move the second time.
    let (status, body) = app
        .send(with_json(
            request("POST", "/api/auth/merge-anonymous")
                .header("authorization", bearer(&app, user)),
            &json!({ "anonymousId": ANON }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["merged"], 0);
    assert_eq!(body["characters"], json!([]));
}

#[tokio::test]
async fn merge_requires_a_signed_in_user_and_a_valid_id() {
    let app = TestApp::new();

    let (status, _) = app
        .send(with_json(
            request("POST", "/api/auth/merge-anonymous").header("x-user-id", ANON),
            &json!({ "anonymousId": ANON }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(with_json(
            request("POST", "/api/auth/merge-anonymous")
                .header("authorization", bearer(&app, new_user())),
            &json!({ "anonymousId": "bad id" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
