//! Shared harness for router-level tests: in-memory store, fake Stripe
//! gateway, recording notifier and a pinned clock.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use verse_api::auth::JwtSecret;
use verse_api::{
    create_api_router, encode_session_token, AdminEvent, ApiConfig, ApiResult, AppState,
    AuthConfig, MemoryStore, Notifier, PaymentGateway, PaymentIntent, PaymentIntentRequest,
    ServiceConfig, SupabaseClaims,
};
use verse_core::{Clock, FixedClock, UserId};
use verse_test_utils::clocks;

pub const JWT_SECRET: &str = "integration_test_secret_that_is_long_enough";
pub const ADMIN_KEY: &str = "admin-key-for-integration-tests";
pub const STRIPE_SECRET: &str = "whsec_stripe_integration";
pub const COINBASE_SECRET: &str = "coinbase-shared-secret";
/// `whsec_` + base64("test-svix-secret-key").
pub const RESEND_SECRET: &str = "whsec_dGVzdC1zdml4LXNlY3JldC1rZXk=";
pub const GUMROAD_SELLER: &str = "seller_verse";
pub const UNSUBSCRIBE_SECRET: &str = "unsubscribe-integration-secret";

/// Payment gateway that hands out sequential intents and remembers requests.
#[derive(Default)]
pub struct FakeGateway {
    pub requests: Mutex<Vec<PaymentIntentRequest>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> ApiResult<PaymentIntent> {
        let mut requests = self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        requests.push(request.clone());
        let n = requests.len();
        Ok(PaymentIntent {
            id: format!("pi_test_{}", n),
            client_secret: format!("pi_test_{}_secret", n),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<AdminEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<AdminEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: AdminEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub auth: AuthConfig,
    pub clock: FixedClock,
}

pub fn auth_config(clock: FixedClock) -> AuthConfig {
    AuthConfig {
        jwt_secret: JwtSecret::new(JWT_SECRET.to_string()).expect("test secret is valid"),
        jwt_audience: "authenticated".to_string(),
        jwt_clock_skew_secs: 60,
        admin_keys: HashSet::from([ADMIN_KEY.to_string()]),
        clock: Arc::new(clock),
    }
}

pub fn service_config() -> ServiceConfig {
    ServiceConfig {
        stripe_webhook_secret: Some(SecretString::from(STRIPE_SECRET.to_string())),
        coinbase_webhook_secret: Some(SecretString::from(COINBASE_SECRET.to_string())),
        resend_webhook_secret: Some(SecretString::from(RESEND_SECRET.to_string())),
        gumroad_seller_id: Some(GUMROAD_SELLER.to_string()),
        unsubscribe_secret: Some(SecretString::from(UNSUBSCRIBE_SECRET.to_string())),
        ..ServiceConfig::default()
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_services(service_config())
    }

    pub fn with_services(services: ServiceConfig) -> Self {
        let clock = clocks::midday();
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let auth = auth_config(clock);
        let api = ApiConfig {
            throttle_enabled: false,
            ..ApiConfig::default()
        };

        let state = AppState::new(
            store.clone(),
            auth.clone(),
            services,
            api,
            gateway.clone(),
            notifier.clone(),
        );
        let router = create_api_router(state).expect("router builds outside production");

        Self {
            router,
            store,
            gateway,
            notifier,
            auth,
            clock,
        }
    }

    pub fn now_secs(&self) -> i64 {
        self.clock.now().timestamp()
    }

    pub fn token_for(&self, user_id: UserId) -> String {
        let claims = SupabaseClaims::new(
            user_id,
            Some("fan@verse.example".to_string()),
            3600,
            &self.clock,
        );
        encode_session_token(&self.auth, &claims).expect("token encodes")
    }

    /// Send a request and return the status and parsed JSON body (`Null` when
    /// the body is empty or not JSON).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body collects");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

pub fn new_user() -> UserId {
    Uuid::new_v4()
}

pub fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

pub fn with_json(builder: axum::http::request::Builder, body: &Value) -> Request<Body> {
    builder
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

pub fn empty(builder: axum::http::request::Builder) -> Request<Body> {
    builder.body(Body::empty()).expect("request builds")
}
