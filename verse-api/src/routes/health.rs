//! Probes for the load balancer and deploy tooling. No authentication.
//!
//! `/health/ready` fails only when the store is unreachable. Missing provider
//! secrets are reported but do not fail readiness, since the affected
//! webhooks answer 503 on their own.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::state::AppState;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct LivenessReport {
    pub status: ProbeStatus,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct StoreProbe {
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which outside integrations have credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Integrations {
    pub stripe_payments: bool,
    pub stripe_webhooks: bool,
    pub coinbase_webhooks: bool,
    pub resend_webhooks: bool,
    pub gumroad_pings: bool,
    pub unsubscribe_links: bool,
    pub admin_notifications: bool,
}

impl Integrations {
    pub fn from_services(services: &ServiceConfig) -> Self {
        Self {
            stripe_payments: services.stripe_secret_key.is_some(),
            stripe_webhooks: services.stripe_webhook_secret.is_some(),
            coinbase_webhooks: services.coinbase_webhook_secret.is_some(),
            resend_webhooks: services.resend_webhook_secret.is_some(),
            gumroad_pings: services.gumroad_seller_id.is_some(),
            unsubscribe_links: services.unsubscribe_secret.is_some(),
            admin_notifications: services.slack_webhook_url.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub status: ProbeStatus,
    pub store: StoreProbe,
    pub characters: usize,
    pub integrations: Integrations,
    pub uptime_seconds: u64,
    pub version: String,
}

/// GET /health/ping
#[utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses((status = 200, description = "Service is responding", body = String)),
)]
pub async fn ping() -> &'static str {
    "pong"
}

/// GET /health/live
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses((status = 200, description = "Process is alive", body = LivenessReport)),
)]
pub async fn liveness() -> Json<LivenessReport> {
    Json(LivenessReport {
        status: ProbeStatus::Up,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn probe_store(store: &dyn Store) -> StoreProbe {
    let started = Instant::now();
    match store.ping().await {
        Ok(()) => StoreProbe {
            status: ProbeStatus::Up,
            latency_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Store probe failed");
            StoreProbe {
                status: ProbeStatus::Down,
                latency_ms: None,
                error: Some(e.error),
            }
        }
    }
}

/// GET /health/ready
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready to serve traffic", body = ReadinessReport),
        (status = 503, description = "Store unreachable", body = ReadinessReport),
    ),
)]
pub async fn readiness(
    State(store): State<Arc<dyn Store>>,
    State(services): State<Arc<ServiceConfig>>,
    State(start_time): State<Instant>,
) -> impl IntoResponse {
    let store = probe_store(store.as_ref()).await;
    let report = ReadinessReport {
        status: store.status,
        store,
        characters: services.catalog.len(),
        integrations: Integrations::from_services(&services),
        uptime_seconds: start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let code = match report.status {
        ProbeStatus::Up => StatusCode::OK,
        ProbeStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}
