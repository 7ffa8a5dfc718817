//! REST API Routes Module
//!
//! Handlers are grouped by feature. [`create_api_router`] assembles them:
//!
//! - Client routes under `/api/*` run behind identity resolution and
//!   request throttling.
//! - Provider webhooks and admin routes authenticate themselves (signatures,
//!   admin key) and skip identity resolution.
//! - Health, metrics and the OpenAPI document are public.

pub mod admin;
pub mod analytics;
pub mod auth;
pub mod email;
pub mod entitlements;
pub mod founders;
pub mod health;
pub mod rate_limit;
pub mod tips;
pub mod versecoins;
pub mod webhooks;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderMap, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use verse_core::Character;

use crate::config::{ApiConfig, ServiceConfig};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{identity_middleware, throttle_middleware};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Character for a request: explicit key, then `Host`, then the default.
/// An unknown explicit key is a 404.
pub(crate) fn resolve_character(
    services: &ServiceConfig,
    explicit: Option<&str>,
    headers: &HeaderMap,
) -> ApiResult<Character> {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    Ok(services.catalog.resolve(explicit, host)?.clone())
}

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

fn is_production_environment() -> bool {
    std::env::var("VERSE_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set VERSE_CORS_ORIGINS.",
        ));
    }
    if !config.throttle_enabled {
        tracing::warn!("Request throttling is disabled in production");
    }
    Ok(())
}

// ============================================================================
// ROUTER
// ============================================================================

fn client_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::create_router())
        .nest("/rate-limit", rate_limit::create_router())
        .nest("/entitlements", entitlements::create_router())
        .nest("/versecoins", versecoins::create_router())
        .nest("/tips", tips::create_router())
        .nest("/founders", founders::create_router())
        .nest("/email", email::create_router())
        .nest("/analytics", analytics::create_router())
}

/// Build the complete application router.
///
/// # Middleware order (outer to inner)
/// 1. CORS
/// 2. Observability
/// 3. Identity resolution (client routes only)
/// 4. Throttling (client and admin routes)
pub fn create_api_router(state: AppState) -> ApiResult<Router> {
    if is_production_environment() {
        state.auth.validate_for_production()?;
        validate_api_config_for_production(&state.api)?;
    }

    let client = client_routes()
        .layer(from_fn_with_state(state.throttle.clone(), throttle_middleware))
        .layer(from_fn_with_state(state.auth.clone(), identity_middleware));

    let admin = admin::create_router()
        .layer(from_fn_with_state(state.throttle.clone(), throttle_middleware));

    let cors = build_cors_layer(&state.api);

    let api = client
        .merge(admin)
        .nest("/webhooks", webhooks::create_router());

    let router = Router::new()
        .nest("/api", api)
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .with_state(state)
        .layer(from_fn(observability_middleware))
        .layer(cors);

    Ok(router)
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Development (no origins configured) allows everything; otherwise only the
/// configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-admin-key"),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: development mode, allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricted origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_character_by_host_and_key() {
        let services = ServiceConfig::default();
        let mut headers = HeaderMap::new();

        let default_key = services.catalog.default_character().key.clone();
        let character = resolve_character(&services, None, &headers).unwrap();
        assert_eq!(character.key, default_key);

        let nyx = services.catalog.get("nyx").unwrap().clone();
        if let Some(domain) = nyx.domains.first() {
            headers.insert(header::HOST, HeaderValue::from_str(&format!("{}:443", domain)).unwrap());
            let character = resolve_character(&services, None, &headers).unwrap();
            assert_eq!(character.key, "nyx");
        }

        let character = resolve_character(&services, Some("nyx"), &HeaderMap::new()).unwrap();
        assert_eq!(character.key, "nyx");
    }

    #[test]
    fn test_unknown_character_is_not_found() {
        let services = ServiceConfig::default();
        let err = resolve_character(&services, Some("nobody"), &HeaderMap::new()).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }
}
