//! Daily message quota: increment-and-check, and read-only status.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use verse_core::{usage_day, Character, QuotaStatus, SubjectKey, Tier};

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireSubject;
use crate::routes::entitlements::{load_entitlements, CharacterQuery};
use crate::routes::resolve_character;
use crate::state::AppState;
use crate::telemetry::metrics;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    #[serde(default)]
    pub character_key: Option<String>,
}

/// Tier and daily limit for a subject.
async fn quota_for(
    state: &AppState,
    subject: &SubjectKey,
    character: &Character,
) -> ApiResult<(Tier, Option<u32>)> {
    let entitlements = load_entitlements(state, subject, character).await?;
    Ok((entitlements.tier, entitlements.chat_quota))
}

/// POST /api/rate-limit/check
///
/// Counts one message when the limit allows it. A reached limit answers 429
/// with the same body and leaves the counter unchanged.
#[utoipa::path(
    post,
    path = "/api/rate-limit/check",
    tag = "Rate Limit",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Message counted", body = QuotaStatus),
        (status = 401, description = "No user or anonymous id", body = ApiError),
        (status = 404, description = "Unknown character", body = ApiError),
        (status = 429, description = "Daily limit reached", body = QuotaStatus),
    ),
)]
pub async fn check(
    State(state): State<AppState>,
    RequireSubject { subject, .. }: RequireSubject,
    headers: HeaderMap,
    body: Option<Json<CheckRequest>>,
) -> ApiResult<Response> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let character = resolve_character(&state.services, req.character_key.as_deref(), &headers)?;
    let (tier, limit) = quota_for(&state, &subject, &character).await?;

    let now = state.now();
    let outcome = state
        .store
        .usage_increment(&subject, &character.key, usage_day(now), limit)
        .await?;
    let status = QuotaStatus::from_increment(outcome, limit, tier, now);

    if let Some(m) = metrics() {
        m.record_quota_decision(tier.as_str(), status.allowed);
    }

    if status.allowed {
        Ok((StatusCode::OK, Json(status)).into_response())
    } else {
        tracing::info!(
            subject = %subject,
            character = %character.key,
            used = status.used,
            "Daily message limit reached"
        );
        Ok((StatusCode::TOO_MANY_REQUESTS, Json(status)).into_response())
    }
}

/// GET /api/rate-limit/status
#[utoipa::path(
    get,
    path = "/api/rate-limit/status",
    tag = "Rate Limit",
    params(CharacterQuery),
    responses(
        (status = 200, description = "Current usage", body = QuotaStatus),
        (status = 401, description = "No user or anonymous id", body = ApiError),
        (status = 404, description = "Unknown character", body = ApiError),
    ),
)]
pub async fn status(
    State(state): State<AppState>,
    RequireSubject { subject, .. }: RequireSubject,
    headers: HeaderMap,
    Query(query): Query<CharacterQuery>,
) -> ApiResult<Json<QuotaStatus>> {
    let character = resolve_character(&state.services, query.character_key.as_deref(), &headers)?;
    let (tier, limit) = quota_for(&state, &subject, &character).await?;

    let now = state.now();
    let used = state
        .store
        .usage_get(&subject, &character.key, usage_day(now))
        .await?;

    Ok(Json(QuotaStatus::from_usage(used, limit, tier, now)))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/check", post(check))
        .route("/status", get(status))
}
