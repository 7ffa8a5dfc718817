//! Founders' Circle: seat availability and claims.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use verse_core::{seats_remaining, FounderClaim, FounderSeat};

use crate::error::{ApiError, ApiResult};
use crate::middleware::{IdentityExtractor, RequireUser};
use crate::notify::AdminEvent;
use crate::routes::entitlements::CharacterQuery;
use crate::routes::resolve_character;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct FoundersStatusResponse {
    pub character_key: String,
    pub seats_taken: u32,
    pub seats_total: u32,
    pub seats_remaining: u32,
    /// Price new founders lock in.
    pub founder_price_cents: i64,
    pub is_member: bool,
    /// The caller's own locked price, when they hold a seat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_price_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub character_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub already_member: bool,
    pub seat: FounderSeat,
    pub seats_total: u32,
}

/// GET /api/founders/status
#[utoipa::path(
    get,
    path = "/api/founders/status",
    tag = "Founders",
    params(CharacterQuery),
    responses(
        (status = 200, description = "Seat availability", body = FoundersStatusResponse),
        (status = 404, description = "Unknown character", body = ApiError),
    ),
)]
pub async fn status(
    State(state): State<AppState>,
    IdentityExtractor(identity): IdentityExtractor,
    headers: HeaderMap,
    Query(query): Query<CharacterQuery>,
) -> ApiResult<Json<FoundersStatusResponse>> {
    let character = resolve_character(&state.services, query.character_key.as_deref(), &headers)?;
    let seats_taken = state.store.founder_count(&character.key).await?;

    let seat = match identity.user_id() {
        Some(user_id) => state.store.founder_get(user_id, &character.key).await?,
        None => None,
    };

    Ok(Json(FoundersStatusResponse {
        seats_taken,
        seats_total: character.founder_seats,
        seats_remaining: seats_remaining(character.founder_seats, seats_taken),
        founder_price_cents: character.founder_price_cents,
        is_member: seat.is_some(),
        locked_price_cents: seat.map(|s| s.locked_price_cents),
        character_key: character.key,
    }))
}

/// POST /api/founders/claim
#[utoipa::path(
    post,
    path = "/api/founders/claim",
    tag = "Founders",
    request_body = ClaimRequest,
    responses(
        (status = 200, description = "Seat claimed (or already held)", body = ClaimResponse),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 404, description = "Unknown character", body = ApiError),
        (status = 409, description = "All seats taken", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn claim(
    State(state): State<AppState>,
    user: RequireUser,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<ClaimResponse>> {
    let character = state
        .services
        .catalog
        .get(req.character_key.trim())
        .cloned()
        .ok_or_else(|| ApiError::character_not_found(&req.character_key))?;

    match state
        .store
        .founder_claim(user.user_id, &character, state.now())
        .await?
    {
        FounderClaim::Claimed(seat) => {
            tracing::info!(
                user_id = %user.user_id,
                character = %character.key,
                seat = seat.seat_number,
                "Founder seat claimed"
            );
            state.notifier.notify(AdminEvent::FounderClaimed {
                user_id: user.user_id,
                character_key: character.key.clone(),
                seat_number: seat.seat_number,
                seats_total: character.founder_seats,
            });
            Ok(Json(ClaimResponse {
                already_member: false,
                seat,
                seats_total: character.founder_seats,
            }))
        }
        FounderClaim::AlreadyMember(seat) => Ok(Json(ClaimResponse {
            already_member: true,
            seat,
            seats_total: character.founder_seats,
        })),
        FounderClaim::Full { seats_total } => {
            Err(ApiError::founders_full(&character.key, seats_total))
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/claim", post(claim))
}
