//! Identity routes: who is calling, and folding an anonymous visitor's
//! usage into their new account.

use axum::{extract::State, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use verse_core::{usage_day, AnonymousId, IdentitySource};

use crate::error::{ApiError, ApiResult};
use crate::middleware::{IdentityExtractor, RequireUser};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct WhoAmIResponse {
    /// User UUID or anonymous id; `null` when unidentified.
    pub user_id: Option<String>,
    pub source: IdentitySource,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct MergeAnonymousRequest {
    pub anonymous_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct MergeAnonymousResponse {
    /// Messages moved onto the account today.
    pub merged: u32,
    pub characters: Vec<String>,
}

/// GET /api/auth/whoami
#[utoipa::path(
    get,
    path = "/api/auth/whoami",
    tag = "Auth",
    responses(
        (status = 200, description = "Resolved identity", body = WhoAmIResponse),
        (status = 401, description = "Invalid bearer token", body = ApiError),
    ),
)]
pub async fn whoami(IdentityExtractor(identity): IdentityExtractor) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        user_id: identity.display_id(),
        source: identity.source(),
        authenticated: identity.is_authenticated(),
        email: identity.email().map(str::to_string),
    })
}

/// POST /api/auth/merge-anonymous
#[utoipa::path(
    post,
    path = "/api/auth/merge-anonymous",
    tag = "Auth",
    request_body = MergeAnonymousRequest,
    responses(
        (status = 200, description = "Usage merged", body = MergeAnonymousResponse),
        (status = 400, description = "Malformed anonymous id", body = ApiError),
        (status = 401, description = "Not signed in", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn merge_anonymous(
    State(state): State<AppState>,
    user: RequireUser,
    Json(req): Json<MergeAnonymousRequest>,
) -> ApiResult<Json<MergeAnonymousResponse>> {
    let anonymous_id = AnonymousId::parse(&req.anonymous_id)?;
    let day = usage_day(state.now());

    let moved = state
        .store
        .usage_merge_anonymous(&anonymous_id, user.user_id, day)
        .await?;

    let merged: u32 = moved.iter().map(|m| m.messages).sum();
    tracing::info!(
        user_id = %user.user_id,
        merged,
        characters = moved.len(),
        "Merged anonymous usage"
    );

    Ok(Json(MergeAnonymousResponse {
        merged,
        characters: moved.into_iter().map(|m| m.character_key).collect(),
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/merge-anonymous", post(merge_anonymous))
}
