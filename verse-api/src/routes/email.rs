//! One-click email unsubscribe.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::signature::verify_unsubscribe_token;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct UnsubscribeQuery {
    /// `base64url(email).hex(hmac)` from the email footer.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeResponse {
    pub success: bool,
    pub email: String,
    pub already_unsubscribed: bool,
}

/// GET /api/email/unsubscribe
#[utoipa::path(
    get,
    path = "/api/email/unsubscribe",
    tag = "Email",
    params(UnsubscribeQuery),
    responses(
        (status = 200, description = "Address suppressed", body = UnsubscribeResponse),
        (status = 400, description = "Invalid token", body = ApiError),
        (status = 503, description = "Unsubscribe links not configured", body = ApiError),
    ),
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Query(query): Query<UnsubscribeQuery>,
) -> ApiResult<Json<UnsubscribeResponse>> {
    let secret = state
        .services
        .unsubscribe_secret
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Unsubscribe links are not configured"))?;

    let email = verify_unsubscribe_token(secret.expose_secret(), &query.token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected unsubscribe token");
        ApiError::invalid_input("Invalid unsubscribe token")
    })?;

    let newly_added = state
        .store
        .email_unsubscribe(&email, "unsubscribe_link", state.now())
        .await?;
    if newly_added {
        tracing::info!("Email address unsubscribed");
    }

    Ok(Json(UnsubscribeResponse {
        success: true,
        email,
        already_unsubscribed: !newly_added,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/unsubscribe", get(unsubscribe))
}
