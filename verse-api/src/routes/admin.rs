//! Admin tooling. Every route requires an `x-admin-key` listed in
//! `VERSE_ADMIN_KEYS`.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::delete,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::DeletionReport;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

fn require_admin(auth: &AuthConfig, headers: &HeaderMap) -> ApiResult<()> {
    let key = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Admin key required"))?;
    if !auth.is_admin_key(key) {
        tracing::warn!("Rejected admin request with unknown key");
        return Err(ApiError::forbidden("Invalid admin key"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: Uuid,
    /// Rows removed per table.
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub deleted: DeletionReport,
    pub total: u64,
}

/// DELETE /api/admin/users/{user_id}
///
/// Removes every row the user owns across all tables.
#[utoipa::path(
    delete,
    path = "/api/admin/users/{user_id}",
    tag = "Admin",
    params(("user_id" = String, Path, description = "User UUID")),
    responses(
        (status = 200, description = "User data deleted", body = DeleteUserResponse),
        (status = 400, description = "Malformed user id", body = ApiError),
        (status = 401, description = "Admin key missing", body = ApiError),
        (status = 403, description = "Admin key rejected", body = ApiError),
    ),
    security(("admin_key" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<DeleteUserResponse>> {
    require_admin(&state.auth, &headers)?;
    let user_id = Uuid::parse_str(user_id.trim())?;

    let deleted = state.store.user_delete_all(user_id).await?;
    let total = deleted.values().sum();
    tracing::warn!(user_id = %user_id, total, "Deleted all user data");

    Ok(Json(DeleteUserResponse {
        user_id,
        deleted,
        total,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/admin/users/:user_id", delete(delete_user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::collections::HashSet;

    fn auth() -> AuthConfig {
        AuthConfig {
            admin_keys: HashSet::from(["admin-key-for-tests-0000000".to_string()]),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_require_admin() {
        let auth = auth();
        let mut headers = HeaderMap::new();
        assert_eq!(
            require_admin(&auth, &headers).unwrap_err().status_code(),
            axum::http::StatusCode::UNAUTHORIZED
        );

        headers.insert(ADMIN_KEY_HEADER, HeaderValue::from_static("wrong"));
        assert_eq!(
            require_admin(&auth, &headers).unwrap_err().status_code(),
            axum::http::StatusCode::FORBIDDEN
        );

        headers.insert(
            ADMIN_KEY_HEADER,
            HeaderValue::from_static("admin-key-for-tests-0000000"),
        );
        assert!(require_admin(&auth, &headers).is_ok());
    }
}
