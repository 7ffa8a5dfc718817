//! Analytics ingestion: page views and session heartbeats. Any identity,
//! including none, may report.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::IdentityExtractor;
use crate::state::AppState;
use crate::store::PageView;

const MAX_PATH_CHARS: usize = 2048;
const MAX_SESSION_ID_CHARS: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PageViewRequest {
    pub path: String,
    #[serde(default)]
    pub character_key: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub session_id: String,
    pub path: String,
}

fn validate_path(path: &str) -> ApiResult<&str> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ApiError::missing_field("path"));
    }
    if path.chars().count() > MAX_PATH_CHARS {
        return Err(ApiError::invalid_input(format!(
            "path must be at most {} characters",
            MAX_PATH_CHARS
        )));
    }
    Ok(path)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// POST /api/analytics/pageview
#[utoipa::path(
    post,
    path = "/api/analytics/pageview",
    tag = "Analytics",
    request_body = PageViewRequest,
    responses(
        (status = 202, description = "Recorded"),
        (status = 400, description = "Invalid path", body = ApiError),
    ),
)]
pub async fn pageview(
    State(state): State<AppState>,
    IdentityExtractor(identity): IdentityExtractor,
    Json(req): Json<PageViewRequest>,
) -> ApiResult<StatusCode> {
    let path = validate_path(&req.path)?.to_string();
    let view = PageView {
        id: Uuid::new_v4(),
        subject: identity.subject(),
        character_key: non_blank(req.character_key),
        path,
        referrer: non_blank(req.referrer),
        created_at: state.now(),
    };
    state.store.page_view_insert(&view).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/analytics/heartbeat
#[utoipa::path(
    post,
    path = "/api/analytics/heartbeat",
    tag = "Analytics",
    request_body = HeartbeatRequest,
    responses(
        (status = 202, description = "Session touched"),
        (status = 400, description = "Invalid session id or path", body = ApiError),
    ),
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    IdentityExtractor(identity): IdentityExtractor,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    let session_id = req.session_id.trim();
    if session_id.is_empty() || session_id.chars().count() > MAX_SESSION_ID_CHARS {
        return Err(ApiError::invalid_range("sessionId", 1, MAX_SESSION_ID_CHARS));
    }
    let path = validate_path(&req.path)?;
    let subject = identity.subject();

    state
        .store
        .session_touch(session_id, subject.as_ref(), path, state.now())
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/pageview", post(pageview))
        .route("/heartbeat", post(heartbeat))
}
