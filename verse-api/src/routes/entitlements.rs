//! Entitlements: one capability object merged from the Stripe subscription,
//! crypto subscription, founder seat and VerseCoin balance.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use verse_core::{
    resolve_entitlements, Character, EntitlementInputs, Entitlements, SubjectKey,
};

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireSubject;
use crate::routes::resolve_character;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[serde(rename_all = "camelCase")]
pub struct CharacterQuery {
    /// Character key; defaults to the character serving the request host.
    pub character_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct EntitlementsResponse {
    pub user_id: String,
    pub character_key: String,
    #[serde(flatten)]
    pub entitlements: Entitlements,
}

/// Merge everything known about `subject` for `character`.
///
/// Anonymous subjects never touch the store: they always get the anonymous
/// free shape.
pub(crate) async fn load_entitlements(
    state: &AppState,
    subject: &SubjectKey,
    character: &Character,
) -> ApiResult<Entitlements> {
    let now = state.now();
    let inputs = match subject {
        SubjectKey::Anonymous(_) => EntitlementInputs {
            anonymous: true,
            ..EntitlementInputs::default()
        },
        SubjectKey::User(user_id) => {
            let store = &state.store;
            let (subscription, crypto, founder, voice_balance) = tokio::try_join!(
                store.subscription_get(*user_id, &character.key),
                store.crypto_subscription_get(*user_id, &character.key),
                store.founder_get(*user_id, &character.key),
                store.wallet_balance(*user_id),
            )?;
            EntitlementInputs {
                anonymous: false,
                subscription,
                crypto,
                founder,
                voice_balance,
            }
        }
    };
    Ok(resolve_entitlements(&inputs, character, &state.services.quota, now))
}

/// GET /api/entitlements
#[utoipa::path(
    get,
    path = "/api/entitlements",
    tag = "Entitlements",
    params(CharacterQuery),
    responses(
        (status = 200, description = "Merged entitlements", body = EntitlementsResponse),
        (status = 401, description = "No user or anonymous id", body = ApiError),
        (status = 404, description = "Unknown character", body = ApiError),
    ),
)]
pub async fn get_entitlements(
    State(state): State<AppState>,
    RequireSubject { identity, subject }: RequireSubject,
    headers: HeaderMap,
    Query(query): Query<CharacterQuery>,
) -> ApiResult<Json<EntitlementsResponse>> {
    let character = resolve_character(&state.services, query.character_key.as_deref(), &headers)?;
    let entitlements = load_entitlements(&state, &subject, &character).await?;

    Ok(Json(EntitlementsResponse {
        user_id: identity.display_id().unwrap_or_else(|| subject.to_string()),
        character_key: character.key,
        entitlements,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(get_entitlements))
}
