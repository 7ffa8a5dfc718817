//! Tips to characters, paid by card (Stripe) or with VerseCoins.
//!
//! Card tips start `pending` and settle through the Stripe webhook. Coin
//! tips (1 coin = 1 cent) settle immediately.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verse_core::{Order, OrderKind, PaymentProvider, SubjectKey, Tip, TipStatus};

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireSubject;
use crate::notify::AdminEvent;
use crate::payments::PaymentIntentRequest;
use crate::routes::versecoins::{debit_coins, InsufficientFundsResponse};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum PayWith {
    #[default]
    Card,
    VerseCoins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CreateTipRequest {
    pub character_key: String,
    /// Cents.
    pub amount: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub pay_with: PayWith,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CreateTipResponse {
    /// Stripe client secret; `null` for coin tips.
    pub client_secret: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub tip_id: Uuid,
    pub amount: i64,
    pub character_key: String,
    pub status: TipStatus,
}

/// POST /api/tips/create
#[utoipa::path(
    post,
    path = "/api/tips/create",
    tag = "Tips",
    request_body = CreateTipRequest,
    responses(
        (status = 200, description = "Tip created", body = CreateTipResponse),
        (status = 400, description = "Amount or message out of bounds", body = ApiError),
        (status = 401, description = "Not identified (or coin tip while signed out)", body = ApiError),
        (status = 402, description = "Not enough VerseCoins", body = InsufficientFundsResponse),
        (status = 404, description = "Unknown character", body = ApiError),
        (status = 502, description = "Stripe request failed", body = ApiError),
    ),
)]
pub async fn create_tip(
    State(state): State<AppState>,
    RequireSubject { subject, .. }: RequireSubject,
    Json(req): Json<CreateTipRequest>,
) -> ApiResult<Response> {
    let character = state
        .services
        .catalog
        .get(req.character_key.trim())
        .cloned()
        .ok_or_else(|| ApiError::character_not_found(&req.character_key))?;
    let message = state.services.tips.validate(req.amount, req.message.as_deref())?;

    let tip = Tip {
        id: Uuid::new_v4(),
        subject,
        character_key: character.key,
        amount_cents: req.amount,
        message,
        status: TipStatus::Pending,
        payment_intent_id: None,
        created_at: state.now(),
    };

    match req.pay_with {
        PayWith::Card => tip_by_card(&state, tip).await,
        PayWith::VerseCoins => tip_with_coins(&state, tip).await,
    }
}

async fn tip_by_card(state: &AppState, mut tip: Tip) -> ApiResult<Response> {
    let mut request = PaymentIntentRequest::new(OrderKind::Tip, tip.amount_cents)
        .with_metadata("tip_id", tip.id)
        .with_metadata("character_key", &tip.character_key)
        .with_metadata("subject", &tip.subject)
        .with_description(format!("Tip for {}", tip.character_key));
    request.idempotency_key = Some(format!("tip-{}", tip.id));

    let intent = state.payments.create_payment_intent(&request).await?;
    tip.payment_intent_id = Some(intent.id);
    state.store.tip_insert(&tip).await?;

    tracing::info!(tip_id = %tip.id, character = %tip.character_key, "Card tip created");

    Ok(Json(CreateTipResponse {
        client_secret: Some(intent.client_secret),
        tip_id: tip.id,
        amount: tip.amount_cents,
        character_key: tip.character_key,
        status: tip.status,
    })
    .into_response())
}

async fn tip_with_coins(state: &AppState, mut tip: Tip) -> ApiResult<Response> {
    let user_id = match &tip.subject {
        SubjectKey::User(user_id) => *user_id,
        SubjectKey::Anonymous(_) => {
            return Err(ApiError::unauthorized("Sign in to tip with VerseCoins"))
        }
    };
    let reference = format!("tip:{}", tip.id);

    let debited = debit_coins(state, user_id, tip.amount_cents, "tip", Some(&reference)).await?;
    if let Err(insufficient) = debited {
        return Ok(insufficient.into_response());
    }

    tip.status = TipStatus::Succeeded;
    if let Err(e) = state.store.tip_insert(&tip).await {
        tracing::error!(tip_id = %tip.id, error = %e, "Refunding coin tip that could not be stored");
        let refund_reference = format!("tip-refund:{}", tip.id);
        state
            .store
            .wallet_credit(user_id, tip.amount_cents, "tip refund", Some(&refund_reference), state.now())
            .await?;
        return Err(e);
    }

    let order = Order {
        id: Uuid::new_v4(),
        provider: PaymentProvider::VerseCoins,
        external_id: tip.id.to_string(),
        kind: OrderKind::Tip,
        user_id: Some(user_id),
        character_key: Some(tip.character_key.clone()),
        amount_cents: tip.amount_cents,
        currency: "vcn".to_string(),
        created_at: tip.created_at,
    };
    state.store.order_record(&order).await?;

    state.notifier.notify(AdminEvent::TipSucceeded {
        character_key: tip.character_key.clone(),
        amount_cents: tip.amount_cents,
        message: tip.message.clone(),
    });
    tracing::info!(tip_id = %tip.id, user_id = %user_id, "Coin tip settled");

    Ok(Json(CreateTipResponse {
        client_secret: None,
        tip_id: tip.id,
        amount: tip.amount_cents,
        character_key: tip.character_key,
        status: tip.status,
    })
    .into_response())
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/create", post(create_tip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pay_with_defaults_to_card() {
        let req: CreateTipRequest =
            serde_json::from_str(r#"{"characterKey":"lexi","amount":500}"#).unwrap();
        assert_eq!(req.pay_with, PayWith::Card);

        let req: CreateTipRequest = serde_json::from_str(
            r#"{"characterKey":"lexi","amount":500,"payWith":"versecoins"}"#,
        )
        .unwrap();
        assert_eq!(req.pay_with, PayWith::VerseCoins);
    }
}
