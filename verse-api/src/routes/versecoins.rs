//! VerseCoin wallet: balance, debits and pack purchases.
//!
//! Coins are only ever credited by payment webhooks; purchase just opens a
//! Stripe payment intent tagged `kind=versecoins`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verse_core::{validate_amount, DebitOutcome, LedgerEntry, OrderKind, UserId};

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::middleware::RequireUser;
use crate::payments::PaymentIntentRequest;
use crate::state::AppState;
use crate::telemetry::metrics;

const RECENT_ENTRIES: usize = 20;
const MAX_REASON_CHARS: usize = 200;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: i64,
    pub recent: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct DebitRequest {
    pub amount: i64,
    pub reason: String,
    /// Repeating a key returns the original result without a second debit.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct DebitResponse {
    pub success: bool,
    /// Balance right after this debit.
    pub balance: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entry_id: Uuid,
    pub replayed: bool,
}

/// 402 body for a debit the balance cannot cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct InsufficientFundsResponse {
    pub error: String,
    pub code: ErrorCode,
    pub balance: i64,
    pub requested: i64,
}

impl InsufficientFundsResponse {
    pub fn new(balance: i64, requested: i64) -> Self {
        Self {
            error: ErrorCode::InsufficientFunds.default_message().to_string(),
            code: ErrorCode::InsufficientFunds,
            balance,
            requested,
        }
    }
}

impl IntoResponse for InsufficientFundsResponse {
    fn into_response(self) -> Response {
        (StatusCode::PAYMENT_REQUIRED, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub pack_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub pack_id: String,
    pub coins: i64,
    pub amount_cents: i64,
}

// ============================================================================
// SHARED DEBIT PATH
// ============================================================================

/// Debit through the store and record the outcome metric.
///
/// `Err(response)` carries the 402 body when the balance is short.
pub(crate) async fn debit_coins(
    state: &AppState,
    user_id: UserId,
    amount: i64,
    reason: &str,
    reference: Option<&str>,
) -> ApiResult<Result<(LedgerEntry, bool), InsufficientFundsResponse>> {
    let amount = validate_amount(amount)?;
    let outcome = state
        .store
        .wallet_debit(user_id, amount, reason, reference, state.now())
        .await?;

    let (label, result) = match outcome {
        DebitOutcome::Debited(entry) => ("debited", Ok((entry, false))),
        DebitOutcome::Replayed(entry) => ("replayed", Ok((entry, true))),
        DebitOutcome::Insufficient { balance } => (
            "insufficient",
            Err(InsufficientFundsResponse::new(balance, amount)),
        ),
    };
    if let Some(m) = metrics() {
        m.record_debit(label);
    }
    Ok(result)
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/versecoins/balance
#[utoipa::path(
    get,
    path = "/api/versecoins/balance",
    tag = "VerseCoins",
    responses(
        (status = 200, description = "Balance and recent ledger entries", body = BalanceResponse),
        (status = 401, description = "Not signed in", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn balance(
    State(state): State<AppState>,
    user: RequireUser,
) -> ApiResult<Json<BalanceResponse>> {
    let (balance, recent) = tokio::try_join!(
        state.store.wallet_balance(user.user_id),
        state.store.ledger_recent(user.user_id, RECENT_ENTRIES),
    )?;
    Ok(Json(BalanceResponse { balance, recent }))
}

/// POST /api/versecoins/debit
#[utoipa::path(
    post,
    path = "/api/versecoins/debit",
    tag = "VerseCoins",
    request_body = DebitRequest,
    responses(
        (status = 200, description = "Debited (or replayed)", body = DebitResponse),
        (status = 400, description = "Invalid amount or reason", body = ApiError),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 402, description = "Balance too low", body = InsufficientFundsResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn debit(
    State(state): State<AppState>,
    user: RequireUser,
    Json(req): Json<DebitRequest>,
) -> ApiResult<Response> {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::missing_field("reason"));
    }
    if reason.chars().count() > MAX_REASON_CHARS {
        return Err(ApiError::invalid_input(format!(
            "reason must be at most {} characters",
            MAX_REASON_CHARS
        )));
    }
    // Client keys live in their own namespace so they can never match a
    // provider credit reference.
    let reference = req
        .idempotency_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| format!("debit:{}", k));

    match debit_coins(&state, user.user_id, req.amount, reason, reference.as_deref()).await? {
        Ok((entry, replayed)) => Ok(Json(DebitResponse {
            success: true,
            balance: entry.balance_after,
            entry_id: entry.id,
            replayed,
        })
        .into_response()),
        Err(insufficient) => Ok(insufficient.into_response()),
    }
}

/// POST /api/versecoins/purchase
#[utoipa::path(
    post,
    path = "/api/versecoins/purchase",
    tag = "VerseCoins",
    request_body = PurchaseRequest,
    responses(
        (status = 200, description = "Payment intent created", body = PurchaseResponse),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 404, description = "Unknown pack", body = ApiError),
        (status = 502, description = "Stripe request failed", body = ApiError),
        (status = 503, description = "Payments not configured", body = ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn purchase(
    State(state): State<AppState>,
    user: RequireUser,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<Json<PurchaseResponse>> {
    let pack = state
        .services
        .coin_pack(&req.pack_id)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("Coin pack '{}' not found", req.pack_id)))?;

    let request = PaymentIntentRequest::new(OrderKind::VerseCoins, pack.amount_cents)
        .with_metadata("user_id", user.user_id)
        .with_metadata("pack_id", &pack.id)
        .with_metadata("coins", pack.coins)
        .with_description(format!("{} VerseCoins", pack.coins));
    let intent = state.payments.create_payment_intent(&request).await?;

    tracing::info!(
        user_id = %user.user_id,
        pack_id = %pack.id,
        payment_intent = %intent.id,
        "VerseCoin purchase started"
    );

    Ok(Json(PurchaseResponse {
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
        pack_id: pack.id,
        coins: pack.coins,
        amount_cents: pack.amount_cents,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/balance", get(balance))
        .route("/debit", post(debit))
        .route("/purchase", post(purchase))
}
