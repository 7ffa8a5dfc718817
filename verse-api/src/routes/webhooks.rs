//! Inbound payment and email provider webhooks.
//!
//! Every handler verifies the provider signature over the raw body before
//! parsing it, then records the event id in `webhook_events`. A replayed id is
//! acknowledged without side effects. When processing fails the id is
//! released again so the provider's retry is not mistaken for a replay.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Form, Json, Router,
};
use chrono::DateTime;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verse_core::{
    ChargeStatus, CreditOutcome, CryptoCharge, Order, OrderKind, PaymentProvider, SubscriptionRecord,
    SubscriptionStatus, Tier, TipStatus, UserId,
};

use crate::error::{ApiError, ApiResult};
use crate::notify::AdminEvent;
use crate::signature::{verify_coinbase, verify_stripe, verify_svix, SvixHeaders};
use crate::state::AppState;
use crate::store::WebhookProvider;
use crate::telemetry::metrics;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const COINBASE_SIGNATURE_HEADER: &str = "x-cc-webhook-signature";

// ============================================================================
// SHARED
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WebhookAck {
    pub received: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

impl WebhookAck {
    fn processed() -> Json<Self> {
        Json(Self {
            received: true,
            duplicate: false,
        })
    }

    fn duplicate() -> Json<Self> {
        Json(Self {
            received: true,
            duplicate: true,
        })
    }
}

fn record_outcome(provider: WebhookProvider, outcome: &str) {
    if let Some(m) = metrics() {
        m.record_webhook(provider.as_str(), outcome);
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn require_secret<'a, T>(secret: Option<&'a T>, provider: WebhookProvider) -> ApiResult<&'a T> {
    secret.ok_or_else(|| {
        tracing::error!(provider = provider.as_str(), "Webhook received but not configured");
        ApiError::service_unavailable(format!("{} webhooks are not configured", provider.as_str()))
    })
}

fn reject(provider: WebhookProvider, err: impl Into<ApiError>) -> ApiError {
    let err = err.into();
    tracing::warn!(provider = provider.as_str(), error = %err, "Rejected webhook");
    record_outcome(provider, "rejected");
    err
}

/// Record the event. `false` means it was already processed.
async fn begin(
    state: &AppState,
    provider: WebhookProvider,
    event_id: &str,
    event_type: &str,
) -> ApiResult<bool> {
    let fresh = state
        .store
        .webhook_event_record(provider, event_id, event_type, state.now())
        .await?;
    if !fresh {
        tracing::info!(provider = provider.as_str(), event_id, "Ignoring replayed webhook");
        record_outcome(provider, "duplicate");
    }
    Ok(fresh)
}

async fn finish(
    state: &AppState,
    provider: WebhookProvider,
    event_id: &str,
    result: ApiResult<()>,
) -> ApiResult<Json<WebhookAck>> {
    match result {
        Ok(()) => {
            record_outcome(provider, "processed");
            Ok(WebhookAck::processed())
        }
        Err(err) => {
            tracing::error!(provider = provider.as_str(), event_id, error = %err, "Webhook processing failed");
            if let Err(release) = state.store.webhook_event_release(provider, event_id).await {
                tracing::error!(provider = provider.as_str(), event_id, error = %release, "Could not release webhook event");
            }
            record_outcome(provider, "failed");
            Err(err)
        }
    }
}

fn metadata_user(metadata: &HashMap<String, String>) -> Option<UserId> {
    metadata
        .get("user_id")
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
}

fn metadata_tier(metadata: &HashMap<String, String>) -> Tier {
    metadata
        .get("tier")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(Tier::Premium)
}

/// Parse a decimal money amount ("9.99") into cents. Extra fraction digits
/// are truncated.
pub(crate) fn parse_cents(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac: String = frac.chars().take(2).collect();
    while frac.len() < 2 {
        frac.push('0');
    }
    let frac: i64 = frac.parse().ok()?;
    whole.checked_mul(100)?.checked_add(frac)
}

// ============================================================================
// STRIPE
// ============================================================================

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    status: String,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    amount: i64,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn default_currency() -> String {
    "usd".to_string()
}

/// POST /api/webhooks/stripe
#[utoipa::path(
    post,
    path = "/api/webhooks/stripe",
    tag = "Webhooks",
    request_body(content = String, description = "Raw Stripe event JSON"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 401, description = "Bad signature", body = ApiError),
        (status = 503, description = "Stripe webhooks not configured", body = ApiError),
    ),
)]
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let provider = WebhookProvider::Stripe;
    let secret = require_secret(state.services.stripe_webhook_secret.as_ref(), provider)?;
    verify_stripe(
        &body,
        header(&headers, STRIPE_SIGNATURE_HEADER),
        secret.expose_secret(),
        state.now().timestamp(),
        state.services.webhook_tolerance_secs,
    )
    .map_err(|e| reject(provider, e))?;

    let event: StripeEvent = serde_json::from_slice(&body).map_err(|e| reject(provider, e))?;
    if !begin(&state, provider, &event.id, &event.event_type).await? {
        return Ok(WebhookAck::duplicate());
    }

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe event");
    let result = handle_stripe(&state, &event).await;
    finish(&state, provider, &event.id, result).await
}

async fn handle_stripe(state: &AppState, event: &StripeEvent) -> ApiResult<()> {
    match event.event_type.as_str() {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            let sub: StripeSubscription = serde_json::from_value(event.data.object.clone())?;
            stripe_subscription(state, &event.event_type, sub).await
        }
        "payment_intent.succeeded" => {
            let intent: StripePaymentIntent = serde_json::from_value(event.data.object.clone())?;
            stripe_payment_succeeded(state, intent).await
        }
        "payment_intent.payment_failed" => {
            let intent: StripePaymentIntent = serde_json::from_value(event.data.object.clone())?;
            if intent.metadata.get("kind").map(String::as_str) == Some(OrderKind::Tip.as_str()) {
                if let Some(tip) = state.store.tip_settle(&intent.id, TipStatus::Failed).await? {
                    tracing::info!(tip_id = %tip.id, "Card tip failed");
                }
            }
            Ok(())
        }
        other => {
            tracing::debug!(event_type = other, "Unhandled Stripe event");
            Ok(())
        }
    }
}

async fn stripe_subscription(
    state: &AppState,
    event_type: &str,
    sub: StripeSubscription,
) -> ApiResult<()> {
    let Some(user_id) = metadata_user(&sub.metadata) else {
        tracing::warn!(subscription = %sub.id, "Stripe subscription without user_id metadata");
        return Ok(());
    };
    let character_key = sub
        .metadata
        .get("character_key")
        .cloned()
        .unwrap_or_else(|| state.services.catalog.default_character().key.clone());

    let status = if event_type == "customer.subscription.deleted" {
        SubscriptionStatus::Canceled
    } else {
        sub.status.parse::<SubscriptionStatus>()?
    };

    let record = SubscriptionRecord {
        user_id,
        character_key,
        tier: metadata_tier(&sub.metadata),
        status,
        current_period_end: sub
            .current_period_end
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        stripe_customer_id: sub.customer,
        stripe_subscription_id: Some(sub.id),
        updated_at: state.now(),
    };
    state.store.subscription_upsert(&record).await?;

    tracing::info!(
        user_id = %user_id,
        character = %record.character_key,
        status = record.status.as_str(),
        "Subscription synced"
    );
    if event_type == "customer.subscription.created" && record.status.grants_access() {
        state.notifier.notify(AdminEvent::SubscriptionStarted {
            user_id,
            character_key: record.character_key,
            tier: record.tier,
            provider: PaymentProvider::Stripe.as_str(),
        });
    }
    Ok(())
}

async fn stripe_payment_succeeded(state: &AppState, intent: StripePaymentIntent) -> ApiResult<()> {
    let kind = intent
        .metadata
        .get("kind")
        .and_then(|k| k.parse::<OrderKind>().ok());

    match kind {
        Some(OrderKind::Tip) => {
            let Some(tip) = state.store.tip_settle(&intent.id, TipStatus::Succeeded).await? else {
                tracing::debug!(payment_intent = %intent.id, "No tip for payment intent");
                return Ok(());
            };
            // The order insert is the once-only step: a retry after a failed
            // insert gets here again with the tip already settled.
            let order = Order {
                id: Uuid::new_v4(),
                provider: PaymentProvider::Stripe,
                external_id: intent.id.clone(),
                kind: OrderKind::Tip,
                user_id: tip.subject.user_id(),
                character_key: Some(tip.character_key.clone()),
                amount_cents: intent.amount,
                currency: intent.currency,
                created_at: state.now(),
            };
            if !state.store.order_record(&order).await? {
                tracing::debug!(tip_id = %tip.id, "Tip order already recorded");
                return Ok(());
            }
            tracing::info!(tip_id = %tip.id, "Card tip succeeded");
            state.notifier.notify(AdminEvent::TipSucceeded {
                character_key: tip.character_key,
                amount_cents: tip.amount_cents,
                message: tip.message,
            });
            Ok(())
        }
        Some(OrderKind::VerseCoins) => {
            let Some(user_id) = metadata_user(&intent.metadata) else {
                tracing::warn!(payment_intent = %intent.id, "Coin purchase without user_id metadata");
                return Ok(());
            };
            let coins = intent
                .metadata
                .get("coins")
                .and_then(|c| c.parse::<i64>().ok())
                .or_else(|| {
                    intent
                        .metadata
                        .get("pack_id")
                        .and_then(|id| state.services.coin_pack(id))
                        .map(|p| p.coins)
                })
                .ok_or_else(|| ApiError::invalid_input("Coin purchase carries no coin amount"))?;

            let reference = format!("stripe:{}", intent.id);
            let outcome = state
                .store
                .wallet_credit(user_id, coins, "purchase", Some(&reference), state.now())
                .await?;
            let order = Order {
                id: Uuid::new_v4(),
                provider: PaymentProvider::Stripe,
                external_id: intent.id.clone(),
                kind: OrderKind::VerseCoins,
                user_id: Some(user_id),
                character_key: None,
                amount_cents: intent.amount,
                currency: intent.currency,
                created_at: state.now(),
            };
            state.store.order_record(&order).await?;
            tracing::info!(
                user_id = %user_id,
                coins,
                balance = outcome.entry().balance_after,
                "VerseCoins purchased"
            );
            Ok(())
        }
        Some(OrderKind::Subscription) | None => {
            tracing::debug!(payment_intent = %intent.id, "Payment intent needs no action");
            Ok(())
        }
    }
}

// ============================================================================
// COINBASE COMMERCE
// ============================================================================

#[derive(Debug, Deserialize)]
struct CoinbaseDelivery {
    event: CoinbaseEvent,
}

#[derive(Debug, Deserialize)]
struct CoinbaseEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: CoinbaseCharge,
}

#[derive(Debug, Deserialize)]
struct CoinbaseCharge {
    code: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    pricing: Option<CoinbasePricing>,
}

#[derive(Debug, Deserialize)]
struct CoinbasePricing {
    local: CoinbaseMoney,
}

#[derive(Debug, Deserialize)]
struct CoinbaseMoney {
    amount: String,
    currency: String,
}

/// POST /api/webhooks/coinbase
#[utoipa::path(
    post,
    path = "/api/webhooks/coinbase",
    tag = "Webhooks",
    request_body(content = String, description = "Raw Coinbase Commerce event JSON"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 401, description = "Bad signature", body = ApiError),
        (status = 503, description = "Coinbase webhooks not configured", body = ApiError),
    ),
)]
pub async fn coinbase(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let provider = WebhookProvider::Coinbase;
    let secret = require_secret(state.services.coinbase_webhook_secret.as_ref(), provider)?;
    verify_coinbase(
        &body,
        header(&headers, COINBASE_SIGNATURE_HEADER),
        secret.expose_secret(),
    )
    .map_err(|e| reject(provider, e))?;

    let delivery: CoinbaseDelivery =
        serde_json::from_slice(&body).map_err(|e| reject(provider, e))?;
    let event = delivery.event;
    if !begin(&state, provider, &event.id, &event.event_type).await? {
        return Ok(WebhookAck::duplicate());
    }

    tracing::info!(event_id = %event.id, event_type = %event.event_type, charge = %event.data.code, "Coinbase event");
    let result = handle_coinbase(&state, &event).await;
    finish(&state, provider, &event.id, result).await
}

async fn handle_coinbase(state: &AppState, event: &CoinbaseEvent) -> ApiResult<()> {
    let Some(status) = ChargeStatus::from_event(&event.event_type) else {
        tracing::debug!(event_type = %event.event_type, "Unhandled Coinbase event");
        return Ok(());
    };
    let data = &event.data;
    let user_id = metadata_user(&data.metadata);
    let character_key = data.metadata.get("character_key").cloned();
    let amount_cents = data
        .pricing
        .as_ref()
        .and_then(|p| parse_cents(&p.local.amount));

    let charge = CryptoCharge {
        code: data.code.clone(),
        user_id,
        character_key: character_key.clone(),
        status,
        amount_cents,
        updated_at: state.now(),
    };
    let previous = state.store.crypto_charge_upsert(&charge).await?;
    if status != ChargeStatus::Confirmed {
        return Ok(());
    }
    if previous == Some(ChargeStatus::Failed) {
        tracing::warn!(charge = %data.code, "Confirmation for a charge that already failed");
        return Ok(());
    }
    let Some(user_id) = user_id else {
        tracing::warn!(charge = %data.code, "Confirmed charge without user_id metadata");
        return Ok(());
    };

    // Every step below is keyed on the charge code, so a retry after a
    // partial failure completes the grant without repeating it.
    let is_coin_purchase =
        data.metadata.get("kind").map(String::as_str) == Some(OrderKind::VerseCoins.as_str());
    let (kind, started) = if is_coin_purchase {
        let pack = data
            .metadata
            .get("pack_id")
            .and_then(|id| state.services.coin_pack(id))
            .ok_or_else(|| ApiError::invalid_input("Coinbase charge names no known coin pack"))?;
        let reference = format!("coinbase:{}", data.code);
        let outcome = state
            .store
            .wallet_credit(user_id, pack.coins, "purchase", Some(&reference), state.now())
            .await?;
        if matches!(outcome, CreditOutcome::Credited(_)) {
            tracing::info!(user_id = %user_id, coins = pack.coins, "VerseCoins purchased with crypto");
        }
        (OrderKind::VerseCoins, None)
    } else {
        let character_key = character_key
            .clone()
            .unwrap_or_else(|| state.services.catalog.default_character().key.clone());
        let tier = metadata_tier(&data.metadata);
        match state
            .store
            .crypto_subscription_extend(user_id, &character_key, tier, &data.code, state.now())
            .await?
        {
            Some(sub) => tracing::info!(
                user_id = %user_id,
                character = %character_key,
                expires_at = %sub.expires_at,
                "Crypto subscription extended"
            ),
            None => tracing::debug!(charge = %data.code, "Charge already applied"),
        }
        (OrderKind::Subscription, Some((character_key, tier)))
    };

    let order = Order {
        id: Uuid::new_v4(),
        provider: PaymentProvider::Coinbase,
        external_id: data.code.clone(),
        kind,
        user_id: Some(user_id),
        character_key,
        amount_cents: amount_cents.unwrap_or(0),
        currency: data
            .pricing
            .as_ref()
            .map(|p| p.local.currency.to_lowercase())
            .unwrap_or_else(default_currency),
        created_at: state.now(),
    };
    let first_time = state.store.order_record(&order).await?;
    if let (true, Some((character_key, tier))) = (first_time, started) {
        state.notifier.notify(AdminEvent::SubscriptionStarted {
            user_id,
            character_key,
            tier,
            provider: PaymentProvider::Coinbase.as_str(),
        });
    }
    Ok(())
}

// ============================================================================
// RESEND (SVIX)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ResendEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: ResendEmail,
}

#[derive(Debug, Default, Deserialize)]
struct ResendEmail {
    #[serde(default)]
    to: Recipients,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Default for Recipients {
    fn default() -> Self {
        Recipients::Many(Vec::new())
    }
}

impl Recipients {
    fn into_vec(self) -> Vec<String> {
        match self {
            Recipients::One(addr) => vec![addr],
            Recipients::Many(addrs) => addrs,
        }
    }
}

/// POST /api/webhooks/resend
#[utoipa::path(
    post,
    path = "/api/webhooks/resend",
    tag = "Webhooks",
    request_body(content = String, description = "Raw Resend event JSON"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 401, description = "Bad signature", body = ApiError),
        (status = 503, description = "Resend webhooks not configured", body = ApiError),
    ),
)]
pub async fn resend(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let provider = WebhookProvider::Resend;
    let secret = require_secret(state.services.resend_webhook_secret.as_ref(), provider)?;
    let svix = SvixHeaders {
        id: header(&headers, "svix-id"),
        timestamp: header(&headers, "svix-timestamp"),
        signature: header(&headers, "svix-signature"),
    };
    verify_svix(
        &body,
        svix,
        secret.expose_secret(),
        state.now().timestamp(),
        state.services.webhook_tolerance_secs,
    )
    .map_err(|e| reject(provider, e))?;

    // Verified above, so the id is present.
    let event_id = svix.id.unwrap_or_default().to_string();
    let event: ResendEvent = serde_json::from_slice(&body).map_err(|e| reject(provider, e))?;
    if !begin(&state, provider, &event_id, &event.event_type).await? {
        return Ok(WebhookAck::duplicate());
    }

    let result = handle_resend(&state, event).await;
    finish(&state, provider, &event_id, result).await
}

async fn handle_resend(state: &AppState, event: ResendEvent) -> ApiResult<()> {
    let reason = match event.event_type.as_str() {
        "email.bounced" => "bounced",
        "email.complained" => "complained",
        other => {
            tracing::debug!(event_type = other, "Unhandled Resend event");
            return Ok(());
        }
    };
    for address in event.data.to.into_vec() {
        let address = address.trim();
        if address.is_empty() {
            continue;
        }
        let newly = state
            .store
            .email_unsubscribe(address, reason, state.now())
            .await?;
        tracing::info!(reason, newly, "Suppressed email address");
    }
    Ok(())
}

// ============================================================================
// GUMROAD
// ============================================================================

/// POST /api/webhooks/gumroad
///
/// Gumroad pings are form-encoded and unsigned; only the configured seller is
/// trusted.
#[utoipa::path(
    post,
    path = "/api/webhooks/gumroad",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/x-www-form-urlencoded", description = "Gumroad sale ping"),
    responses(
        (status = 200, description = "Ping accepted", body = WebhookAck),
        (status = 400, description = "Missing sale id", body = ApiError),
        (status = 403, description = "Unknown seller", body = ApiError),
        (status = 503, description = "Gumroad not configured", body = ApiError),
    ),
)]
pub async fn gumroad(
    State(state): State<AppState>,
    Form(ping): Form<HashMap<String, String>>,
) -> ApiResult<Json<WebhookAck>> {
    let provider = WebhookProvider::Gumroad;
    let seller_id = require_secret(state.services.gumroad_seller_id.as_ref(), provider)?;
    let seller_matches = ping
        .get("seller_id")
        .map_or(false, |s| crate::signature::constant_time_eq(seller_id.as_bytes(), s.as_bytes()));
    if !seller_matches {
        return Err(reject(provider, ApiError::forbidden("Unknown Gumroad seller")));
    }

    let sale_id = ping
        .get("sale_id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| reject(provider, ApiError::missing_field("sale_id")))?
        .to_string();
    if !begin(&state, provider, &sale_id, "sale").await? {
        return Ok(WebhookAck::duplicate());
    }

    let result = handle_gumroad(&state, &sale_id, &ping).await;
    finish(&state, provider, &sale_id, result).await
}

async fn handle_gumroad(
    state: &AppState,
    sale_id: &str,
    ping: &HashMap<String, String>,
) -> ApiResult<()> {
    if ping.get("refunded").map(String::as_str) == Some("true") {
        tracing::info!(sale_id, "Ignoring refunded Gumroad sale");
        return Ok(());
    }
    let Some(pack) = ping
        .get("product_permalink")
        .and_then(|p| state.services.coin_pack_for_gumroad(p.trim()))
    else {
        tracing::debug!(sale_id, "Gumroad sale for a product that is not a coin pack");
        return Ok(());
    };
    let Some(user_id) = ping
        .get("url_params[user_id]")
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    else {
        tracing::warn!(sale_id, "Gumroad sale without a user_id url parameter");
        return Ok(());
    };

    let reference = format!("gumroad:{}", sale_id);
    state
        .store
        .wallet_credit(user_id, pack.coins, "purchase", Some(&reference), state.now())
        .await?;

    let order = Order {
        id: Uuid::new_v4(),
        provider: PaymentProvider::Gumroad,
        external_id: sale_id.to_string(),
        kind: OrderKind::VerseCoins,
        user_id: Some(user_id),
        character_key: None,
        amount_cents: ping
            .get("price")
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(pack.amount_cents),
        currency: ping
            .get("currency")
            .map(|c| c.to_lowercase())
            .unwrap_or_else(default_currency),
        created_at: state.now(),
    };
    state.store.order_record(&order).await?;
    tracing::info!(user_id = %user_id, coins = pack.coins, sale_id, "VerseCoins purchased on Gumroad");
    Ok(())
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/stripe", post(stripe))
        .route("/coinbase", post(coinbase))
        .route("/resend", post(resend))
        .route("/gumroad", post(gumroad))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("9.99"), Some(999));
        assert_eq!(parse_cents("10"), Some(1000));
        assert_eq!(parse_cents("0.5"), Some(50));
        assert_eq!(parse_cents("4.999"), Some(499));
        assert_eq!(parse_cents(".25"), Some(25));
        assert_eq!(parse_cents(""), None);
        assert_eq!(parse_cents("-1.00"), None);
        assert_eq!(parse_cents("abc"), None);
    }

    #[test]
    fn test_resend_recipients_accept_string_or_list() {
        let one: ResendEvent =
            serde_json::from_str(r#"{"type":"email.bounced","data":{"to":"a@b.co"}}"#).unwrap();
        assert_eq!(one.data.to.into_vec(), vec!["a@b.co".to_string()]);

        let many: ResendEvent = serde_json::from_str(
            r#"{"type":"email.complained","data":{"to":["a@b.co","c@d.co"]}}"#,
        )
        .unwrap();
        assert_eq!(many.data.to.into_vec().len(), 2);
    }

    #[test]
    fn test_metadata_tier_defaults_to_premium() {
        let mut metadata = HashMap::new();
        assert_eq!(metadata_tier(&metadata), Tier::Premium);
        metadata.insert("tier".to_string(), "vip".to_string());
        assert_eq!(metadata_tier(&metadata), Tier::Vip);
    }

    #[test]
    fn test_ack_hides_duplicate_flag_when_false() {
        let json = serde_json::to_value(WebhookAck::processed().0).unwrap();
        assert_eq!(json, serde_json::json!({"received": true}));
        let json = serde_json::to_value(WebhookAck::duplicate().0).unwrap();
        assert_eq!(json, serde_json::json!({"received": true, "duplicate": true}));
    }
}
