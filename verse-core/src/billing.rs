//! Subscription, crypto and order records shared by stores and webhooks.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identity::UserId;
use crate::tier::{SubscriptionStatus, Tier};
use crate::Timestamp;

/// Days added per confirmed crypto payment.
pub const CRYPTO_PERIOD_DAYS: i64 = 30;

/// Stripe subscription as synced into `user_subscriptions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub user_id: UserId,
    pub character_key: String,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub updated_at: Timestamp,
}

impl SubscriptionRecord {
    /// Active or trialing with a period that has not ended.
    pub fn is_effective(&self, now: Timestamp) -> bool {
        self.status.grants_access() && self.current_period_end.map_or(true, |end| end > now)
    }
}

/// Tier paid for with Coinbase Commerce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoSubscription {
    pub user_id: UserId,
    pub character_key: String,
    pub tier: Tier,
    pub expires_at: Timestamp,
}

impl CryptoSubscription {
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

/// New expiry after a confirmed payment: unexpired time is kept, lapsed
/// subscriptions restart from `now`.
pub fn extend_crypto_expiry(current: Option<Timestamp>, now: Timestamp) -> Timestamp {
    let base = match current {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    };
    base + Duration::days(CRYPTO_PERIOD_DAYS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Created,
    Pending,
    Confirmed,
    Failed,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Created => "created",
            ChargeStatus::Pending => "pending",
            ChargeStatus::Confirmed => "confirmed",
            ChargeStatus::Failed => "failed",
        }
    }

    /// Coinbase event type (`charge:confirmed`) to status.
    pub fn from_event(event_type: &str) -> Option<Self> {
        match event_type {
            "charge:created" => Some(ChargeStatus::Created),
            "charge:pending" => Some(ChargeStatus::Pending),
            "charge:confirmed" | "charge:resolved" => Some(ChargeStatus::Confirmed),
            "charge:failed" => Some(ChargeStatus::Failed),
            _ => None,
        }
    }

    /// Confirmed and failed charges never change again.
    pub fn is_final(&self) -> bool {
        matches!(self, ChargeStatus::Confirmed | ChargeStatus::Failed)
    }
}

impl FromStr for ChargeStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChargeStatus::Created),
            "pending" => Ok(ChargeStatus::Pending),
            "confirmed" => Ok(ChargeStatus::Confirmed),
            "failed" => Ok(ChargeStatus::Failed),
            other => Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("unknown charge status '{}'", other),
            }),
        }
    }
}

/// A Coinbase Commerce charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoCharge {
    pub code: String,
    pub user_id: Option<UserId>,
    pub character_key: Option<String>,
    pub status: ChargeStatus,
    pub amount_cents: Option<i64>,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Coinbase,
    Gumroad,
    VerseCoins,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Coinbase => "coinbase",
            PaymentProvider::Gumroad => "gumroad",
            PaymentProvider::VerseCoins => "versecoins",
        }
    }
}

impl FromStr for PaymentProvider {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(PaymentProvider::Stripe),
            "coinbase" => Ok(PaymentProvider::Coinbase),
            "gumroad" => Ok(PaymentProvider::Gumroad),
            "versecoins" => Ok(PaymentProvider::VerseCoins),
            other => Err(ValidationError::InvalidValue {
                field: "provider".to_string(),
                reason: format!("unknown payment provider '{}'", other),
            }),
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an order paid for. Also the `kind` metadata on Stripe payment intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Subscription,
    Tip,
    VerseCoins,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Subscription => "subscription",
            OrderKind::Tip => "tip",
            OrderKind::VerseCoins => "versecoins",
        }
    }
}

impl FromStr for OrderKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(OrderKind::Subscription),
            "tip" => Ok(OrderKind::Tip),
            "versecoins" => Ok(OrderKind::VerseCoins),
            other => Err(ValidationError::InvalidValue {
                field: "kind".to_string(),
                reason: format!("unknown order kind '{}'", other),
            }),
        }
    }
}

/// Payment record, unique per (provider, external_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub provider: PaymentProvider,
    pub external_id: String,
    pub kind: OrderKind,
    pub user_id: Option<UserId>,
    pub character_key: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: Timestamp,
}

/// A purchasable bundle of VerseCoins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CoinPack {
    pub id: String,
    pub coins: i64,
    pub amount_cents: i64,
    /// Gumroad product permalink selling this pack, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gumroad_product: Option<String>,
}

/// Packs sold when no override is configured.
pub fn default_coin_packs() -> Vec<CoinPack> {
    vec![
        CoinPack {
            id: "starter".to_string(),
            coins: 500,
            amount_cents: 499,
            gumroad_product: Some("verse-coins-500".to_string()),
        },
        CoinPack {
            id: "plus".to_string(),
            coins: 1200,
            amount_cents: 999,
            gumroad_product: Some("verse-coins-1200".to_string()),
        },
        CoinPack {
            id: "mega".to_string(),
            coins: 3000,
            amount_cents: 1999,
            gumroad_product: Some("verse-coins-3000".to_string()),
        },
    ]
}
