//! Entitlement merge.
//!
//! Combines the Stripe subscription, crypto subscription, founder seat and
//! VerseCoin balance of one user into the capabilities a client may use.
//!
//! Precedence:
//! 1. An unexpired crypto subscription.
//! 2. A Stripe subscription that is active or trialing and whose period has
//!    not ended.
//! 3. Free.
//!
//! A founder seat replaces the catalog premium price with the locked price.

use serde::{Deserialize, Serialize};

use crate::billing::{CryptoSubscription, SubscriptionRecord};
use crate::character::Character;
use crate::founders::FounderSeat;
use crate::quota::QuotaPolicy;
use crate::tier::{EntitlementSource, Tier};
use crate::Timestamp;

/// Everything the merge looks at.
#[derive(Debug, Clone, Default)]
pub struct EntitlementInputs {
    pub anonymous: bool,
    pub subscription: Option<SubscriptionRecord>,
    pub crypto: Option<CryptoSubscription>,
    pub founder: Option<FounderSeat>,
    pub voice_balance: i64,
}

/// Merged capabilities for one subject and character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    pub tier: Tier,
    pub source: EntitlementSource,
    /// Messages per day; `null` when unlimited.
    pub chat_quota: Option<u32>,
    pub nsfw_access: bool,
    pub voice_access: bool,
    pub voice_credits: i64,
    /// Monthly price the subject pays (or would pay) for premium.
    pub price_cents: i64,
    pub founder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub expires_at: Option<Timestamp>,
}

pub fn resolve_entitlements(
    inputs: &EntitlementInputs,
    character: &Character,
    policy: &QuotaPolicy,
    now: Timestamp,
) -> Entitlements {
    let crypto = inputs.crypto.as_ref().filter(|c| c.is_active(now));
    let stripe = inputs.subscription.as_ref().filter(|s| s.is_effective(now));

    let (tier, source, expires_at) = if inputs.anonymous {
        (Tier::Free, EntitlementSource::None, None)
    } else if let Some(c) = crypto {
        (c.tier, EntitlementSource::Crypto, Some(c.expires_at))
    } else if let Some(s) = stripe {
        (s.tier, EntitlementSource::Stripe, s.current_period_end)
    } else {
        (Tier::Free, EntitlementSource::None, None)
    };

    let voice_credits = if inputs.anonymous {
        0
    } else {
        inputs.voice_balance.max(0)
    };

    let founder = !inputs.anonymous && inputs.founder.is_some();
    let price_cents = match inputs.founder.as_ref().filter(|_| founder) {
        Some(seat) => seat.locked_price_cents,
        None => character.premium_price_cents,
    };

    Entitlements {
        tier,
        source,
        chat_quota: policy.daily_limit(tier, inputs.anonymous),
        nsfw_access: tier.includes_nsfw(),
        voice_access: tier.includes_voice() || voice_credits > 0,
        voice_credits,
        price_cents,
        founder,
        expires_at,
    }
}
