//! Subscription tiers and provider statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Plan tier. Ordered from least to most capable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Vip,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Vip => "vip",
        }
    }

    pub fn is_paid(&self) -> bool {
        *self > Tier::Free
    }

    pub fn includes_nsfw(&self) -> bool {
        *self >= Tier::Premium
    }

    /// Voice replies without spending VerseCoins.
    pub fn includes_voice(&self) -> bool {
        *self == Tier::Vip
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" | "pro" => Ok(Tier::Premium),
            "vip" | "ultimate" => Ok(Tier::Vip),
            other => Err(ValidationError::InvalidValue {
                field: "tier".to_string(),
                reason: format!("unknown tier '{}'", other),
            }),
        }
    }
}

/// Stripe subscription status as synced into `user_subscriptions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Paused,
    Incomplete,
    Unpaid,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Whether this status grants the subscribed tier.
    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "paused" => Ok(SubscriptionStatus::Paused),
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            "canceled" | "cancelled" | "incomplete_expired" => Ok(SubscriptionStatus::Canceled),
            other => Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("unknown subscription status '{}'", other),
            }),
        }
    }
}

/// Which data source decided the effective tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum EntitlementSource {
    Stripe,
    Crypto,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering_and_capabilities() {
        assert!(Tier::Free < Tier::Premium);
        assert!(Tier::Premium < Tier::Vip);
        assert!(!Tier::Free.includes_nsfw());
        assert!(Tier::Premium.includes_nsfw());
        assert!(!Tier::Premium.includes_voice());
        assert!(Tier::Vip.includes_voice());
        assert!(!Tier::Free.is_paid());
    }

    #[test]
    fn test_tier_parsing_aliases() {
        assert_eq!("Premium".parse::<Tier>(), Ok(Tier::Premium));
        assert_eq!("pro".parse::<Tier>(), Ok(Tier::Premium));
        assert_eq!("ultimate".parse::<Tier>(), Ok(Tier::Vip));
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn test_subscription_status_access() {
        for (raw, grants) in [
            ("active", true),
            ("trialing", true),
            ("past_due", false),
            ("canceled", false),
            ("incomplete_expired", false),
        ] {
            let status: SubscriptionStatus = raw.parse().unwrap();
            assert_eq!(status.grants_access(), grants, "status {}", raw);
        }
        assert!("bogus".parse::<SubscriptionStatus>().is_err());
    }
}
