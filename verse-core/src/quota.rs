//! Daily message quotas.
//!
//! Counters are bucketed per subject, character and UTC day. Paid tiers are
//! unlimited; anonymous visitors get a smaller allowance than free accounts.

use chrono::{Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::tier::Tier;
use crate::Timestamp;

/// Daily allowances for unpaid subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub anonymous_daily: u32,
    pub free_daily: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            anonymous_daily: 5,
            free_daily: 20,
        }
    }
}

impl QuotaPolicy {
    /// Daily message limit; `None` means unlimited.
    pub fn daily_limit(&self, tier: Tier, anonymous: bool) -> Option<u32> {
        if anonymous {
            return Some(self.anonymous_daily);
        }
        match tier {
            Tier::Free => Some(self.free_daily),
            Tier::Premium | Tier::Vip => None,
        }
    }
}

/// The UTC day a message at `now` counts toward.
pub fn usage_day(now: Timestamp) -> NaiveDate {
    now.date_naive()
}

/// Next UTC midnight after `now`.
pub fn next_reset(now: Timestamp) -> Timestamp {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(NaiveDate::MAX);
    Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::default()))
}

/// Result of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The message was counted; `used` includes it.
    Counted { used: u32 },
    /// The limit was already reached; nothing was written.
    LimitReached { used: u32 },
}

impl IncrementOutcome {
    pub fn used(&self) -> u32 {
        match self {
            IncrementOutcome::Counted { used } | IncrementOutcome::LimitReached { used } => *used,
        }
    }

    pub fn allowed(&self) -> bool {
        matches!(self, IncrementOutcome::Counted { .. })
    }
}

/// Quota state reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    /// Whether the request (check) or the next message (status) is allowed.
    pub allowed: bool,
    pub used: u32,
    /// `null` when unlimited.
    pub limit: Option<u32>,
    /// `limit - used`, floored at zero; `null` when unlimited.
    pub remaining: Option<u32>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub reset_at: Timestamp,
    pub tier: Tier,
}

impl QuotaStatus {
    /// Status for a read-only lookup: allowed if another message would fit.
    pub fn from_usage(used: u32, limit: Option<u32>, tier: Tier, now: Timestamp) -> Self {
        Self {
            allowed: limit.map_or(true, |l| used < l),
            used,
            limit,
            remaining: limit.map(|l| l.saturating_sub(used)),
            reset_at: next_reset(now),
            tier,
        }
    }

    /// Status after an increment attempt.
    pub fn from_increment(
        outcome: IncrementOutcome,
        limit: Option<u32>,
        tier: Tier,
        now: Timestamp,
    ) -> Self {
        let used = outcome.used();
        Self {
            allowed: outcome.allowed(),
            used,
            limit,
            remaining: limit.map(|l| l.saturating_sub(used)),
            reset_at: next_reset(now),
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};

    #[test]
    fn test_daily_limits() {
        let policy = QuotaPolicy::default();
        assert_eq!(policy.daily_limit(Tier::Free, true), Some(5));
        assert_eq!(policy.daily_limit(Tier::Premium, true), Some(5));
        assert_eq!(policy.daily_limit(Tier::Free, false), Some(20));
        assert_eq!(policy.daily_limit(Tier::Premium, false), None);
        assert_eq!(policy.daily_limit(Tier::Vip, false), None);
    }

    #[test]
    fn test_next_reset_is_next_midnight() {
        // 2024-01-01 15:30:00 UTC
        let now = FixedClock::from_epoch_secs(1_704_123_000).now();
        let reset = next_reset(now);
        assert_eq!(reset.to_rfc3339(), "2024-01-02T00:00:00+00:00");
        assert_eq!(usage_day(now).to_string(), "2024-01-01");
    }

    #[test]
    fn test_status_remaining_never_negative() {
        let now = FixedClock::from_epoch_secs(1_704_067_200).now();
        let status = QuotaStatus::from_usage(25, Some(20), Tier::Free, now);
        assert_eq!(status.remaining, Some(0));
        assert!(!status.allowed);

        let status = QuotaStatus::from_usage(3, Some(20), Tier::Free, now);
        assert_eq!(status.remaining, Some(17));
        assert!(status.allowed);

        let status = QuotaStatus::from_usage(500, None, Tier::Vip, now);
        assert_eq!(status.remaining, None);
        assert!(status.allowed);
    }

    #[test]
    fn test_status_after_increment() {
        let now = FixedClock::from_epoch_secs(1_704_067_200).now();
        let counted = QuotaStatus::from_increment(
            IncrementOutcome::Counted { used: 20 },
            Some(20),
            Tier::Free,
            now,
        );
        assert!(counted.allowed);
        assert_eq!(counted.remaining, Some(0));

        let denied = QuotaStatus::from_increment(
            IncrementOutcome::LimitReached { used: 20 },
            Some(20),
            Tier::Free,
            now,
        );
        assert!(!denied.allowed);
        assert_eq!(denied.used, 20);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let now = FixedClock::from_epoch_secs(1_704_067_200).now();
        let json = serde_json::to_value(QuotaStatus::from_usage(1, Some(5), Tier::Free, now)).unwrap();
        assert_eq!(json["resetAt"], "2024-01-02T00:00:00Z");
        assert_eq!(json["remaining"], 4);
        assert_eq!(json["tier"], "free");
    }
}
