//! Verse Test Utilities
//!
//! Shared test infrastructure for the Verse workspace:
//! - Proptest generators for identities, tiers and amounts
//! - Fixtures for subscriptions, founder seats and catalogs
//! - Fixed clocks pinned to well-known instants

pub use verse_core::{
    AnonymousId, Character, CharacterCatalog, Clock, CryptoSubscription, FixedClock, FounderSeat,
    Identity, SubjectKey, SubscriptionRecord, SubscriptionStatus, Tier, Timestamp, UserId,
};

// ============================================================================
// CLOCKS
// ============================================================================

pub mod clocks {
    use super::*;

    /// 2024-01-01T00:00:00Z.
    pub const NEW_YEAR_2024: i64 = 1_704_067_200;

    /// Clock pinned to 2024-01-01 midday UTC.
    pub fn midday() -> FixedClock {
        FixedClock::from_epoch_secs(NEW_YEAR_2024 + 12 * 3600)
    }

    /// Clock pinned one second before the UTC day rolls over.
    pub fn just_before_midnight() -> FixedClock {
        FixedClock::from_epoch_secs(NEW_YEAR_2024 + 86_399)
    }

    /// Clock pinned to `secs` after [`midday`].
    pub fn midday_plus(secs: i64) -> FixedClock {
        FixedClock::from_epoch_secs(NEW_YEAR_2024 + 12 * 3600 + secs)
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Ids matching the anonymous id pattern.
    pub fn arb_anonymous_id() -> impl Strategy<Value = AnonymousId> {
        "[A-Za-z0-9_-]{8,64}".prop_filter_map("valid anonymous id", |s| AnonymousId::parse(&s).ok())
    }

    pub fn arb_subject() -> impl Strategy<Value = SubjectKey> {
        prop_oneof![
            arb_user_id().prop_map(SubjectKey::User),
            arb_anonymous_id().prop_map(SubjectKey::Anonymous),
        ]
    }

    pub fn arb_tier() -> impl Strategy<Value = Tier> {
        prop_oneof![Just(Tier::Free), Just(Tier::Premium), Just(Tier::Vip)]
    }

    pub fn arb_subscription_status() -> impl Strategy<Value = SubscriptionStatus> {
        prop_oneof![
            Just(SubscriptionStatus::Active),
            Just(SubscriptionStatus::Trialing),
            Just(SubscriptionStatus::PastDue),
            Just(SubscriptionStatus::Paused),
            Just(SubscriptionStatus::Incomplete),
            Just(SubscriptionStatus::Unpaid),
            Just(SubscriptionStatus::Canceled),
        ]
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000i64).prop_map(|secs| FixedClock::from_epoch_secs(secs).now())
    }

    /// Ledger amounts inside the accepted range.
    pub fn arb_coin_amount() -> impl Strategy<Value = i64> {
        1i64..=verse_core::MAX_LEDGER_AMOUNT
    }

    /// Email addresses shaped like real ones.
    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z][a-z0-9.]{0,15}", "[a-z]{2,10}", "(com|net|org|chat)")
            .prop_map(|(local, domain, tld)| format!("{}@{}.{}", local, domain, tld))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    pub fn catalog() -> CharacterCatalog {
        CharacterCatalog::builtin()
    }

    pub fn lexi() -> Character {
        let catalog = CharacterCatalog::builtin();
        catalog.default_character().clone()
    }

    pub fn anonymous_id(raw: &str) -> AnonymousId {
        AnonymousId::parse(raw).unwrap_or_else(|e| panic!("fixture anonymous id {raw}: {e}"))
    }

    pub fn authenticated(user_id: UserId) -> Identity {
        Identity::Authenticated {
            user_id,
            email: Some(format!("{}@fans.example", user_id.simple())),
            role: None,
        }
    }

    /// Active Stripe subscription that renews in 30 days.
    pub fn active_subscription(
        user_id: UserId,
        character_key: &str,
        tier: Tier,
        now: Timestamp,
    ) -> SubscriptionRecord {
        SubscriptionRecord {
            user_id,
            character_key: character_key.to_string(),
            tier,
            status: SubscriptionStatus::Active,
            current_period_end: Some(now + Duration::days(30)),
            stripe_customer_id: Some(format!("cus_{}", user_id.simple())),
            stripe_subscription_id: Some(format!("sub_{}", Uuid::now_v7().simple())),
            updated_at: now,
        }
    }

    pub fn crypto_subscription(
        user_id: UserId,
        character_key: &str,
        tier: Tier,
        expires_at: Timestamp,
    ) -> CryptoSubscription {
        CryptoSubscription {
            user_id,
            character_key: character_key.to_string(),
            tier,
            expires_at,
        }
    }

    pub fn founder_seat(user_id: UserId, character: &Character, seat_number: u32, now: Timestamp) -> FounderSeat {
        FounderSeat {
            user_id,
            character_key: character.key.clone(),
            seat_number,
            locked_price_cents: character.founder_price_cents,
            claimed_at: now,
        }
    }
}
