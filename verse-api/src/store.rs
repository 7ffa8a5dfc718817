//! Persistence seam.
//!
//! Handlers talk to a [`Store`]; [`crate::db::PgStore`] backs it with
//! Postgres and [`crate::memory::MemoryStore`] with process memory for
//! development and tests. Every operation that checks and mutates state
//! (quota increments, debits, founder claims, webhook dedupe) is atomic in
//! both implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verse_core::{
    AnonymousId, Character, ChargeStatus, CreditOutcome, CryptoCharge, CryptoSubscription,
    DebitOutcome, FounderClaim, FounderSeat, IncrementOutcome, LedgerEntry, Order, SubjectKey,
    SubscriptionRecord, Tier, Timestamp, Tip, TipStatus, UserId,
};

use crate::error::ApiResult;

/// Webhook sources tracked in `webhook_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookProvider {
    Stripe,
    Coinbase,
    Resend,
    Gumroad,
}

impl WebhookProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookProvider::Stripe => "stripe",
            WebhookProvider::Coinbase => "coinbase",
            WebhookProvider::Resend => "resend",
            WebhookProvider::Gumroad => "gumroad",
        }
    }
}

/// One page view row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub id: Uuid,
    pub subject: Option<SubjectKey>,
    pub character_key: Option<String>,
    pub path: String,
    pub referrer: Option<String>,
    pub created_at: Timestamp,
}

/// Anonymous usage moved onto a user for one character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedUsage {
    pub character_key: String,
    pub messages: u32,
}

/// Rows removed per table by [`Store::user_delete_all`].
pub type DeletionReport = BTreeMap<String, u64>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> ApiResult<()>;

    // ========================================================================
    // DAILY USAGE
    // ========================================================================

    /// Count one message unless `limit` is already reached.
    ///
    /// `None` means unlimited. Concurrent callers can never push the counter
    /// past the limit.
    async fn usage_increment(
        &self,
        subject: &SubjectKey,
        character_key: &str,
        day: NaiveDate,
        limit: Option<u32>,
    ) -> ApiResult<IncrementOutcome>;

    async fn usage_get(
        &self,
        subject: &SubjectKey,
        character_key: &str,
        day: NaiveDate,
    ) -> ApiResult<u32>;

    /// Move the day's anonymous counters onto `user_id` and delete them.
    async fn usage_merge_anonymous(
        &self,
        anonymous_id: &AnonymousId,
        user_id: UserId,
        day: NaiveDate,
    ) -> ApiResult<Vec<MergedUsage>>;

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    async fn subscription_get(
        &self,
        user_id: UserId,
        character_key: &str,
    ) -> ApiResult<Option<SubscriptionRecord>>;

    async fn subscription_upsert(&self, record: &SubscriptionRecord) -> ApiResult<()>;

    async fn crypto_subscription_get(
        &self,
        user_id: UserId,
        character_key: &str,
    ) -> ApiResult<Option<CryptoSubscription>>;

    /// Add one crypto period for `charge_code`, starting from now when the
    /// subscription has lapsed.
    ///
    /// Each charge is applied at most once: `None` means it already was.
    async fn crypto_subscription_extend(
        &self,
        user_id: UserId,
        character_key: &str,
        tier: Tier,
        charge_code: &str,
        now: Timestamp,
    ) -> ApiResult<Option<CryptoSubscription>>;

    /// Store the charge and return its previous status, if any.
    async fn crypto_charge_upsert(&self, charge: &CryptoCharge) -> ApiResult<Option<ChargeStatus>>;

    // ========================================================================
    // FOUNDERS' CIRCLE
    // ========================================================================

    async fn founder_get(&self, user_id: UserId, character_key: &str) -> ApiResult<Option<FounderSeat>>;

    async fn founder_count(&self, character_key: &str) -> ApiResult<u32>;

    /// Claim the next seat if any are left. Idempotent for existing members.
    async fn founder_claim(
        &self,
        user_id: UserId,
        character: &Character,
        now: Timestamp,
    ) -> ApiResult<FounderClaim>;

    // ========================================================================
    // VERSECOIN WALLET
    // ========================================================================

    async fn wallet_balance(&self, user_id: UserId) -> ApiResult<i64>;

    async fn ledger_recent(&self, user_id: UserId, limit: usize) -> ApiResult<Vec<LedgerEntry>>;

    /// Debit `amount` if the balance covers it. A repeated `reference`
    /// returns the original entry without debiting again.
    async fn wallet_debit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        reference: Option<&str>,
        now: Timestamp,
    ) -> ApiResult<DebitOutcome>;

    /// Credit `amount`. A repeated `reference` is a no-op.
    async fn wallet_credit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        reference: Option<&str>,
        now: Timestamp,
    ) -> ApiResult<CreditOutcome>;

    // ========================================================================
    // ORDERS AND TIPS
    // ========================================================================

    /// Insert an order; `false` when (provider, external_id) already exists.
    async fn order_record(&self, order: &Order) -> ApiResult<bool>;

    async fn tip_insert(&self, tip: &Tip) -> ApiResult<()>;

    /// Settle the tip paid by `payment_intent_id`.
    ///
    /// `Succeeded` is reachable from pending and failed (a card retried after
    /// a decline) and is never left again. `Failed` only replaces pending.
    /// Returns the tip when it ends in `status`, including when it already was.
    async fn tip_settle(&self, payment_intent_id: &str, status: TipStatus) -> ApiResult<Option<Tip>>;

    // ========================================================================
    // EMAIL
    // ========================================================================

    /// Add `email` to the suppression list. `true` when newly added.
    async fn email_unsubscribe(&self, email: &str, reason: &str, now: Timestamp) -> ApiResult<bool>;

    async fn email_is_unsubscribed(&self, email: &str) -> ApiResult<bool>;

    // ========================================================================
    // ANALYTICS
    // ========================================================================

    async fn page_view_insert(&self, view: &PageView) -> ApiResult<()>;

    async fn session_touch(
        &self,
        session_id: &str,
        subject: Option<&SubjectKey>,
        path: &str,
        now: Timestamp,
    ) -> ApiResult<()>;

    // ========================================================================
    // WEBHOOK EVENTS
    // ========================================================================

    /// Mark an event as processed. `false` when it was seen before.
    async fn webhook_event_record(
        &self,
        provider: WebhookProvider,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> ApiResult<bool>;

    /// Forget an event whose processing failed so the provider can retry.
    async fn webhook_event_release(&self, provider: WebhookProvider, event_id: &str) -> ApiResult<()>;

    // ========================================================================
    // ADMIN
    // ========================================================================

    /// Delete every row owned by the user.
    async fn user_delete_all(&self, user_id: UserId) -> ApiResult<DeletionReport>;
}
