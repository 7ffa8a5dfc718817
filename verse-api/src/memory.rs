//! In-process [`Store`] for development and tests.
//!
//! All tables sit behind one mutex so multi-table operations (debit plus
//! ledger insert, founder count plus claim) are atomic like their SQL
//! counterparts. The lock is never held across an await point.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;
use verse_core::{
    apply_credit, apply_debit, extend_crypto_expiry, validate_amount, AnonymousId, Character,
    ChargeStatus, CreditOutcome, CryptoCharge, CryptoSubscription, DebitOutcome, FounderClaim,
    FounderSeat, IncrementOutcome, LedgerEntry, LedgerError, LedgerKind, Order, SubjectKey,
    SubscriptionRecord, Tier, Timestamp, Tip, TipStatus, UserId,
};

use crate::error::{ApiError, ApiResult};
use crate::store::{DeletionReport, MergedUsage, PageView, Store, WebhookProvider};

type UsageKey = (String, String, NaiveDate);

#[derive(Debug, Clone)]
struct SessionRow {
    subject: Option<SubjectKey>,
    path: String,
    last_seen: Timestamp,
}

#[derive(Debug, Default)]
struct Tables {
    usage: HashMap<UsageKey, u32>,
    subscriptions: HashMap<(UserId, String), SubscriptionRecord>,
    crypto_subscriptions: HashMap<(UserId, String), CryptoSubscription>,
    crypto_charges: HashMap<String, CryptoCharge>,
    /// Charges already turned into subscription time.
    crypto_grants: HashMap<String, UserId>,
    founders: HashMap<String, Vec<FounderSeat>>,
    wallets: HashMap<UserId, i64>,
    ledger: Vec<LedgerEntry>,
    orders: HashMap<(&'static str, String), Order>,
    tips: Vec<Tip>,
    unsubscribes: HashMap<String, (String, Timestamp)>,
    page_views: Vec<PageView>,
    sessions: HashMap<String, SessionRow>,
    webhook_events: HashSet<(WebhookProvider, String)>,
}

impl Tables {
    /// Earlier entry of the same kind carrying `reference`.
    fn ledger_by_reference(
        &self,
        user_id: UserId,
        kind: LedgerKind,
        reference: Option<&str>,
    ) -> Option<&LedgerEntry> {
        let reference = reference?;
        self.ledger.iter().find(|e| {
            e.user_id == user_id && e.kind == kind && e.reference.as_deref() == Some(reference)
        })
    }

    fn reference_taken(&self, user_id: UserId, reference: Option<&str>) -> bool {
        reference.is_some_and(|r| {
            self.ledger
                .iter()
                .any(|e| e.user_id == user_id && e.reference.as_deref() == Some(r))
        })
    }
}

/// Mutex-backed store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failures: Mutex<HashSet<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ApiResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| ApiError::internal_error("memory store lock poisoned"))
    }

    /// Make the next call to `operation` (a [`Store`] method name) fail
    /// with a database error, as a dropped connection would.
    pub fn fail_next(&self, operation: &'static str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(operation);
        }
    }

    fn injected_failure(&self, operation: &'static str) -> ApiResult<()> {
        let armed = self
            .failures
            .lock()
            .map(|mut failures| failures.remove(operation))
            .unwrap_or(false);
        if armed {
            return Err(ApiError::database_error(format!("{} failed", operation)));
        }
        Ok(())
    }

    /// Number of page views recorded so far.
    pub fn page_view_count(&self) -> usize {
        self.lock().map(|t| t.page_views.len()).unwrap_or(0)
    }

    /// Last time a session was seen, if at all.
    pub fn session_last_seen(&self, session_id: &str) -> Option<Timestamp> {
        self.lock()
            .ok()
            .and_then(|t| t.sessions.get(session_id).map(|s| s.last_seen))
    }

    /// Orders recorded so far, in no particular order.
    pub fn orders(&self) -> Vec<Order> {
        self.lock()
            .map(|t| t.orders.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Tip by id.
    pub fn tip(&self, id: Uuid) -> Option<Tip> {
        self.lock()
            .ok()
            .and_then(|t| t.tips.iter().find(|tip| tip.id == id).cloned())
    }
}

fn usage_key(subject: &SubjectKey, character_key: &str, day: NaiveDate) -> UsageKey {
    (subject.to_string(), character_key.to_string(), day)
}

fn ledger_entry(
    user_id: UserId,
    delta: i64,
    balance_after: i64,
    kind: LedgerKind,
    reason: &str,
    reference: Option<&str>,
    now: Timestamp,
) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::now_v7(),
        user_id,
        delta,
        balance_after,
        kind,
        reason: reason.to_string(),
        reference: reference.map(str::to_string),
        created_at: now,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> ApiResult<()> {
        self.lock().map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Daily usage
    // ------------------------------------------------------------------------

    async fn usage_increment(
        &self,
        subject: &SubjectKey,
        character_key: &str,
        day: NaiveDate,
        limit: Option<u32>,
    ) -> ApiResult<IncrementOutcome> {
        let mut tables = self.lock()?;
        let count = tables
            .usage
            .entry(usage_key(subject, character_key, day))
            .or_insert(0);
        if limit.is_some_and(|l| *count >= l) {
            return Ok(IncrementOutcome::LimitReached { used: *count });
        }
        *count = count.saturating_add(1);
        Ok(IncrementOutcome::Counted { used: *count })
    }

    async fn usage_get(
        &self,
        subject: &SubjectKey,
        character_key: &str,
        day: NaiveDate,
    ) -> ApiResult<u32> {
        let tables = self.lock()?;
        Ok(tables
            .usage
            .get(&usage_key(subject, character_key, day))
            .copied()
            .unwrap_or(0))
    }

    async fn usage_merge_anonymous(
        &self,
        anonymous_id: &AnonymousId,
        user_id: UserId,
        day: NaiveDate,
    ) -> ApiResult<Vec<MergedUsage>> {
        let anon = SubjectKey::Anonymous(anonymous_id.clone()).to_string();
        let user = SubjectKey::User(user_id).to_string();
        let mut tables = self.lock()?;

        let moved: Vec<(UsageKey, u32)> = tables
            .usage
            .iter()
            .filter(|((subject, _, d), count)| *subject == anon && *d == day && **count > 0)
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let mut merged = Vec::with_capacity(moved.len());
        for (key, messages) in moved {
            tables.usage.remove(&key);
            let (_, character_key, _) = key;
            let target = tables
                .usage
                .entry((user.clone(), character_key.clone(), day))
                .or_insert(0);
            *target = target.saturating_add(messages);
            merged.push(MergedUsage {
                character_key,
                messages,
            });
        }
        merged.sort_by(|a, b| a.character_key.cmp(&b.character_key));
        Ok(merged)
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    async fn subscription_get(
        &self,
        user_id: UserId,
        character_key: &str,
    ) -> ApiResult<Option<SubscriptionRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .subscriptions
            .get(&(user_id, character_key.to_string()))
            .cloned())
    }

    async fn subscription_upsert(&self, record: &SubscriptionRecord) -> ApiResult<()> {
        let mut tables = self.lock()?;
        tables.subscriptions.insert(
            (record.user_id, record.character_key.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn crypto_subscription_get(
        &self,
        user_id: UserId,
        character_key: &str,
    ) -> ApiResult<Option<CryptoSubscription>> {
        let tables = self.lock()?;
        Ok(tables
            .crypto_subscriptions
            .get(&(user_id, character_key.to_string()))
            .cloned())
    }

    async fn crypto_subscription_extend(
        &self,
        user_id: UserId,
        character_key: &str,
        tier: Tier,
        charge_code: &str,
        now: Timestamp,
    ) -> ApiResult<Option<CryptoSubscription>> {
        self.injected_failure("crypto_subscription_extend")?;
        let mut tables = self.lock()?;
        if tables.crypto_grants.contains_key(charge_code) {
            return Ok(None);
        }
        let key = (user_id, character_key.to_string());
        let current = tables.crypto_subscriptions.get(&key).map(|s| s.expires_at);
        let subscription = CryptoSubscription {
            user_id,
            character_key: character_key.to_string(),
            tier,
            expires_at: extend_crypto_expiry(current, now),
        };
        tables.crypto_subscriptions.insert(key, subscription.clone());
        tables.crypto_grants.insert(charge_code.to_string(), user_id);
        Ok(Some(subscription))
    }

    async fn crypto_charge_upsert(&self, charge: &CryptoCharge) -> ApiResult<Option<ChargeStatus>> {
        let mut tables = self.lock()?;
        let previous = tables.crypto_charges.get(&charge.code).cloned();
        let merged = match &previous {
            // Final states never move.
            Some(existing) if existing.status.is_final() => return Ok(Some(existing.status)),
            Some(existing) => CryptoCharge {
                user_id: charge.user_id.or(existing.user_id),
                character_key: charge
                    .character_key
                    .clone()
                    .or_else(|| existing.character_key.clone()),
                amount_cents: charge.amount_cents.or(existing.amount_cents),
                ..charge.clone()
            },
            None => charge.clone(),
        };
        tables.crypto_charges.insert(charge.code.clone(), merged);
        Ok(previous.map(|c| c.status))
    }

    // ------------------------------------------------------------------------
    // Founders' circle
    // ------------------------------------------------------------------------

    async fn founder_get(&self, user_id: UserId, character_key: &str) -> ApiResult<Option<FounderSeat>> {
        let tables = self.lock()?;
        Ok(tables
            .founders
            .get(character_key)
            .and_then(|seats| seats.iter().find(|s| s.user_id == user_id).cloned()))
    }

    async fn founder_count(&self, character_key: &str) -> ApiResult<u32> {
        let tables = self.lock()?;
        let taken = tables.founders.get(character_key).map_or(0, Vec::len);
        Ok(u32::try_from(taken).unwrap_or(u32::MAX))
    }

    async fn founder_claim(
        &self,
        user_id: UserId,
        character: &Character,
        now: Timestamp,
    ) -> ApiResult<FounderClaim> {
        let mut tables = self.lock()?;
        let seats = tables.founders.entry(character.key.clone()).or_default();
        if let Some(existing) = seats.iter().find(|s| s.user_id == user_id) {
            return Ok(FounderClaim::AlreadyMember(existing.clone()));
        }
        let taken = u32::try_from(seats.len()).unwrap_or(u32::MAX);
        if taken >= character.founder_seats {
            return Ok(FounderClaim::Full {
                seats_total: character.founder_seats,
            });
        }
        // Numbers of removed members are not handed out again.
        let seat_number = seats.iter().map(|s| s.seat_number).max().unwrap_or(0) + 1;
        let seat = FounderSeat {
            user_id,
            character_key: character.key.clone(),
            seat_number,
            locked_price_cents: character.founder_price_cents,
            claimed_at: now,
        };
        seats.push(seat.clone());
        Ok(FounderClaim::Claimed(seat))
    }

    // ------------------------------------------------------------------------
    // VerseCoin wallet
    // ------------------------------------------------------------------------

    async fn wallet_balance(&self, user_id: UserId) -> ApiResult<i64> {
        let tables = self.lock()?;
        Ok(tables.wallets.get(&user_id).copied().unwrap_or(0))
    }

    async fn ledger_recent(&self, user_id: UserId, limit: usize) -> ApiResult<Vec<LedgerEntry>> {
        let tables = self.lock()?;
        Ok(tables
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn wallet_debit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        reference: Option<&str>,
        now: Timestamp,
    ) -> ApiResult<DebitOutcome> {
        validate_amount(amount)?;
        let mut tables = self.lock()?;
        if let Some(entry) = tables.ledger_by_reference(user_id, LedgerKind::Debit, reference) {
            return Ok(DebitOutcome::Replayed(entry.clone()));
        }
        if tables.reference_taken(user_id, reference) {
            return Err(ApiError::reference_conflict());
        }
        let balance = tables.wallets.get(&user_id).copied().unwrap_or(0);
        let balance_after = match apply_debit(balance, amount) {
            Ok(b) => b,
            Err(LedgerError::InsufficientBalance { balance, .. }) => {
                return Ok(DebitOutcome::Insufficient { balance })
            }
            Err(e) => return Err(e.into()),
        };
        let entry = ledger_entry(
            user_id,
            -amount,
            balance_after,
            LedgerKind::Debit,
            reason,
            reference,
            now,
        );
        tables.wallets.insert(user_id, balance_after);
        tables.ledger.push(entry.clone());
        Ok(DebitOutcome::Debited(entry))
    }

    async fn wallet_credit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        reference: Option<&str>,
        now: Timestamp,
    ) -> ApiResult<CreditOutcome> {
        self.injected_failure("wallet_credit")?;
        let mut tables = self.lock()?;
        if let Some(entry) = tables.ledger_by_reference(user_id, LedgerKind::Credit, reference) {
            return Ok(CreditOutcome::Replayed(entry.clone()));
        }
        if tables.reference_taken(user_id, reference) {
            return Err(ApiError::reference_conflict());
        }
        let balance = tables.wallets.get(&user_id).copied().unwrap_or(0);
        let balance_after = apply_credit(balance, amount)?;
        let entry = ledger_entry(
            user_id,
            amount,
            balance_after,
            LedgerKind::Credit,
            reason,
            reference,
            now,
        );
        tables.wallets.insert(user_id, balance_after);
        tables.ledger.push(entry.clone());
        Ok(CreditOutcome::Credited(entry))
    }

    // ------------------------------------------------------------------------
    // Orders and tips
    // ------------------------------------------------------------------------

    async fn order_record(&self, order: &Order) -> ApiResult<bool> {
        self.injected_failure("order_record")?;
        let mut tables = self.lock()?;
        let key = (order.provider.as_str(), order.external_id.clone());
        if tables.orders.contains_key(&key) {
            return Ok(false);
        }
        tables.orders.insert(key, order.clone());
        Ok(true)
    }

    async fn tip_insert(&self, tip: &Tip) -> ApiResult<()> {
        let mut tables = self.lock()?;
        tables.tips.push(tip.clone());
        Ok(())
    }

    async fn tip_settle(&self, payment_intent_id: &str, status: TipStatus) -> ApiResult<Option<Tip>> {
        let mut tables = self.lock()?;
        let Some(tip) = tables
            .tips
            .iter_mut()
            .find(|t| t.payment_intent_id.as_deref() == Some(payment_intent_id))
        else {
            return Ok(None);
        };
        if tip.status.can_settle_to(status) {
            tip.status = status;
        }
        Ok((tip.status == status).then(|| tip.clone()))
    }

    // ------------------------------------------------------------------------
    // Email
    // ------------------------------------------------------------------------

    async fn email_unsubscribe(&self, email: &str, reason: &str, now: Timestamp) -> ApiResult<bool> {
        let mut tables = self.lock()?;
        let email = email.trim().to_lowercase();
        if tables.unsubscribes.contains_key(&email) {
            return Ok(false);
        }
        tables.unsubscribes.insert(email, (reason.to_string(), now));
        Ok(true)
    }

    async fn email_is_unsubscribed(&self, email: &str) -> ApiResult<bool> {
        let tables = self.lock()?;
        Ok(tables.unsubscribes.contains_key(&email.trim().to_lowercase()))
    }

    // ------------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------------

    async fn page_view_insert(&self, view: &PageView) -> ApiResult<()> {
        let mut tables = self.lock()?;
        tables.page_views.push(view.clone());
        Ok(())
    }

    async fn session_touch(
        &self,
        session_id: &str,
        subject: Option<&SubjectKey>,
        path: &str,
        now: Timestamp,
    ) -> ApiResult<()> {
        let mut tables = self.lock()?;
        tables.sessions.insert(
            session_id.to_string(),
            SessionRow {
                subject: subject.cloned(),
                path: path.to_string(),
                last_seen: now,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Webhook events
    // ------------------------------------------------------------------------

    async fn webhook_event_record(
        &self,
        provider: WebhookProvider,
        event_id: &str,
        _event_type: &str,
        _now: Timestamp,
    ) -> ApiResult<bool> {
        let mut tables = self.lock()?;
        Ok(tables
            .webhook_events
            .insert((provider, event_id.to_string())))
    }

    async fn webhook_event_release(&self, provider: WebhookProvider, event_id: &str) -> ApiResult<()> {
        let mut tables = self.lock()?;
        tables
            .webhook_events
            .remove(&(provider, event_id.to_string()));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------------

    async fn user_delete_all(&self, user_id: UserId) -> ApiResult<DeletionReport> {
        let mut tables = self.lock()?;
        let subject = SubjectKey::User(user_id);
        let subject_str = subject.to_string();
        let mut report = DeletionReport::new();

        let before = tables.usage.len();
        tables.usage.retain(|(s, _, _), _| *s != subject_str);
        report.insert("rate_limits".into(), (before - tables.usage.len()) as u64);

        let before = tables.subscriptions.len();
        tables.subscriptions.retain(|(u, _), _| *u != user_id);
        report.insert(
            "user_subscriptions".into(),
            (before - tables.subscriptions.len()) as u64,
        );

        let before = tables.crypto_subscriptions.len();
        tables.crypto_subscriptions.retain(|(u, _), _| *u != user_id);
        report.insert(
            "crypto_subscriptions".into(),
            (before - tables.crypto_subscriptions.len()) as u64,
        );

        let before = tables.crypto_charges.len();
        tables.crypto_charges.retain(|_, c| c.user_id != Some(user_id));
        tables.crypto_grants.retain(|_, u| *u != user_id);
        report.insert(
            "crypto_charges".into(),
            (before - tables.crypto_charges.len()) as u64,
        );

        let mut founders_removed = 0u64;
        for seats in tables.founders.values_mut() {
            let before = seats.len();
            seats.retain(|s| s.user_id != user_id);
            founders_removed += (before - seats.len()) as u64;
        }
        report.insert("founders_circle".into(), founders_removed);

        let wallets = u64::from(tables.wallets.remove(&user_id).is_some());
        report.insert("voice_wallets".into(), wallets);

        let before = tables.ledger.len();
        tables.ledger.retain(|e| e.user_id != user_id);
        report.insert(
            "voice_credit_ledger".into(),
            (before - tables.ledger.len()) as u64,
        );

        let before = tables.orders.len();
        tables.orders.retain(|_, o| o.user_id != Some(user_id));
        report.insert("orders".into(), (before - tables.orders.len()) as u64);

        let before = tables.tips.len();
        tables.tips.retain(|t| t.subject != subject);
        report.insert("tips".into(), (before - tables.tips.len()) as u64);

        let before = tables.page_views.len();
        tables
            .page_views
            .retain(|v| v.subject.as_ref() != Some(&subject));
        report.insert(
            "page_views".into(),
            (before - tables.page_views.len()) as u64,
        );

        let before = tables.sessions.len();
        tables
            .sessions
            .retain(|_, s| s.subject.as_ref() != Some(&subject));
        report.insert(
            "active_sessions".into(),
            (before - tables.sessions.len()) as u64,
        );

        Ok(report)
    }
}
