//! Postgres-backed [`Store`].
//!
//! Check-and-mutate operations are single conditional statements or short
//! transactions; no application locks guard business data. The schema lives
//! in `sql/schema.sql`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use secrecy::{ExposeSecret, SecretString};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;
use verse_core::{
    validate_amount, AnonymousId, Character, ChargeStatus, CreditOutcome, CryptoCharge,
    CryptoSubscription, DebitOutcome, FounderClaim, FounderSeat, IncrementOutcome, LedgerEntry,
    LedgerKind, Order, SubjectKey, SubscriptionRecord, Tier, Timestamp, Tip, TipStatus, UserId,
    CRYPTO_PERIOD_DAYS,
};

use crate::error::{ApiError, ApiResult};
use crate::store::{DeletionReport, MergedUsage, PageView, Store, WebhookProvider};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full connection string; takes precedence over the individual fields.
    pub url: Option<SecretString>,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: SecretString,
    pub max_size: usize,
    /// Wait timeout when the pool is exhausted.
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            dbname: "verse".to_string(),
            user: "postgres".to_string(),
            password: SecretString::from(String::new()),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Read `DATABASE_URL`, falling back to `VERSE_DB_*`.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(SecretString::from),
            host: std::env::var("VERSE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("VERSE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("VERSE_DB_NAME").unwrap_or_else(|_| "verse".to_string()),
            user: std::env::var("VERSE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: SecretString::from(std::env::var("VERSE_DB_PASSWORD").unwrap_or_default()),
            max_size: std::env::var("VERSE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("VERSE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        match &self.url {
            Some(url) => cfg.url = Some(url.expose_secret().to_string()),
            None => {
                cfg.host = Some(self.host.clone());
                cfg.port = Some(self.port);
                cfg.dbname = Some(self.dbname.clone());
                cfg.user = Some(self.user.clone());
                cfg.password = Some(self.password.expose_secret().to_string());
            }
        }

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_column<T>(value: &str, column: &str) -> ApiResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| {
        tracing::error!(column, value, error = %e, "Unreadable column value");
        ApiError::database_error("Stored row could not be decoded")
    })
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn subscription_from_row(row: &Row) -> ApiResult<SubscriptionRecord> {
    Ok(SubscriptionRecord {
        user_id: row.get("user_id"),
        character_key: row.get("character_key"),
        tier: parse_column(row.get("tier"), "tier")?,
        status: parse_column(row.get("status"), "status")?,
        current_period_end: row.get("current_period_end"),
        stripe_customer_id: row.get("stripe_customer_id"),
        stripe_subscription_id: row.get("stripe_subscription_id"),
        updated_at: row.get("updated_at"),
    })
}

fn crypto_subscription_from_row(row: &Row) -> ApiResult<CryptoSubscription> {
    Ok(CryptoSubscription {
        user_id: row.get("user_id"),
        character_key: row.get("character_key"),
        tier: parse_column(row.get("tier"), "tier")?,
        expires_at: row.get("expires_at"),
    })
}

fn founder_from_row(row: &Row) -> FounderSeat {
    FounderSeat {
        user_id: row.get("user_id"),
        character_key: row.get("character_key"),
        seat_number: to_u32(row.get("seat_number")),
        locked_price_cents: row.get("locked_price_cents"),
        claimed_at: row.get("claimed_at"),
    }
}

fn ledger_from_row(row: &Row) -> ApiResult<LedgerEntry> {
    let kind: &str = row.get("kind");
    Ok(LedgerEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        delta: row.get("delta"),
        balance_after: row.get("balance_after"),
        kind: LedgerKind::parse(kind)
            .ok_or_else(|| ApiError::database_error("Stored row could not be decoded"))?,
        reason: row.get("reason"),
        reference: row.get("reference"),
        created_at: row.get("created_at"),
    })
}

/// An earlier entry with the same reference. Only an entry of the same kind
/// counts as a replay.
fn replayed_entry(row: &Row, kind: LedgerKind) -> ApiResult<LedgerEntry> {
    let entry = ledger_from_row(row)?;
    if entry.kind != kind {
        return Err(ApiError::reference_conflict());
    }
    Ok(entry)
}

fn tip_from_row(row: &Row) -> ApiResult<Tip> {
    Ok(Tip {
        id: row.get("id"),
        subject: parse_column(row.get("subject"), "subject")?,
        character_key: row.get("character_key"),
        amount_cents: row.get("amount_cents"),
        message: row.get("message"),
        status: parse_column(row.get("status"), "status")?,
        payment_intent_id: row.get("payment_intent_id"),
        created_at: row.get("created_at"),
    })
}

const LEDGER_COLUMNS: &str =
    "id, user_id, delta, balance_after, kind, reason, reference, created_at";

// ============================================================================
// STORE
// ============================================================================

/// Store backed by a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Apply `sql/schema.sql`. Every statement is idempotent.
    pub async fn migrate(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(include_str!("../sql/schema.sql")).await?;
        Ok(())
    }

    async fn get_conn(&self) -> ApiResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(ApiError::from)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    // ========================================================================
    // DAILY USAGE
    // ========================================================================

    async fn usage_increment(
        &self,
        subject: &SubjectKey,
        character_key: &str,
        day: NaiveDate,
        limit: Option<u32>,
    ) -> ApiResult<IncrementOutcome> {
        if limit == Some(0) {
            let used = self.usage_get(subject, character_key, day).await?;
            return Ok(IncrementOutcome::LimitReached { used });
        }

        let conn = self.get_conn().await?;
        let subject = subject.to_string();
        let limit = limit.map(to_i32);
        let row = conn
            .query_opt(
                "INSERT INTO rate_limits (subject, character_key, day, count, updated_at) \
                 VALUES ($1, $2, $3, 1, now()) \
                 ON CONFLICT (subject, character_key, day) DO UPDATE \
                 SET count = rate_limits.count + 1, updated_at = now() \
                 WHERE $4::INTEGER IS NULL OR rate_limits.count < $4 \
                 RETURNING count",
                &[&subject, &character_key, &day, &limit],
            )
            .await?;

        if let Some(row) = row {
            return Ok(IncrementOutcome::Counted {
                used: to_u32(row.get(0)),
            });
        }

        let used: i32 = conn
            .query_opt(
                "SELECT count FROM rate_limits \
                 WHERE subject = $1 AND character_key = $2 AND day = $3",
                &[&subject, &character_key, &day],
            )
            .await?
            .map(|r| r.get(0))
            .unwrap_or(0);
        Ok(IncrementOutcome::LimitReached { used: to_u32(used) })
    }

    async fn usage_get(
        &self,
        subject: &SubjectKey,
        character_key: &str,
        day: NaiveDate,
    ) -> ApiResult<u32> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT count FROM rate_limits \
                 WHERE subject = $1 AND character_key = $2 AND day = $3",
                &[&subject.to_string(), &character_key, &day],
            )
            .await?;
        Ok(row.map(|r| to_u32(r.get(0))).unwrap_or(0))
    }

    async fn usage_merge_anonymous(
        &self,
        anonymous_id: &AnonymousId,
        user_id: UserId,
        day: NaiveDate,
    ) -> ApiResult<Vec<MergedUsage>> {
        let anon = SubjectKey::Anonymous(anonymous_id.clone()).to_string();
        let user = SubjectKey::User(user_id).to_string();

        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let rows = tx
            .query(
                "DELETE FROM rate_limits WHERE subject = $1 AND day = $2 \
                 RETURNING character_key, count",
                &[&anon, &day],
            )
            .await?;

        let mut merged = Vec::with_capacity(rows.len());
        for row in rows {
            let character_key: String = row.get("character_key");
            let count: i32 = row.get("count");
            if count <= 0 {
                continue;
            }
            tx.execute(
                "INSERT INTO rate_limits (subject, character_key, day, count, updated_at) \
                 VALUES ($1, $2, $3, $4, now()) \
                 ON CONFLICT (subject, character_key, day) DO UPDATE \
                 SET count = rate_limits.count + EXCLUDED.count, updated_at = now()",
                &[&user, &character_key, &day, &count],
            )
            .await?;
            merged.push(MergedUsage {
                character_key,
                messages: to_u32(count),
            });
        }
        tx.commit().await?;

        merged.sort_by(|a, b| a.character_key.cmp(&b.character_key));
        Ok(merged)
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    async fn subscription_get(
        &self,
        user_id: UserId,
        character_key: &str,
    ) -> ApiResult<Option<SubscriptionRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id, character_key, tier, status, current_period_end, \
                        stripe_customer_id, stripe_subscription_id, updated_at \
                 FROM user_subscriptions WHERE user_id = $1 AND character_key = $2",
                &[&user_id, &character_key],
            )
            .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn subscription_upsert(&self, record: &SubscriptionRecord) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO user_subscriptions (user_id, character_key, tier, status, \
                 current_period_end, stripe_customer_id, stripe_subscription_id, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, character_key) DO UPDATE SET \
                 tier = EXCLUDED.tier, \
                 status = EXCLUDED.status, \
                 current_period_end = EXCLUDED.current_period_end, \
                 stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, user_subscriptions.stripe_customer_id), \
                 stripe_subscription_id = COALESCE(EXCLUDED.stripe_subscription_id, user_subscriptions.stripe_subscription_id), \
                 updated_at = EXCLUDED.updated_at",
            &[
                &record.user_id,
                &record.character_key,
                &record.tier.as_str(),
                &record.status.as_str(),
                &record.current_period_end,
                &record.stripe_customer_id,
                &record.stripe_subscription_id,
                &record.updated_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn crypto_subscription_get(
        &self,
        user_id: UserId,
        character_key: &str,
    ) -> ApiResult<Option<CryptoSubscription>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id, character_key, tier, expires_at \
                 FROM crypto_subscriptions WHERE user_id = $1 AND character_key = $2",
                &[&user_id, &character_key],
            )
            .await?;
        row.as_ref().map(crypto_subscription_from_row).transpose()
    }

    async fn crypto_subscription_extend(
        &self,
        user_id: UserId,
        character_key: &str,
        tier: Tier,
        charge_code: &str,
        now: Timestamp,
    ) -> ApiResult<Option<CryptoSubscription>> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        // Marking the charge granted and adding the period commit together.
        let claimed = tx
            .query_opt(
                "INSERT INTO crypto_charges (code, user_id, status, granted_at, updated_at) \
                 VALUES ($1, $2, 'confirmed', $3, $3) \
                 ON CONFLICT (code) DO UPDATE SET granted_at = EXCLUDED.granted_at \
                 WHERE crypto_charges.granted_at IS NULL \
                 RETURNING code",
                &[&charge_code, &user_id, &now],
            )
            .await?;
        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let days = i32::try_from(CRYPTO_PERIOD_DAYS).unwrap_or(30);
        let row = tx
            .query_one(
                "INSERT INTO crypto_subscriptions (user_id, character_key, tier, expires_at, updated_at) \
                 VALUES ($1, $2, $3, $4::TIMESTAMPTZ + make_interval(days => $5), $4) \
                 ON CONFLICT (user_id, character_key) DO UPDATE SET \
                     tier = EXCLUDED.tier, \
                     expires_at = GREATEST(crypto_subscriptions.expires_at, $4) + make_interval(days => $5), \
                     updated_at = $4 \
                 RETURNING user_id, character_key, tier, expires_at",
                &[&user_id, &character_key, &tier.as_str(), &now, &days],
            )
            .await?;
        let subscription = crypto_subscription_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(subscription))
    }

    async fn crypto_charge_upsert(&self, charge: &CryptoCharge) -> ApiResult<Option<ChargeStatus>> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let previous = tx
            .query_opt(
                "SELECT status FROM crypto_charges WHERE code = $1 FOR UPDATE",
                &[&charge.code],
            )
            .await?
            .map(|r| parse_column::<ChargeStatus>(r.get(0), "status"))
            .transpose()?;

        // Final states never move.
        if previous.is_some_and(|s| s.is_final()) {
            tx.commit().await?;
            return Ok(previous);
        }

        tx.execute(
            "INSERT INTO crypto_charges (code, user_id, character_key, status, amount_cents, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (code) DO UPDATE SET \
                 user_id = COALESCE(EXCLUDED.user_id, crypto_charges.user_id), \
                 character_key = COALESCE(EXCLUDED.character_key, crypto_charges.character_key), \
                 status = EXCLUDED.status, \
                 amount_cents = COALESCE(EXCLUDED.amount_cents, crypto_charges.amount_cents), \
                 updated_at = EXCLUDED.updated_at",
            &[
                &charge.code,
                &charge.user_id,
                &charge.character_key,
                &charge.status.as_str(),
                &charge.amount_cents,
                &charge.updated_at,
            ],
        )
        .await?;
        tx.commit().await?;
        Ok(previous)
    }

    // ========================================================================
    // FOUNDERS' CIRCLE
    // ========================================================================

    async fn founder_get(&self, user_id: UserId, character_key: &str) -> ApiResult<Option<FounderSeat>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id, character_key, seat_number, locked_price_cents, claimed_at \
                 FROM founders_circle WHERE user_id = $1 AND character_key = $2",
                &[&user_id, &character_key],
            )
            .await?;
        Ok(row.as_ref().map(founder_from_row))
    }

    async fn founder_count(&self, character_key: &str) -> ApiResult<u32> {
        let conn = self.get_conn().await?;
        let taken: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM founders_circle WHERE character_key = $1",
                &[&character_key],
            )
            .await?
            .get(0);
        Ok(u32::try_from(taken).unwrap_or(u32::MAX))
    }

    async fn founder_claim(
        &self,
        user_id: UserId,
        character: &Character,
        now: Timestamp,
    ) -> ApiResult<FounderClaim> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        // Serialize claims per character for the count-then-insert below.
        tx.execute(
            "SELECT pg_advisory_xact_lock(hashtext('founders:' || $1::TEXT))",
            &[&character.key],
        )
        .await?;

        if let Some(row) = tx
            .query_opt(
                "SELECT user_id, character_key, seat_number, locked_price_cents, claimed_at \
                 FROM founders_circle WHERE user_id = $1 AND character_key = $2",
                &[&user_id, &character.key],
            )
            .await?
        {
            tx.commit().await?;
            return Ok(FounderClaim::AlreadyMember(founder_from_row(&row)));
        }

        let taken: i64 = tx
            .query_one(
                "SELECT COUNT(*) FROM founders_circle WHERE character_key = $1",
                &[&character.key],
            )
            .await?
            .get(0);
        if taken >= i64::from(character.founder_seats) {
            tx.commit().await?;
            return Ok(FounderClaim::Full {
                seats_total: character.founder_seats,
            });
        }

        // Numbers of removed members are not handed out again.
        let row = tx
            .query_one(
                "INSERT INTO founders_circle (user_id, character_key, seat_number, locked_price_cents, claimed_at) \
                 SELECT $1, $2, COALESCE(MAX(seat_number), 0) + 1, $3, $4 \
                 FROM founders_circle WHERE character_key = $2 \
                 RETURNING user_id, character_key, seat_number, locked_price_cents, claimed_at",
                &[
                    &user_id,
                    &character.key,
                    &character.founder_price_cents,
                    &now,
                ],
            )
            .await?;
        tx.commit().await?;
        Ok(FounderClaim::Claimed(founder_from_row(&row)))
    }

    // ========================================================================
    // VERSECOIN WALLET
    // ========================================================================

    async fn wallet_balance(&self, user_id: UserId) -> ApiResult<i64> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT balance FROM voice_wallets WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(row.map(|r| r.get(0)).unwrap_or(0))
    }

    async fn ledger_recent(&self, user_id: UserId, limit: usize) -> ApiResult<Vec<LedgerEntry>> {
        let conn = self.get_conn().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM voice_credit_ledger WHERE user_id = $1 \
                     ORDER BY created_at DESC, id DESC LIMIT $2",
                    LEDGER_COLUMNS
                ),
                &[&user_id, &limit],
            )
            .await?;
        rows.iter().map(ledger_from_row).collect()
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
        let by_reference = format!(
            "SELECT {} FROM voice_credit_ledger WHERE user_id = $1 AND reference = $2",
            LEDGER_COLUMNS
        );

        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        if let Some(reference) = reference {
            if let Some(row) = tx.query_opt(&by_reference, &[&user_id, &reference]).await? {
                tx.rollback().await?;
                return replayed_entry(&row, LedgerKind::Debit).map(DebitOutcome::Replayed);
            }
        }

        // The row lock taken here orders concurrent debits; the predicate is
        // re-checked after the wait so the balance never goes negative.
        let updated = tx
            .query_opt(
                "UPDATE voice_wallets SET balance = balance - $2, updated_at = $3 \
                 WHERE user_id = $1 AND balance >= $2 RETURNING balance",
                &[&user_id, &amount, &now],
            )
            .await?;
        let Some(updated) = updated else {
            let balance: i64 = tx
                .query_opt(
                    "SELECT balance FROM voice_wallets WHERE user_id = $1",
                    &[&user_id],
                )
                .await?
                .map(|r| r.get(0))
                .unwrap_or(0);
            tx.rollback().await?;
            return Ok(DebitOutcome::Insufficient { balance });
        };
        let balance_after: i64 = updated.get(0);

        let inserted = tx
            .query_opt(
                &format!(
                    "INSERT INTO voice_credit_ledger ({}) \
                     VALUES ($1, $2, $3, $4, 'debit', $5, $6, $7) \
                     ON CONFLICT (user_id, reference) DO NOTHING RETURNING {}",
                    LEDGER_COLUMNS, LEDGER_COLUMNS
                ),
                &[
                    &Uuid::now_v7(),
                    &user_id,
                    &-amount,
                    &balance_after,
                    &reason,
                    &reference,
                    &now,
                ],
            )
            .await?;

        match inserted {
            Some(row) => {
                let entry = ledger_from_row(&row)?;
                tx.commit().await?;
                Ok(DebitOutcome::Debited(entry))
            }
            None => {
                // A concurrent request with the same reference won.
                tx.rollback().await?;
                let conn = self.get_conn().await?;
                let row = conn.query_one(&by_reference, &[&user_id, &reference]).await?;
                replayed_entry(&row, LedgerKind::Debit).map(DebitOutcome::Replayed)
            }
        }
    }

    async fn wallet_credit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        reference: Option<&str>,
        now: Timestamp,
    ) -> ApiResult<CreditOutcome> {
        validate_amount(amount)?;
        let by_reference = format!(
            "SELECT {} FROM voice_credit_ledger WHERE user_id = $1 AND reference = $2",
            LEDGER_COLUMNS
        );

        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        if let Some(reference) = reference {
            if let Some(row) = tx.query_opt(&by_reference, &[&user_id, &reference]).await? {
                tx.rollback().await?;
                return replayed_entry(&row, LedgerKind::Credit).map(CreditOutcome::Replayed);
            }
        }

        let balance_after: i64 = tx
            .query_one(
                "INSERT INTO voice_wallets (user_id, balance, updated_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (user_id) DO UPDATE \
                 SET balance = voice_wallets.balance + EXCLUDED.balance, updated_at = EXCLUDED.updated_at \
                 RETURNING balance",
                &[&user_id, &amount, &now],
            )
            .await?
            .get(0);

        let inserted = tx
            .query_opt(
                &format!(
                    "INSERT INTO voice_credit_ledger ({}) \
                     VALUES ($1, $2, $3, $4, 'credit', $5, $6, $7) \
                     ON CONFLICT (user_id, reference) DO NOTHING RETURNING {}",
                    LEDGER_COLUMNS, LEDGER_COLUMNS
                ),
                &[
                    &Uuid::now_v7(),
                    &user_id,
                    &amount,
                    &balance_after,
                    &reason,
                    &reference,
                    &now,
                ],
            )
            .await?;

        match inserted {
            Some(row) => {
                let entry = ledger_from_row(&row)?;
                tx.commit().await?;
                Ok(CreditOutcome::Credited(entry))
            }
            None => {
                tx.rollback().await?;
                let conn = self.get_conn().await?;
                let row = conn.query_one(&by_reference, &[&user_id, &reference]).await?;
                replayed_entry(&row, LedgerKind::Credit).map(CreditOutcome::Replayed)
            }
        }
    }

    // ========================================================================
    // ORDERS AND TIPS
    // ========================================================================

    async fn order_record(&self, order: &Order) -> ApiResult<bool> {
        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO orders (id, provider, external_id, kind, user_id, character_key, \
                     amount_cents, currency, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (provider, external_id) DO NOTHING",
                &[
                    &order.id,
                    &order.provider.as_str(),
                    &order.external_id,
                    &order.kind.as_str(),
                    &order.user_id,
                    &order.character_key,
                    &order.amount_cents,
                    &order.currency,
                    &order.created_at,
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn tip_insert(&self, tip: &Tip) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO tips (id, subject, character_key, amount_cents, message, status, \
                 payment_intent_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &tip.id,
                &tip.subject.to_string(),
                &tip.character_key,
                &tip.amount_cents,
                &tip.message,
                &tip.status.as_str(),
                &tip.payment_intent_id,
                &tip.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn tip_settle(&self, payment_intent_id: &str, status: TipStatus) -> ApiResult<Option<Tip>> {
        let movable: Vec<&str> = [TipStatus::Pending, TipStatus::Failed, TipStatus::Succeeded]
            .into_iter()
            .filter(|from| *from == status || from.can_settle_to(status))
            .map(|from| from.as_str())
            .collect();
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "UPDATE tips SET status = $2 \
                 WHERE payment_intent_id = $1 AND status = ANY($3) \
                 RETURNING id, subject, character_key, amount_cents, message, status, \
                           payment_intent_id, created_at",
                &[&payment_intent_id, &status.as_str(), &movable],
            )
            .await?;
        row.as_ref().map(tip_from_row).transpose()
    }

    // ========================================================================
    // EMAIL
    // ========================================================================

    async fn email_unsubscribe(&self, email: &str, reason: &str, now: Timestamp) -> ApiResult<bool> {
        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO email_unsubscribes (email, reason, created_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (email) DO NOTHING",
                &[&email.trim().to_lowercase(), &reason, &now],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn email_is_unsubscribed(&self, email: &str) -> ApiResult<bool> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT 1 FROM email_unsubscribes WHERE email = $1",
                &[&email.trim().to_lowercase()],
            )
            .await?;
        Ok(row.is_some())
    }

    // ========================================================================
    // ANALYTICS
    // ========================================================================

    async fn page_view_insert(&self, view: &PageView) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO page_views (id, subject, character_key, path, referrer, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &view.id,
                &view.subject.as_ref().map(ToString::to_string),
                &view.character_key,
                &view.path,
                &view.referrer,
                &view.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn session_touch(
        &self,
        session_id: &str,
        subject: Option<&SubjectKey>,
        path: &str,
        now: Timestamp,
    ) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO active_sessions (session_id, subject, path, last_seen) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (session_id) DO UPDATE SET \
                 subject = COALESCE(EXCLUDED.subject, active_sessions.subject), \
                 path = EXCLUDED.path, \
                 last_seen = EXCLUDED.last_seen",
            &[&session_id, &subject.map(ToString::to_string), &path, &now],
        )
        .await?;
        Ok(())
    }

    // ========================================================================
    // WEBHOOK EVENTS
    // ========================================================================

    async fn webhook_event_record(
        &self,
        provider: WebhookProvider,
        event_id: &str,
        event_type: &str,
        now: Timestamp,
    ) -> ApiResult<bool> {
        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO webhook_events (provider, event_id, event_type, received_at) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (provider, event_id) DO NOTHING",
                &[&provider.as_str(), &event_id, &event_type, &now],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn webhook_event_release(&self, provider: WebhookProvider, event_id: &str) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "DELETE FROM webhook_events WHERE provider = $1 AND event_id = $2",
            &[&provider.as_str(), &event_id],
        )
        .await?;
        Ok(())
    }

    // ========================================================================
    // ADMIN
    // ========================================================================

    async fn user_delete_all(&self, user_id: UserId) -> ApiResult<DeletionReport> {
        let subject = SubjectKey::User(user_id).to_string();
        let by_user: [(&str, &str); 7] = [
            ("user_subscriptions", "DELETE FROM user_subscriptions WHERE user_id = $1"),
            ("crypto_subscriptions", "DELETE FROM crypto_subscriptions WHERE user_id = $1"),
            ("crypto_charges", "DELETE FROM crypto_charges WHERE user_id = $1"),
            ("founders_circle", "DELETE FROM founders_circle WHERE user_id = $1"),
            ("voice_wallets", "DELETE FROM voice_wallets WHERE user_id = $1"),
            ("voice_credit_ledger", "DELETE FROM voice_credit_ledger WHERE user_id = $1"),
            ("orders", "DELETE FROM orders WHERE user_id = $1"),
        ];
        let by_subject: [(&str, &str); 4] = [
            ("rate_limits", "DELETE FROM rate_limits WHERE subject = $1"),
            ("tips", "DELETE FROM tips WHERE subject = $1"),
            ("page_views", "DELETE FROM page_views WHERE subject = $1"),
            ("active_sessions", "DELETE FROM active_sessions WHERE subject = $1"),
        ];

        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let mut report = DeletionReport::new();
        for (table, sql) in by_user {
            let removed = tx.execute(sql, &[&user_id]).await?;
            report.insert(table.to_string(), removed);
        }
        for (table, sql) in by_subject {
            let removed = tx.execute(sql, &[&subject]).await?;
            report.insert(table.to_string(), removed);
        }
        tx.commit().await?;

        tracing::info!(user_id = %user_id, tables = report.len(), "Deleted user data");
        Ok(report)
    }
}
