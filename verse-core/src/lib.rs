//! Verse core domain types
//!
//! Pure data and rules for the companion platform backend: who is asking,
//! what they are entitled to, how many messages they have left today and
//! what their VerseCoin wallet holds. Nothing in this crate performs I/O.

pub mod billing;
pub mod character;
pub mod clock;
pub mod entitlements;
pub mod error;
pub mod founders;
pub mod identity;
pub mod ledger;
pub mod quota;
pub mod tier;
pub mod tips;

use chrono::{DateTime, Utc};

/// Timestamp type used throughout.
pub type Timestamp = DateTime<Utc>;

pub use billing::{
    default_coin_packs, extend_crypto_expiry, ChargeStatus, CoinPack, CryptoCharge,
    CryptoSubscription, Order, OrderKind, PaymentProvider, SubscriptionRecord, CRYPTO_PERIOD_DAYS,
};
pub use character::{Character, CharacterCatalog};
pub use clock::{Clock, FixedClock, SystemClock};
pub use entitlements::{resolve_entitlements, EntitlementInputs, Entitlements};
pub use error::{
    CatalogError, ConfigError, LedgerError, ValidationError, VerseError, VerseResult,
};
pub use founders::{seats_remaining, FounderClaim, FounderSeat};
pub use identity::{AnonymousId, Identity, IdentitySource, SubjectKey, UserId};
pub use ledger::{
    apply_credit, apply_debit, balance_from_entries, validate_amount, CreditOutcome,
    DebitOutcome, LedgerEntry, LedgerKind, MAX_LEDGER_AMOUNT,
};
pub use quota::{next_reset, usage_day, IncrementOutcome, QuotaPolicy, QuotaStatus};
pub use tier::{EntitlementSource, SubscriptionStatus, Tier};
pub use tips::{Tip, TipPolicy, TipStatus};
