//! VerseCoin ledger rules.
//!
//! The wallet balance is the sum of an append-only ledger. Stores keep a
//! materialized balance next to the ledger and must apply the same checks as
//! [`apply_debit`] and [`apply_credit`] atomically.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::identity::UserId;
use crate::Timestamp;

/// Largest single credit or debit accepted.
pub const MAX_LEDGER_AMOUNT: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Credit,
    Debit,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Credit => "credit",
            LedgerKind::Debit => "debit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(LedgerKind::Credit),
            "debit" => Some(LedgerKind::Debit),
            _ => None,
        }
    }
}

/// One row of `voice_credit_ledger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    /// Signed change: positive for credits, negative for debits.
    pub delta: i64,
    pub balance_after: i64,
    pub kind: LedgerKind,
    pub reason: String,
    /// Idempotency key or payment reference, unique per user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

/// Outcome of a debit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited(LedgerEntry),
    /// Same reference seen before; the original entry is returned unchanged.
    Replayed(LedgerEntry),
    Insufficient { balance: i64 },
}

/// Outcome of a credit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited(LedgerEntry),
    Replayed(LedgerEntry),
}

impl CreditOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            CreditOutcome::Credited(e) | CreditOutcome::Replayed(e) => e,
        }
    }
}

/// Reject zero, negative and oversized amounts.
pub fn validate_amount(amount: i64) -> Result<i64, LedgerError> {
    if amount <= 0 || amount > MAX_LEDGER_AMOUNT {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(amount)
}

/// New balance after a debit, or why it cannot happen.
pub fn apply_debit(balance: i64, amount: i64) -> Result<i64, LedgerError> {
    let amount = validate_amount(amount)?;
    if balance < amount {
        return Err(LedgerError::InsufficientBalance {
            balance,
            requested: amount,
        });
    }
    Ok(balance - amount)
}

/// New balance after a credit.
pub fn apply_credit(balance: i64, amount: i64) -> Result<i64, LedgerError> {
    let amount = validate_amount(amount)?;
    balance.checked_add(amount).ok_or(LedgerError::Overflow)
}

/// Balance implied by a set of ledger entries.
pub fn balance_from_entries(entries: &[LedgerEntry]) -> i64 {
    entries.iter().map(|e| e.delta).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate_amount_bounds() {
        assert!(validate_amount(0).is_err());
        assert!(validate_amount(-5).is_err());
        assert!(validate_amount(MAX_LEDGER_AMOUNT + 1).is_err());
        assert_eq!(validate_amount(1), Ok(1));
        assert_eq!(validate_amount(MAX_LEDGER_AMOUNT), Ok(MAX_LEDGER_AMOUNT));
    }

    #[test]
    fn test_debit_requires_funds() {
        assert_eq!(apply_debit(100, 40), Ok(60));
        assert_eq!(apply_debit(40, 40), Ok(0));
        assert_eq!(
            apply_debit(39, 40),
            Err(LedgerError::InsufficientBalance {
                balance: 39,
                requested: 40
            })
        );
    }

    #[test]
    fn test_credit_overflow() {
        assert_eq!(apply_credit(i64::MAX, 1), Err(LedgerError::Overflow));
        assert_eq!(apply_credit(10, 5), Ok(15));
    }

    #[test]
    fn test_ledger_kind_parse() {
        assert_eq!(LedgerKind::parse("credit"), Some(LedgerKind::Credit));
        assert_eq!(LedgerKind::parse(LedgerKind::Debit.as_str()), Some(LedgerKind::Debit));
        assert_eq!(LedgerKind::parse("refund"), None);
    }

    proptest! {
        #[test]
        fn prop_balance_never_negative(
            ops in prop::collection::vec((any::<bool>(), 1i64..5_000), 0..64)
        ) {
            let mut balance = 0i64;
            for (is_credit, amount) in ops {
                let next = if is_credit {
                    apply_credit(balance, amount)
                } else {
                    apply_debit(balance, amount)
                };
                if let Ok(b) = next {
                    balance = b;
                }
                prop_assert!(balance >= 0);
            }
        }
    }
}
