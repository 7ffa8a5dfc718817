//! Tips sent to characters.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identity::SubjectKey;
use crate::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum TipStatus {
    Pending,
    Succeeded,
    Failed,
}

impl TipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipStatus::Pending => "pending",
            TipStatus::Succeeded => "succeeded",
            TipStatus::Failed => "failed",
        }
    }

    /// Card payments can succeed after a decline; a paid tip never moves.
    pub fn can_settle_to(&self, next: TipStatus) -> bool {
        match (self, next) {
            (TipStatus::Pending, TipStatus::Succeeded | TipStatus::Failed) => true,
            (TipStatus::Failed, TipStatus::Succeeded) => true,
            _ => false,
        }
    }
}

impl FromStr for TipStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TipStatus::Pending),
            "succeeded" => Ok(TipStatus::Succeeded),
            "failed" => Ok(TipStatus::Failed),
            other => Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("unknown tip status '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tip {
    pub id: Uuid,
    pub subject: SubjectKey,
    pub character_key: String,
    pub amount_cents: i64,
    pub message: Option<String>,
    pub status: TipStatus,
    pub payment_intent_id: Option<String>,
    pub created_at: Timestamp,
}

/// Bounds applied to tip requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipPolicy {
    pub min_cents: i64,
    pub max_cents: i64,
    pub max_message_chars: usize,
}

impl Default for TipPolicy {
    fn default() -> Self {
        Self {
            min_cents: 100,
            max_cents: 50_000,
            max_message_chars: 500,
        }
    }
}

impl TipPolicy {
    /// Validate amount and message; blank messages become `None`.
    pub fn validate(
        &self,
        amount_cents: i64,
        message: Option<&str>,
    ) -> Result<Option<String>, ValidationError> {
        if amount_cents < self.min_cents || amount_cents > self.max_cents {
            return Err(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: self.min_cents,
                max: self.max_cents,
                got: amount_cents,
            });
        }
        let message = message.map(str::trim).filter(|m| !m.is_empty());
        if let Some(m) = message {
            if m.chars().count() > self.max_message_chars {
                return Err(ValidationError::InvalidValue {
                    field: "message".to_string(),
                    reason: format!("must be at most {} characters", self.max_message_chars),
                });
            }
        }
        Ok(message.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tip_amount_bounds() {
        let policy = TipPolicy::default();
        assert!(policy.validate(99, None).is_err());
        assert!(policy.validate(50_001, None).is_err());
        assert_eq!(policy.validate(100, None), Ok(None));
        assert_eq!(policy.validate(50_000, Some("  thanks! ")), Ok(Some("thanks!".to_string())));
    }

    #[test]
    fn test_tip_message_length_counts_chars() {
        let policy = TipPolicy::default();
        let ok = "é".repeat(500);
        assert!(policy.validate(500, Some(&ok)).is_ok());
        let too_long = "x".repeat(501);
        assert!(matches!(
            policy.validate(500, Some(&too_long)),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert_eq!(policy.validate(500, Some("   ")), Ok(None));
    }

    #[test]
    fn test_tip_settlement_transitions() {
        use TipStatus::*;
        assert!(Pending.can_settle_to(Succeeded));
        assert!(Pending.can_settle_to(Failed));
        assert!(Failed.can_settle_to(Succeeded));
        assert!(!Succeeded.can_settle_to(Failed));
        assert!(!Succeeded.can_settle_to(Pending));
        assert!(!Failed.can_settle_to(Pending));
    }

    #[test]
    fn test_tip_status_round_trip() {
        for status in [TipStatus::Pending, TipStatus::Succeeded, TipStatus::Failed] {
            assert_eq!(status.as_str().parse::<TipStatus>(), Ok(status));
        }
    }
}
