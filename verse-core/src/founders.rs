//! Founders' Circle: the first N subscribers of a character keep a locked price.

use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::Timestamp;

/// A claimed founder seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct FounderSeat {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    pub character_key: String,
    /// 1-based, unique per character.
    pub seat_number: u32,
    pub locked_price_cents: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub claimed_at: Timestamp,
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FounderClaim {
    Claimed(FounderSeat),
    AlreadyMember(FounderSeat),
    Full { seats_total: u32 },
}

/// Seats still open for a character.
pub fn seats_remaining(seats_total: u32, seats_taken: u32) -> u32 {
    seats_total.saturating_sub(seats_taken)
}
