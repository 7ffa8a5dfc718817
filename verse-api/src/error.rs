//! API error type.
//!
//! Handlers return [`ApiResult`]. A failure renders as
//! `{ "error": "...", "code": "...", "details": ... }` with the status chosen by
//! its [`ErrorCode`]. Store and upstream failures are logged in full here and
//! reach the client only as a generic message.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use verse_core::{CatalogError, ConfigError, LedgerError, ValidationError, VerseError};

/// Machine-readable failure code, serialized in SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 401 / 403
    Unauthorized,
    Forbidden,
    InvalidToken,
    TokenExpired,
    /// Provider webhook signature missing, stale or wrong.
    InvalidSignature,

    // 400
    ValidationFailed,
    InvalidInput,
    MissingField,
    InvalidRange,
    InvalidFormat,

    // 402
    InsufficientFunds,

    // 404
    NotFound,
    CharacterNotFound,

    // 409
    FoundersFull,
    BalanceOverflow,
    /// Ledger reference already used by an entry of another kind.
    ReferenceConflict,

    // 429
    TooManyRequests,

    // 5xx
    InternalError,
    DatabaseError,
    /// Stripe or another outbound provider failed.
    UpstreamError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        use ErrorCode::*;
        match self {
            Unauthorized | InvalidToken | TokenExpired | InvalidSignature => StatusCode::UNAUTHORIZED,
            Forbidden => StatusCode::FORBIDDEN,
            ValidationFailed | InvalidInput | MissingField | InvalidRange | InvalidFormat => {
                StatusCode::BAD_REQUEST
            }
            InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            NotFound | CharacterNotFound => StatusCode::NOT_FOUND,
            FoundersFull | BalanceOverflow | ReferenceConflict => StatusCode::CONFLICT,
            TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            UpstreamError => StatusCode::BAD_GATEWAY,
            ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            InternalError | DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message used when the caller gives none.
    pub fn default_message(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            Unauthorized => "Sign in or identify this visitor first",
            Forbidden => "Not allowed",
            InvalidToken => "Session token could not be verified",
            TokenExpired => "Session token has expired",
            InvalidSignature => "Webhook signature did not verify",
            ValidationFailed => "Request failed validation",
            InvalidInput => "Request could not be understood",
            MissingField => "A required field is missing",
            InvalidRange => "A value is outside the allowed range",
            InvalidFormat => "A value is badly formatted",
            InsufficientFunds => "Not enough VerseCoins",
            NotFound => "Not found",
            CharacterNotFound => "Unknown character",
            FoundersFull => "Every Founders' Circle seat is taken",
            BalanceOverflow => "Wallet balance would overflow",
            ReferenceConflict => "That key was already used for a different wallet operation",
            TooManyRequests => "Slow down",
            InternalError => "Something went wrong",
            DatabaseError => "Storage is unavailable",
            UpstreamError => "Payment provider request failed",
            ServiceUnavailable => "Temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiError {
    pub error: String,
    pub code: ErrorCode,
    /// Structured context: balances, seat counts, validation reasons.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code,
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn token_expired() -> Self {
        Self::from_code(ErrorCode::TokenExpired)
    }

    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSignature, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("`{}` is required", field))
            .with_details(serde_json::json!({ "field": field }))
    }

    pub fn invalid_range(field: &str, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidRange,
            format!("`{}` must be from {} to {}", field, min, max),
        )
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("`{}` is not a {}", field, expected),
        )
    }

    /// 402 carrying the balance so the client can offer a top-up.
    pub fn insufficient_funds(balance: i64, requested: i64) -> Self {
        Self::from_code(ErrorCode::InsufficientFunds)
            .with_details(serde_json::json!({ "balance": balance, "requested": requested }))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn character_not_found(key: impl fmt::Display) -> Self {
        Self::new(ErrorCode::CharacterNotFound, format!("No character named '{}'", key))
    }

    pub fn founders_full(character_key: &str, seats_total: u32) -> Self {
        Self::from_code(ErrorCode::FoundersFull).with_details(serde_json::json!({
            "characterKey": character_key,
            "seatsTotal": seats_total,
        }))
    }

    pub fn reference_conflict() -> Self {
        Self::from_code(ErrorCode::ReferenceConflict)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Request throttle hit. The middleware also sets `Retry-After`.
    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        let err = Self::from_code(ErrorCode::TooManyRequests);
        match retry_after_secs {
            Some(secs) => err.with_details(serde_json::json!({ "retryAfterSecs": secs })),
            None => err,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.error)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        let sqlstate = err.code().map(|c| c.code().to_string());
        tracing::error!(error = ?err, sqlstate = ?sqlstate, "Postgres query failed");
        ApiError::from_code(ErrorCode::DatabaseError)
    }
}

impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!(error = ?err, "Could not get a Postgres connection");
        match err {
            deadpool_postgres::PoolError::Timeout(_) | deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Storage is busy, try again shortly")
            }
            _ => ApiError::from_code(ErrorCode::DatabaseError),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::warn!(error = %err, "Payload did not parse");
        ApiError::invalid_input(format!("Malformed JSON: {}", err))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!(error = ?err, status = ?err.status(), "Outbound provider call failed");
        ApiError::from_code(ErrorCode::UpstreamError)
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", "UUID").with_details(serde_json::json!({ "reason": err.to_string() }))
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match &err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(field),
            ValidationError::OutOfRange { field, min, max, .. } => {
                ApiError::invalid_range(field, min, max)
            }
            ValidationError::InvalidValue { .. } => ApiError::validation_failed(err.to_string()),
        }
    }
}

impl From<VerseError> for ApiError {
    fn from(err: VerseError) -> Self {
        match err {
            VerseError::Validation(e) => e.into(),
            VerseError::Ledger(LedgerError::InsufficientBalance { balance, requested }) => {
                ApiError::insufficient_funds(balance, requested)
            }
            VerseError::Ledger(e @ LedgerError::InvalidAmount { .. }) => {
                ApiError::invalid_range("amount", 1, verse_core::MAX_LEDGER_AMOUNT)
                    .with_details(serde_json::json!({ "reason": e.to_string() }))
            }
            VerseError::Ledger(LedgerError::Overflow) => ApiError::from_code(ErrorCode::BalanceOverflow),
            VerseError::Catalog(CatalogError::UnknownCharacter { key }) => {
                ApiError::character_not_found(key)
            }
            VerseError::Catalog(e) => ApiError::internal_error(e.to_string()),
            VerseError::Config(e @ ConfigError::MissingRequired { .. })
            | VerseError::Config(e @ ConfigError::InvalidValue { .. }) => {
                tracing::error!(error = %e, "Configuration error");
                ApiError::internal_error("Server misconfigured")
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        VerseError::from(err).into()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
