//! Request identity.
//!
//! Every request resolves to exactly one [`Identity`]: a verified user, an
//! anonymous visitor carrying a client-generated id, or nobody. Usage quotas
//! are counted against a [`SubjectKey`] derived from the identity.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Supabase auth user id.
pub type UserId = Uuid;

static ANONYMOUS_ID_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{8,128}$").ok());

/// Client-generated anonymous visitor id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AnonymousId(String);

impl AnonymousId {
    /// Parse an anonymous id, accepting `[A-Za-z0-9_-]{8,128}`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let valid = ANONYMOUS_ID_PATTERN
            .as_ref()
            .map(|re| re.is_match(trimmed))
            .unwrap_or(false);
        if !valid {
            return Err(ValidationError::InvalidValue {
                field: "anonymousId".to_string(),
                reason: "expected 8-128 characters of [A-Za-z0-9_-]".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AnonymousId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AnonymousId> for String {
    fn from(value: AnonymousId) -> Self {
        value.0
    }
}

impl fmt::Display for AnonymousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Authenticated,
    Anonymous,
    None,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Authenticated => "authenticated",
            IdentitySource::Anonymous => "anonymous",
            IdentitySource::None => "none",
        }
    }
}

/// Resolved identity of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Verified Supabase session.
    Authenticated {
        user_id: UserId,
        email: Option<String>,
        role: Option<String>,
    },
    /// Visitor identified by a client-supplied id.
    Anonymous { anonymous_id: AnonymousId },
    /// No usable credentials.
    None,
}

impl Identity {
    pub fn source(&self) -> IdentitySource {
        match self {
            Identity::Authenticated { .. } => IdentitySource::Authenticated,
            Identity::Anonymous { .. } => IdentitySource::Anonymous,
            Identity::None => IdentitySource::None,
        }
    }

    /// Authenticated user id, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::Authenticated { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Identity::Authenticated { email, .. } => email.as_deref(),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated { .. })
    }

    /// The key quotas are counted against.
    pub fn subject(&self) -> Option<SubjectKey> {
        match self {
            Identity::Authenticated { user_id, .. } => Some(SubjectKey::User(*user_id)),
            Identity::Anonymous { anonymous_id } => {
                Some(SubjectKey::Anonymous(anonymous_id.clone()))
            }
            Identity::None => None,
        }
    }

    /// Identifier reported back to clients (`userId` in responses).
    pub fn display_id(&self) -> Option<String> {
        match self {
            Identity::Authenticated { user_id, .. } => Some(user_id.to_string()),
            Identity::Anonymous { anonymous_id } => Some(anonymous_id.to_string()),
            Identity::None => None,
        }
    }
}

/// Key usage counters are stored under: `user:<uuid>` or `anon:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SubjectKey {
    User(UserId),
    Anonymous(AnonymousId),
}

impl SubjectKey {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, SubjectKey::Anonymous(_))
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            SubjectKey::User(id) => Some(*id),
            SubjectKey::Anonymous(_) => None,
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKey::User(id) => write!(f, "user:{}", id),
            SubjectKey::Anonymous(id) => write!(f, "anon:{}", id),
        }
    }
}

impl FromStr for SubjectKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("user:") {
            let id = Uuid::parse_str(rest).map_err(|e| ValidationError::InvalidValue {
                field: "subject".to_string(),
                reason: e.to_string(),
            })?;
            return Ok(SubjectKey::User(id));
        }
        if let Some(rest) = s.strip_prefix("anon:") {
            return AnonymousId::parse(rest).map(SubjectKey::Anonymous);
        }
        Err(ValidationError::InvalidValue {
            field: "subject".to_string(),
            reason: format!("unknown subject prefix in '{}'", s),
        })
    }
}

impl TryFrom<String> for SubjectKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubjectKey> for String {
    fn from(value: SubjectKey) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_id_accepts_client_ids() {
        assert!(AnonymousId::parse("anon_1234abcd").is_ok());
        assert!(AnonymousId::parse("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert_eq!(
            AnonymousId::parse("  padded-id-123  ").map(|id| id.to_string()),
            Ok("padded-id-123".to_string())
        );
    }

    #[test]
    fn test_anonymous_id_rejects_garbage() {
        assert!(AnonymousId::parse("").is_err());
        assert!(AnonymousId::parse("short").is_err());
        assert!(AnonymousId::parse("has spaces in it").is_err());
        assert!(AnonymousId::parse("semi;colon;injection").is_err());
        assert!(AnonymousId::parse(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_identity_source_and_subject() {
        let user_id = Uuid::now_v7();
        let identity = Identity::Authenticated {
            user_id,
            email: Some("fan@example.com".to_string()),
            role: None,
        };
        assert_eq!(identity.source(), IdentitySource::Authenticated);
        assert_eq!(identity.subject(), Some(SubjectKey::User(user_id)));
        assert_eq!(identity.email(), Some("fan@example.com"));

        let anon = Identity::Anonymous {
            anonymous_id: AnonymousId::parse("visitor-0001").unwrap(),
        };
        assert_eq!(anon.source(), IdentitySource::Anonymous);
        assert!(anon.user_id().is_none());
        assert_eq!(anon.display_id().as_deref(), Some("visitor-0001"));

        assert_eq!(Identity::None.subject(), None);
        assert_eq!(Identity::None.source(), IdentitySource::None);
    }

    #[test]
    fn test_subject_key_roundtrip() {
        let user = SubjectKey::User(Uuid::nil());
        let text = user.to_string();
        assert_eq!(text, "user:00000000-0000-0000-0000-000000000000");
        assert_eq!(text.parse::<SubjectKey>(), Ok(user));

        let anon: SubjectKey = "anon:visitor-0001".parse().unwrap();
        assert!(anon.is_anonymous());
        assert!("bot:1234".parse::<SubjectKey>().is_err());
    }

    #[test]
    fn test_identity_source_serialization() {
        let json = serde_json::to_string(&IdentitySource::Anonymous).unwrap();
        assert_eq!(json, "\"anonymous\"");
    }
}
