//! Authentication Module
//!
//! Resolves the identity of a request:
//! 1. Supabase session token (`Authorization: Bearer <jwt>` or the
//!    `sb-access-token` cookie) for signed-in users
//! 2. `x-user-id` header for anonymous visitors
//! 3. Nobody
//!
//! Supabase tokens are HS256 JWTs signed with the project secret. Signature
//! and audience are checked by `jsonwebtoken`; expiry is checked here against
//! the injected [`Clock`] so tests can pin time.

use crate::error::{ApiError, ApiResult};
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use verse_core::{AnonymousId, Clock, ConfigError, Identity, SystemClock, VerseError};

/// Cookie Supabase auth helpers store the access token in.
pub const SESSION_COOKIE: &str = "sb-access-token";

/// Header carrying the client-generated anonymous id.
pub const ANONYMOUS_HEADER: &str = "x-user-id";

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// Supabase JWT secret that never shows up in logs.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// # Errors
    /// Returns error if the secret is empty.
    pub fn new(secret: String) -> Result<Self, VerseError> {
        if secret.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "jwt_secret".to_string(),
            }
            .into());
        }
        Ok(Self(SecretString::from(secret)))
    }

    /// Expose the secret value (only for cryptographic operations).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

fn build_jwt_secret(secret_str: String) -> JwtSecret {
    let normalized = if secret_str.trim().is_empty() {
        INSECURE_DEFAULT_SECRET.to_string()
    } else {
        secret_str
    };
    JwtSecret::new(normalized)
        .unwrap_or_else(|_| JwtSecret(SecretString::from(INSECURE_DEFAULT_SECRET.to_string())))
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Supabase project JWT secret
    pub jwt_secret: JwtSecret,

    /// Expected `aud` claim (Supabase uses "authenticated")
    pub jwt_audience: String,

    /// Clock skew tolerance in seconds (default: 60)
    pub jwt_clock_skew_secs: i64,

    /// Keys accepted in `x-admin-key` for admin routes
    pub admin_keys: HashSet<String>,

    /// Clock for token time validation (injected for testing)
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_audience", &self.jwt_audience)
            .field("jwt_clock_skew_secs", &self.jwt_clock_skew_secs)
            .field("admin_keys", &format!("[{} keys]", self.admin_keys.len()))
            .field("clock", &"<Clock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: build_jwt_secret(
                std::env::var("VERSE_SUPABASE_JWT_SECRET").unwrap_or_default(),
            ),
            jwt_audience: "authenticated".to_string(),
            jwt_clock_skew_secs: 60,
            admin_keys: HashSet::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// - `VERSE_SUPABASE_JWT_SECRET` (or `SUPABASE_JWT_SECRET`): token signing secret
    /// - `VERSE_JWT_AUDIENCE`: expected audience (default: "authenticated")
    /// - `VERSE_JWT_CLOCK_SKEW_SECS`: clock skew tolerance (default: 60)
    /// - `VERSE_ADMIN_KEYS`: comma-separated admin keys
    pub fn from_env() -> Self {
        let secret_str = std::env::var("VERSE_SUPABASE_JWT_SECRET")
            .or_else(|_| std::env::var("SUPABASE_JWT_SECRET"))
            .unwrap_or_default();

        let admin_keys = std::env::var("VERSE_ADMIN_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            jwt_secret: build_jwt_secret(secret_str),
            jwt_audience: std::env::var("VERSE_JWT_AUDIENCE")
                .unwrap_or_else(|_| "authenticated".to_string()),
            jwt_clock_skew_secs: std::env::var("VERSE_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            admin_keys,
            clock: Arc::new(SystemClock),
        }
    }

    /// Refuse insecure secrets when `VERSE_ENVIRONMENT=production`; warn otherwise.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("VERSE_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();
        let is_production = environment == "production" || environment == "prod";

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(
                    "Cannot start in production without VERSE_SUPABASE_JWT_SECRET",
                ));
            }
            tracing::warn!(
                "Using insecure default JWT secret. Set VERSE_SUPABASE_JWT_SECRET \
                 before deploying."
            );
        } else if self.jwt_secret.len() < 32 {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT secret is too short for production use ({} chars)",
                    self.jwt_secret.len()
                )));
            }
            tracing::warn!(chars = self.jwt_secret.len(), "JWT secret is short");
        }

        if is_production && self.admin_keys.iter().any(|k| k.len() < 24) {
            return Err(ApiError::invalid_input(
                "Admin keys must be at least 24 characters in production",
            ));
        }

        Ok(())
    }

    /// Constant-time admin key check.
    pub fn is_admin_key(&self, candidate: &str) -> bool {
        self.admin_keys
            .iter()
            .any(|key| crate::signature::constant_time_eq(key.as_bytes(), candidate.as_bytes()))
    }
}

// ============================================================================
// SUPABASE CLAIMS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Claims carried by a Supabase access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupabaseClaims {
    /// User UUID
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Postgres role ("authenticated")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub app_metadata: AppMetadata,
}

impl SupabaseClaims {
    /// Claims for `user_id` valid for `ttl_secs` from the clock's now.
    pub fn new(user_id: Uuid, email: Option<String>, ttl_secs: i64, clock: &dyn Clock) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            sub: user_id.to_string(),
            exp: now + ttl_secs,
            iat: Some(now),
            aud: Some("authenticated".to_string()),
            email,
            role: Some("authenticated".to_string()),
            app_metadata: AppMetadata::default(),
        }
    }

    pub fn with_app_role(mut self, role: impl Into<String>) -> Self {
        self.app_metadata.role = Some(role.into());
        self
    }

    pub fn user_id(&self) -> ApiResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| ApiError::invalid_token("Token subject is not a user id"))
    }
}

// ============================================================================
// TOKEN VALIDATION
// ============================================================================

/// Check `exp` with clock skew tolerance.
fn validate_claim_times(now: i64, exp: i64, leeway_secs: i64) -> ApiResult<()> {
    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

/// Validate a Supabase access token and return its claims.
///
/// Signature and audience are checked by `jsonwebtoken`; expiry is checked
/// against `config.clock`.
pub fn validate_session_token(config: &AuthConfig, token: &str) -> ApiResult<SupabaseClaims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.set_audience(&[config.jwt_audience.as_str()]);
    validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);

    let token_data = decode::<SupabaseClaims>(token, &decoding_key, &validation).map_err(|e| {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                ApiError::invalid_token("Token audience is invalid")
            }
            _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
        }
    })?;

    let claims = token_data.claims;
    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(timestamp = now, "System clock returned pre-epoch time");
        return Err(ApiError::internal_error("Server time configuration error"));
    }
    validate_claim_times(now, claims.exp, config.jwt_clock_skew_secs)?;

    Ok(claims)
}

/// Sign claims with the configured secret. Used by tests and local tooling.
pub fn encode_session_token(config: &AuthConfig, claims: &SupabaseClaims) -> ApiResult<String> {
    let encoding_key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to sign token: {}", e)))
}

// ============================================================================
// IDENTITY RESOLUTION
// ============================================================================

/// Bearer token from `Authorization`. Other schemes (a proxy's `Basic`
/// credentials, say) are not ours to judge and are skipped.
fn bearer_token(headers: &HeaderMap) -> ApiResult<Option<&str>> {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(None);
    };
    let (scheme, token) = value.trim().split_once(' ').unwrap_or((value.trim(), ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        tracing::debug!(scheme, "Ignoring non-bearer Authorization header");
        return Ok(None);
    }
    match token.trim() {
        "" => Err(ApiError::invalid_token("Bearer token is empty")),
        token => Ok(Some(token)),
    }
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

fn identity_from_claims(claims: SupabaseClaims) -> ApiResult<Identity> {
    let user_id = claims.user_id()?;
    Ok(Identity::Authenticated {
        user_id,
        email: claims.email,
        role: claims.app_metadata.role,
    })
}

/// Resolve the identity of a request from its headers.
///
/// A bearer token that fails validation is an error. A stale session cookie
/// is ignored so signed-out browsers fall back to their anonymous id.
pub fn resolve_identity(config: &AuthConfig, headers: &HeaderMap) -> ApiResult<Identity> {
    if let Some(token) = bearer_token(headers)? {
        let claims = validate_session_token(config, token)?;
        return identity_from_claims(claims);
    }

    if let Some(token) = cookie_token(headers) {
        match validate_session_token(config, token).and_then(identity_from_claims) {
            Ok(identity) => return Ok(identity),
            Err(err) => tracing::debug!(error = %err, "Ignoring unusable session cookie"),
        }
    }

    if let Some(raw) = headers.get(ANONYMOUS_HEADER).and_then(|v| v.to_str().ok()) {
        match AnonymousId::parse(raw) {
            Ok(anonymous_id) => return Ok(Identity::Anonymous { anonymous_id }),
            Err(err) => tracing::debug!(error = %err, "Ignoring malformed anonymous id"),
        }
    }

    Ok(Identity::None)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use verse_core::{FixedClock, IdentitySource};

    const NOW: i64 = 1_704_067_200;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: JwtSecret::new("test_secret_that_is_long_enough_123".to_string())
                .expect("test secret should be valid"),
            jwt_audience: "authenticated".to_string(),
            jwt_clock_skew_secs: 60,
            admin_keys: HashSet::from(["admin-key-for-tests-0000000".to_string()]),
            clock: Arc::new(FixedClock::from_epoch_secs(NOW)),
        }
    }

    fn token_for(config: &AuthConfig, user_id: Uuid, ttl: i64) -> String {
        let claims = SupabaseClaims::new(
            user_id,
            Some("fan@example.com".to_string()),
            ttl,
            config.clock.as_ref(),
        );
        encode_session_token(config, &claims).expect("token should encode")
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).expect("header name"),
                HeaderValue::from_str(value).expect("header value"),
            );
        }
        map
    }

    #[test]
    fn test_bearer_token_authenticates() {
        let config = test_config();
        let user_id = Uuid::now_v7();
        let token = token_for(&config, user_id, 3600);
        let identity =
            resolve_identity(&config, &headers(&[("authorization", &format!("Bearer {token}"))]))
                .expect("identity");
        assert_eq!(identity.user_id(), Some(user_id));
        assert_eq!(identity.email(), Some("fan@example.com"));
    }

    #[test]
    fn test_cookie_token_authenticates() {
        let config = test_config();
        let user_id = Uuid::now_v7();
        let token = token_for(&config, user_id, 3600);
        let identity = resolve_identity(
            &config,
            &headers(&[("cookie", &format!("theme=dark; {SESSION_COOKIE}={token}"))]),
        )
        .expect("identity");
        assert_eq!(identity.user_id(), Some(user_id));
    }

    #[test]
    fn test_invalid_bearer_is_rejected() {
        let config = test_config();
        let err = resolve_identity(
            &config,
            &headers(&[("authorization", "Bearer not.a.jwt"), ("x-user-id", "visitor-0001")]),
        )
        .expect_err("invalid token must not fall back");
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);

        let err = resolve_identity(&config, &headers(&[("authorization", "Bearer ")]))
            .expect_err("empty bearer");
        assert_eq!(err.code, crate::error::ErrorCode::InvalidToken);
    }

    #[test]
    fn test_other_auth_schemes_fall_through() {
        let config = test_config();
        let identity = resolve_identity(
            &config,
            &headers(&[("authorization", "Basic dXNlcjpwYXNz"), ("x-user-id", "visitor-0001")]),
        )
        .expect("identity");
        assert_eq!(identity.source(), IdentitySource::Anonymous);

        let identity =
            resolve_identity(&config, &headers(&[("authorization", "Basic abc")])).expect("identity");
        assert_eq!(identity, Identity::None);

        let user_id = Uuid::now_v7();
        let token = token_for(&config, user_id, 3600);
        let identity =
            resolve_identity(&config, &headers(&[("authorization", &format!("bearer {token}"))]))
                .expect("identity");
        assert_eq!(identity.user_id(), Some(user_id));
    }

    #[test]
    fn test_expired_token_respects_skew() {
        let config = test_config();
        let user_id = Uuid::now_v7();

        let within_skew = token_for(&config, user_id, -30);
        assert!(validate_session_token(&config, &within_skew).is_ok());

        let expired = token_for(&config, user_id, -120);
        let err = validate_session_token(&config, &expired).expect_err("expired");
        assert_eq!(err.code, crate::error::ErrorCode::TokenExpired);
    }

    #[test]
    fn test_wrong_secret_and_audience() {
        let config = test_config();
        let other = AuthConfig {
            jwt_secret: JwtSecret::new("another_secret_entirely_different".to_string())
                .expect("secret"),
            ..test_config()
        };
        let token = token_for(&other, Uuid::now_v7(), 3600);
        assert!(validate_session_token(&config, &token).is_err());

        let mut claims = SupabaseClaims::new(Uuid::now_v7(), None, 3600, config.clock.as_ref());
        claims.aud = Some("service_role".to_string());
        let token = encode_session_token(&config, &claims).expect("token");
        assert!(validate_session_token(&config, &token).is_err());
    }

    #[test]
    fn test_anonymous_and_none() {
        let config = test_config();
        let identity =
            resolve_identity(&config, &headers(&[("x-user-id", "visitor-0001")])).expect("identity");
        assert_eq!(identity.source(), IdentitySource::Anonymous);

        let identity = resolve_identity(&config, &headers(&[("x-user-id", "bad id!")])).expect("identity");
        assert_eq!(identity.source(), IdentitySource::None);

        let identity = resolve_identity(&config, &HeaderMap::new()).expect("identity");
        assert_eq!(identity, Identity::None);
    }

    #[test]
    fn test_stale_cookie_falls_back_to_anonymous() {
        let config = test_config();
        let identity = resolve_identity(
            &config,
            &headers(&[("cookie", "sb-access-token=garbage"), ("x-user-id", "visitor-0001")]),
        )
        .expect("identity");
        assert_eq!(identity.source(), IdentitySource::Anonymous);
    }

    #[test]
    fn test_app_metadata_role() {
        let config = test_config();
        let claims = SupabaseClaims::new(Uuid::now_v7(), None, 3600, config.clock.as_ref())
            .with_app_role("admin");
        let token = encode_session_token(&config, &claims).expect("token");
        let identity =
            resolve_identity(&config, &headers(&[("authorization", &format!("Bearer {token}"))]))
                .expect("identity");
        assert!(matches!(identity, Identity::Authenticated { role: Some(ref r), .. } if r == "admin"));
    }

    #[test]
    fn test_admin_key_check() {
        let config = test_config();
        assert!(config.is_admin_key("admin-key-for-tests-0000000"));
        assert!(!config.is_admin_key("admin-key-for-tests-0000001"));
        assert!(!config.is_admin_key(""));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let config = test_config();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("test_secret_that_is_long_enough_123"));
        assert!(debug.contains("REDACTED"));
    }
}
