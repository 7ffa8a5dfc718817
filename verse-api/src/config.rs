//! API Configuration Module
//!
//! CORS, request throttling and business settings (quotas, tip bounds,
//! provider secrets, coin packs, character catalog). Everything is read from
//! environment variables with development defaults.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use verse_core::{
    default_coin_packs, CharacterCatalog, CoinPack, ConfigError, QuotaPolicy, TipPolicy,
    VerseResult,
};

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_secret(keys: &[&str]) -> Option<SecretString> {
    keys.iter()
        .find_map(|k| env_string(k))
        .map(SecretString::from)
}

fn env_list(key: &str) -> Vec<String> {
    env_string(key)
        .map(|s| {
            s.split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS and request throttling.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://lexi.chat,https://*.verse.chat"
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Request Throttling
    // ========================================================================
    /// Whether the per-IP / per-user throttle is enabled.
    pub throttle_enabled: bool,

    /// Requests per minute per IP, for everyone without a verified session.
    pub throttle_per_ip: u32,

    /// Requests per minute per signed-in user.
    pub throttle_per_subject: u32,

    /// Burst capacity on top of the steady rate.
    pub throttle_burst: u32,

    pub throttle_window: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,

            throttle_enabled: true,
            throttle_per_ip: 120,
            throttle_per_subject: 300,
            throttle_burst: 20,
            throttle_window: Duration::from_secs(60),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// - `VERSE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `VERSE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `VERSE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `VERSE_THROTTLE_ENABLED`: "true" or "false" (default: true)
    /// - `VERSE_THROTTLE_PER_IP`: Requests per minute per IP (default: 120)
    /// - `VERSE_THROTTLE_PER_SUBJECT`: Requests per minute per subject (default: 300)
    /// - `VERSE_THROTTLE_BURST`: Burst capacity (default: 20)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cors_origins: env_list("VERSE_CORS_ORIGINS"),
            cors_allow_credentials: env_string("VERSE_CORS_ALLOW_CREDENTIALS")
                .map(|s| s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_max_age_secs: env_parse("VERSE_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs),
            throttle_enabled: env_string("VERSE_THROTTLE_ENABLED")
                .map(|s| !s.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            throttle_per_ip: env_parse("VERSE_THROTTLE_PER_IP", defaults.throttle_per_ip),
            throttle_per_subject: env_parse(
                "VERSE_THROTTLE_PER_SUBJECT",
                defaults.throttle_per_subject,
            ),
            throttle_burst: env_parse("VERSE_THROTTLE_BURST", defaults.throttle_burst),
            throttle_window: defaults.throttle_window,
        }
    }

    /// Strict CORS is in effect when origins are configured.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // *.verse.chat
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain
                        .strip_suffix(pattern)
                        .is_some_and(|prefix| prefix.ends_with('.'))
                        || origin_domain == pattern;
                }
            }
            false
        })
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Business settings and third-party credentials.
#[derive(Clone)]
pub struct ServiceConfig {
    pub quota: QuotaPolicy,
    pub tips: TipPolicy,
    pub catalog: Arc<CharacterCatalog>,
    pub coin_packs: Vec<CoinPack>,

    /// Stripe API key used to create payment intents.
    pub stripe_secret_key: Option<SecretString>,
    pub stripe_api_base: String,
    /// `whsec_...` signing secret for Stripe webhooks.
    pub stripe_webhook_secret: Option<SecretString>,
    /// Coinbase Commerce shared webhook secret.
    pub coinbase_webhook_secret: Option<SecretString>,
    /// Svix signing secret (`whsec_<base64>`) for Resend webhooks.
    pub resend_webhook_secret: Option<SecretString>,
    /// Gumroad pings are only honoured for this seller.
    pub gumroad_seller_id: Option<String>,
    /// Accepted clock drift for timestamped webhook signatures.
    pub webhook_tolerance_secs: i64,

    /// HMAC key for unsubscribe tokens.
    pub unsubscribe_secret: Option<SecretString>,

    /// Slack-compatible incoming webhook for admin notifications.
    pub slack_webhook_url: Option<String>,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |s: &Option<SecretString>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("ServiceConfig")
            .field("quota", &self.quota)
            .field("tips", &self.tips)
            .field("characters", &self.catalog.len())
            .field("coin_packs", &self.coin_packs.len())
            .field("stripe_secret_key", &redacted(&self.stripe_secret_key))
            .field("stripe_api_base", &self.stripe_api_base)
            .field("stripe_webhook_secret", &redacted(&self.stripe_webhook_secret))
            .field("coinbase_webhook_secret", &redacted(&self.coinbase_webhook_secret))
            .field("resend_webhook_secret", &redacted(&self.resend_webhook_secret))
            .field("gumroad_seller_id", &self.gumroad_seller_id)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("unsubscribe_secret", &redacted(&self.unsubscribe_secret))
            .field("slack_webhook_url", &self.slack_webhook_url.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            quota: QuotaPolicy::default(),
            tips: TipPolicy::default(),
            catalog: Arc::new(CharacterCatalog::builtin()),
            coin_packs: default_coin_packs(),
            stripe_secret_key: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
            stripe_webhook_secret: None,
            coinbase_webhook_secret: None,
            resend_webhook_secret: None,
            gumroad_seller_id: None,
            webhook_tolerance_secs: 300,
            unsubscribe_secret: None,
            slack_webhook_url: None,
        }
    }
}

impl ServiceConfig {
    /// Load from environment variables.
    ///
    /// - `VERSE_QUOTA_ANONYMOUS_DAILY` / `VERSE_QUOTA_FREE_DAILY`
    /// - `VERSE_TIP_MIN_CENTS` / `VERSE_TIP_MAX_CENTS`
    /// - `VERSE_CHARACTERS_FILE`: TOML catalog (built-in catalog when unset)
    /// - `VERSE_COIN_PACKS`: JSON array of coin packs
    /// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`
    /// - `COINBASE_COMMERCE_WEBHOOK_SECRET`, `RESEND_WEBHOOK_SECRET`
    /// - `GUMROAD_SELLER_ID`
    /// - `VERSE_UNSUBSCRIBE_SECRET`, `SLACK_WEBHOOK_URL`
    pub fn from_env() -> VerseResult<Self> {
        let defaults = Self::default();

        let catalog = match env_string("VERSE_CHARACTERS_FILE") {
            Some(path) => {
                let source = std::fs::read_to_string(&path).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: "VERSE_CHARACTERS_FILE".to_string(),
                        value: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Arc::new(CharacterCatalog::from_toml(&source)?)
            }
            None => defaults.catalog,
        };

        let coin_packs = match env_string("VERSE_COIN_PACKS") {
            Some(raw) => serde_json::from_str::<Vec<CoinPack>>(&raw).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "VERSE_COIN_PACKS".to_string(),
                    value: "<json>".to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => defaults.coin_packs,
        };

        Ok(Self {
            quota: QuotaPolicy {
                anonymous_daily: env_parse(
                    "VERSE_QUOTA_ANONYMOUS_DAILY",
                    defaults.quota.anonymous_daily,
                ),
                free_daily: env_parse("VERSE_QUOTA_FREE_DAILY", defaults.quota.free_daily),
            },
            tips: TipPolicy {
                min_cents: env_parse("VERSE_TIP_MIN_CENTS", defaults.tips.min_cents),
                max_cents: env_parse("VERSE_TIP_MAX_CENTS", defaults.tips.max_cents),
                ..defaults.tips
            },
            catalog,
            coin_packs,
            stripe_secret_key: env_secret(&["STRIPE_SECRET_KEY", "VERSE_STRIPE_SECRET_KEY"]),
            stripe_api_base: env_string("VERSE_STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
            stripe_webhook_secret: env_secret(&["STRIPE_WEBHOOK_SECRET"]),
            coinbase_webhook_secret: env_secret(&["COINBASE_COMMERCE_WEBHOOK_SECRET"]),
            resend_webhook_secret: env_secret(&["RESEND_WEBHOOK_SECRET"]),
            gumroad_seller_id: env_string("GUMROAD_SELLER_ID"),
            webhook_tolerance_secs: env_parse(
                "VERSE_WEBHOOK_TOLERANCE_SECS",
                defaults.webhook_tolerance_secs,
            ),
            unsubscribe_secret: env_secret(&["VERSE_UNSUBSCRIBE_SECRET"]),
            slack_webhook_url: env_string("SLACK_WEBHOOK_URL"),
        })
    }

    pub fn coin_pack(&self, id: &str) -> Option<&CoinPack> {
        self.coin_packs.iter().find(|p| p.id == id)
    }

    pub fn coin_pack_for_gumroad(&self, product: &str) -> Option<&CoinPack> {
        self.coin_packs
            .iter()
            .find(|p| p.gumroad_product.as_deref() == Some(product))
    }
}
