//! OpenAPI document for the Verse API, generated from route annotations and
//! the schema types they reference.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::routes::{
    admin, analytics, auth, email, entitlements, founders, health, rate_limit, tips, versecoins,
    webhooks,
};
use crate::telemetry;

use verse_core::{
    Character, CoinPack, EntitlementSource, Entitlements, FounderSeat, IdentitySource, LedgerEntry,
    LedgerKind, QuotaStatus, SubscriptionStatus, Tier, TipStatus,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Verse API",
        version = "0.3.0",
        description = "Backend for the Verse companion platform: identity, quotas, entitlements, VerseCoins, tips, Founders' Circle and provider webhooks",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
        contact(name = "Verse", url = "https://verse.chat")
    ),
    servers(
        (url = "https://api.verse.chat", description = "Production"),
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Auth", description = "Caller identity and anonymous session merge"),
        (name = "Rate Limit", description = "Daily message quotas"),
        (name = "Entitlements", description = "Tier and capabilities per character"),
        (name = "VerseCoins", description = "Wallet balance, debits and coin purchases"),
        (name = "Tips", description = "Tips to characters"),
        (name = "Founders", description = "Founders' Circle seats"),
        (name = "Email", description = "Unsubscribe links"),
        (name = "Analytics", description = "Page views and session heartbeats"),
        (name = "Admin", description = "Operator tooling"),
        (name = "Webhooks", description = "Stripe, Coinbase Commerce, Resend and Gumroad callbacks"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Monitoring", description = "Prometheus metrics")
    ),
    paths(
        auth::whoami,
        auth::merge_anonymous,
        rate_limit::check,
        rate_limit::status,
        entitlements::get_entitlements,
        versecoins::balance,
        versecoins::debit,
        versecoins::purchase,
        tips::create_tip,
        founders::status,
        founders::claim,
        email::unsubscribe,
        analytics::pageview,
        analytics::heartbeat,
        admin::delete_user,
        webhooks::stripe,
        webhooks::coinbase,
        webhooks::resend,
        webhooks::gumroad,
        health::ping,
        health::liveness,
        health::readiness,
        telemetry::metrics::metrics_handler,
    ),
    components(
        schemas(
            ApiError, ErrorCode,

            auth::WhoAmIResponse, auth::MergeAnonymousRequest, auth::MergeAnonymousResponse,
            rate_limit::CheckRequest,
            entitlements::EntitlementsResponse,
            versecoins::BalanceResponse, versecoins::DebitRequest, versecoins::DebitResponse,
            versecoins::InsufficientFundsResponse, versecoins::PurchaseRequest,
            versecoins::PurchaseResponse,
            tips::PayWith, tips::CreateTipRequest, tips::CreateTipResponse,
            founders::FoundersStatusResponse, founders::ClaimRequest, founders::ClaimResponse,
            email::UnsubscribeResponse,
            analytics::PageViewRequest, analytics::HeartbeatRequest,
            admin::DeleteUserResponse,
            webhooks::WebhookAck,
            health::LivenessReport, health::ReadinessReport, health::ProbeStatus,
            health::StoreProbe, health::Integrations,

            Tier, SubscriptionStatus, EntitlementSource, Entitlements, QuotaStatus,
            IdentitySource, LedgerKind, LedgerEntry, FounderSeat, TipStatus, CoinPack, Character
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            // Supabase session JWT
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Supabase session token"))
                        .build(),
                ),
            );

            components.add_security_scheme(
                "admin_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-admin-key"))),
            );
        }
    }
}

impl ApiDoc {
    /// Generate the document as pretty JSON.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();

        assert_eq!(openapi.info.title, "Verse API");
        let servers = openapi
            .servers
            .as_ref()
            .ok_or_else(|| "OpenAPI servers missing".to_string())?;
        assert_eq!(servers.len(), 2);

        let tags = openapi
            .tags
            .as_ref()
            .ok_or_else(|| "OpenAPI tags missing".to_string())?;
        assert!(tags.iter().any(|t| t.name == "VerseCoins"));
        assert!(tags.iter().any(|t| t.name == "Webhooks"));
        Ok(())
    }

    #[test]
    fn test_user_ids_are_documented_as_uuid_strings() -> Result<(), String> {
        let doc = serde_json::to_value(ApiDoc::openapi()).map_err(|e| e.to_string())?;
        let schemas = &doc["components"]["schemas"];
        for schema in ["LedgerEntry", "FounderSeat"] {
            let user_id = &schemas[schema]["properties"]["userId"];
            assert_eq!(user_id["type"], "string", "{}", schema);
            assert_eq!(user_id["format"], "uuid", "{}", schema);
        }
        assert_eq!(schemas["DeleteUserResponse"]["properties"]["deleted"]["type"], "object");
        Ok(())
    }

    #[test]
    fn test_openapi_paths_cover_client_routes() {
        let openapi = ApiDoc::openapi();
        for path in [
            "/api/auth/whoami",
            "/api/rate-limit/check",
            "/api/entitlements",
            "/api/versecoins/debit",
            "/api/tips/create",
            "/api/founders/claim",
            "/api/email/unsubscribe",
            "/api/analytics/pageview",
            "/api/admin/users/{user_id}",
            "/api/webhooks/stripe",
            "/health/ready",
            "/metrics",
        ] {
            assert!(openapi.paths.paths.contains_key(path), "missing path {}", path);
        }
    }

    #[test]
    fn test_security_schemes_registered() -> Result<(), String> {
        let openapi = ApiDoc::openapi();
        let components = openapi
            .components
            .as_ref()
            .ok_or_else(|| "components missing".to_string())?;
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.security_schemes.contains_key("admin_key"));
        Ok(())
    }

    #[test]
    fn test_to_json() -> Result<(), serde_json::Error> {
        let json = ApiDoc::to_json()?;
        let value: serde_json::Value = serde_json::from_str(&json)?;
        assert_eq!(value["info"]["title"], "Verse API");
        Ok(())
    }
}
