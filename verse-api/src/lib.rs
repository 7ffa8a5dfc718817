//! Verse API - REST layer for the companion platform
//!
//! Axum routes for identity, daily quotas, entitlements, the VerseCoin
//! wallet, tips, the Founders' Circle, email suppression and analytics, plus
//! signed webhooks from Stripe, Coinbase Commerce, Resend and Gumroad.
//!
//! Persistence goes through the [`Store`] trait, implemented for Postgres
//! ([`PgStore`]) and in memory ([`MemoryStore`]).

mod macros;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod memory;
pub mod middleware;
pub mod notify;
pub mod openapi;
pub mod payments;
pub mod routes;
pub mod signature;
pub mod state;
pub mod store;
pub mod telemetry;

pub use auth::{encode_session_token, resolve_identity, AuthConfig, SupabaseClaims};
pub use config::{ApiConfig, ServiceConfig};
pub use db::{DbConfig, PgStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use memory::MemoryStore;
pub use middleware::{IdentityExtractor, RequireSubject, RequireUser};
pub use notify::{AdminEvent, Notifier, SlackNotifier};
pub use openapi::ApiDoc;
pub use payments::{PaymentGateway, PaymentIntent, PaymentIntentRequest, StripeGateway};
pub use routes::create_api_router;
pub use state::AppState;
pub use store::{Store, WebhookProvider};
