//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use verse_core::{Clock, Timestamp};

use crate::auth::AuthConfig;
use crate::config::{ApiConfig, ServiceConfig};
use crate::error::ApiResult;
use crate::middleware::ThrottleState;
use crate::notify::{Notifier, SlackNotifier};
use crate::payments::{PaymentGateway, StripeGateway};
use crate::store::Store;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: Arc<AuthConfig>,
    pub services: Arc<ServiceConfig>,
    pub api: Arc<ApiConfig>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    /// Same clock the auth layer validates tokens against.
    pub clock: Arc<dyn Clock>,
    pub throttle: ThrottleState,
    pub start_time: Instant,
}

impl AppState {
    /// Assemble state with explicit collaborators (tests swap in fakes here).
    pub fn new(
        store: Arc<dyn Store>,
        auth: AuthConfig,
        services: ServiceConfig,
        api: ApiConfig,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let api = Arc::new(api);
        let clock = auth.clock.clone();
        Self {
            store,
            auth: Arc::new(auth),
            services: Arc::new(services),
            throttle: ThrottleState::new(api.clone()),
            api,
            payments,
            notifier,
            clock,
            start_time: Instant::now(),
        }
    }

    /// Production wiring: Stripe gateway and Slack notifier from `services`.
    pub fn with_default_integrations(
        store: Arc<dyn Store>,
        auth: AuthConfig,
        services: ServiceConfig,
        api: ApiConfig,
    ) -> ApiResult<Self> {
        let payments = Arc::new(StripeGateway::new(
            services.stripe_api_base.clone(),
            services.stripe_secret_key.clone(),
        )?);
        let notifier = Arc::new(SlackNotifier::new(services.slack_webhook_url.clone()));
        Ok(Self::new(store, auth, services, api, payments, notifier))
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

crate::impl_from_ref!(Arc<dyn Store>, store);
crate::impl_from_ref!(Arc<AuthConfig>, auth);
crate::impl_from_ref!(Arc<ServiceConfig>, services);
crate::impl_from_ref!(ThrottleState, throttle);
crate::impl_from_ref!(Instant, start_time);
