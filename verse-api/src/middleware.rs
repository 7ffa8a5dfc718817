//! Request middleware and extractors.
//!
//! - [`identity_middleware`] resolves every request to an [`Identity`] and
//!   stores it in the request extensions.
//! - [`IdentityExtractor`], [`RequireSubject`] and [`RequireUser`] read it
//!   back in handlers.
//! - [`throttle_middleware`] applies per-IP / per-user request throttling.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    NotUntil, Quota, RateLimiter,
};
use verse_core::{Identity, SubjectKey, UserId};

use crate::auth::{resolve_identity, AuthConfig};
use crate::config::ApiConfig;
use crate::error::ApiError;

// ============================================================================
// IDENTITY
// ============================================================================

/// Resolve the caller and attach the [`Identity`] to the request.
///
/// A bad bearer token fails the request with 401; everything else resolves
/// to some identity, possibly [`Identity::None`].
pub async fn identity_middleware(
    State(auth): State<Arc<AuthConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = resolve_identity(&auth, request.headers())?;
    tracing::Span::current().record("identity", identity.source().as_str());
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// The resolved identity of the request, whatever it is.
#[derive(Debug, Clone)]
pub struct IdentityExtractor(pub Identity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for IdentityExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(IdentityExtractor)
            .ok_or_else(|| {
                ApiError::internal_error(
                    "Identity not found in request extensions. \
                     Ensure identity_middleware is applied to this route.",
                )
            })
    }
}

impl std::ops::Deref for IdentityExtractor {
    type Target = Identity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A quota subject: an authenticated user or an anonymous visitor. 401 otherwise.
#[derive(Debug, Clone)]
pub struct RequireSubject {
    pub identity: Identity,
    pub subject: SubjectKey,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireSubject
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let IdentityExtractor(identity) = IdentityExtractor::from_request_parts(parts, state).await?;
        let subject = identity.subject().ok_or_else(|| {
            ApiError::unauthorized("Sign in or send an x-user-id header to continue")
        })?;
        Ok(Self { identity, subject })
    }
}

/// An authenticated user. 401 for anonymous and unidentified callers.
#[derive(Debug, Clone)]
pub struct RequireUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let IdentityExtractor(identity) = IdentityExtractor::from_request_parts(parts, state).await?;
        match identity.user_id() {
            Some(user_id) => Ok(Self {
                user_id,
                email: identity.email().map(str::to_string),
            }),
            None => Err(ApiError::unauthorized("Authentication required")),
        }
    }
}

// ============================================================================
// REQUEST THROTTLING
// ============================================================================

type KeyedLimiter<K> = governor::DefaultKeyedRateLimiter<K>;

/// Throttle bucket key.
///
/// `x-user-id` is chosen by the client, so anonymous callers share the
/// bucket of their IP. Only a verified session gets a bucket of its own.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ThrottleKey {
    Ip(IpAddr),
    User(UserId),
}

impl ThrottleKey {
    fn resolve(identity: Option<&Identity>, ip: Option<IpAddr>) -> Option<Self> {
        match identity.and_then(Identity::user_id) {
            Some(user_id) => Some(ThrottleKey::User(user_id)),
            None => ip.map(ThrottleKey::Ip),
        }
    }
}

/// Shared limiter registry.
#[derive(Clone)]
pub struct ThrottleState {
    config: Arc<ApiConfig>,
    by_ip: Arc<KeyedLimiter<IpAddr>>,
    by_user: Arc<KeyedLimiter<UserId>>,
}

impl ThrottleState {
    pub fn new(config: Arc<ApiConfig>) -> Self {
        let by_ip = RateLimiter::keyed(quota(&config, config.throttle_per_ip));
        let by_user = RateLimiter::keyed(quota(&config, config.throttle_per_subject));
        Self {
            config,
            by_ip: Arc::new(by_ip),
            by_user: Arc::new(by_user),
        }
    }

    fn requests_per_window(&self, key: &ThrottleKey) -> u32 {
        match key {
            ThrottleKey::Ip(_) => self.config.throttle_per_ip,
            ThrottleKey::User(_) => self.config.throttle_per_subject,
        }
    }

    fn check(&self, key: &ThrottleKey) -> Result<(), NotUntil<<DefaultClock as Clock>::Instant>> {
        match key {
            ThrottleKey::Ip(ip) => self.by_ip.check_key(ip),
            ThrottleKey::User(user_id) => self.by_user.check_key(user_id),
        }
    }

    /// Drop buckets that have refilled completely; they hold no state a
    /// fresh bucket wouldn't.
    pub fn evict_idle(&self) {
        self.by_ip.retain_recent();
        self.by_user.retain_recent();
        self.by_ip.shrink_to_fit();
        self.by_user.shrink_to_fit();
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.by_ip.len() + self.by_user.len()
    }

    /// Run [`Self::evict_idle`] once per throttle window until the task is
    /// dropped.
    pub fn spawn_janitor(&self) -> tokio::task::JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let period = state.config.throttle_window.max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let before = state.bucket_count();
                state.evict_idle();
                tracing::trace!(
                    before,
                    after = state.bucket_count(),
                    "Evicted idle throttle buckets"
                );
            }
        })
    }
}

fn quota(config: &ApiConfig, requests_per_window: u32) -> Quota {
    let per_window = NonZeroU32::new(requests_per_window).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.throttle_burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(config.throttle_window / per_window.get())
        .unwrap_or_else(|| Quota::per_minute(per_window))
        .allow_burst(burst)
}

/// Throttled request.
pub struct ThrottleRejection {
    pub retry_after: u64,
}

impl IntoResponse for ThrottleRejection {
    fn into_response(self) -> Response {
        let error = ApiError::too_many_requests(Some(self.retry_after));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(error)).into_response();
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );
        response
    }
}

/// Client IP, preferring proxy headers over the socket address.
pub fn extract_client_ip(request: &Request, fallback: Option<SocketAddr>) -> Option<IpAddr> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    };

    if let Some(forwarded_for) = header("x-forwarded-for") {
        if let Some(ip) = forwarded_for
            .split(',')
            .next()
            .and_then(|first| first.trim().parse().ok())
        {
            return Some(ip);
        }
    }
    if let Some(ip) = header("x-real-ip").and_then(|v| v.trim().parse().ok()) {
        return Some(ip);
    }
    fallback.map(|addr| addr.ip())
}

/// Per-IP / per-user throttle. Runs after [`identity_middleware`].
pub async fn throttle_middleware(
    State(state): State<ThrottleState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ThrottleRejection> {
    if !state.config.throttle_enabled {
        return Ok(next.run(request).await);
    }

    let ip = extract_client_ip(&request, connect_info.map(|ConnectInfo(addr)| addr));
    // No way to attribute the request (in-process callers).
    let Some(key) = ThrottleKey::resolve(request.extensions().get::<Identity>(), ip) else {
        return Ok(next.run(request).await);
    };

    match state.check(&key) {
        Ok(()) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(state.requests_per_window(&key)),
            );
            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1);
            tracing::debug!(key = ?key, retry_after, "Request throttled");
            Err(ThrottleRejection { retry_after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn throttled_app(config: ApiConfig) -> Router {
        throttled(config).0
    }

    fn throttled(config: ApiConfig) -> (Router, ThrottleState) {
        let state = ThrottleState::new(Arc::new(config));
        let auth = Arc::new(AuthConfig::default());
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), throttle_middleware))
            .layer(middleware::from_fn_with_state(auth, identity_middleware));
        (app, state)
    }

    fn request_from(ip: &str, subject: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip);
        if let Some(s) = subject {
            builder = builder.header("x-user-id", s);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn signed_in_from(ip: &str, user_id: UserId) -> axum::http::Request<Body> {
        let auth = AuthConfig::default();
        let claims = crate::auth::SupabaseClaims::new(user_id, None, 3600, &verse_core::SystemClock);
        let token = crate::auth::encode_session_token(&auth, &claims).unwrap();
        axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_throttle_rejects_after_burst() {
        let app = throttled_app(ApiConfig {
            throttle_per_ip: 1,
            throttle_burst: 2,
            throttle_window: Duration::from_secs(3600),
            ..ApiConfig::default()
        });

        for _ in 0..2 {
            let res = app.clone().oneshot(request_from("10.0.0.1", None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert!(res.headers().contains_key("x-ratelimit-limit"));
        }
        let res = app.clone().oneshot(request_from("10.0.0.1", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));

        // A different IP has its own bucket.
        let res = app.oneshot(request_from("10.0.0.2", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_signed_in_user_bucket_is_separate_from_ip() {
        let app = throttled_app(ApiConfig {
            throttle_per_ip: 1,
            throttle_per_subject: 1,
            throttle_burst: 1,
            throttle_window: Duration::from_secs(3600),
            ..ApiConfig::default()
        });

        let res = app.clone().oneshot(request_from("10.0.0.9", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let user = uuid::Uuid::new_v4();
        let res = app.clone().oneshot(signed_in_from("10.0.0.9", user)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app.oneshot(signed_in_from("10.0.0.10", user)).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_rotating_anonymous_ids_share_the_ip_bucket() {
        let (app, state) = throttled(ApiConfig {
            throttle_per_ip: 10,
            throttle_burst: 10,
            throttle_window: Duration::from_secs(3600),
            ..ApiConfig::default()
        });

        let mut passed = 0;
        for i in 0..200 {
            let visitor = format!("visitor-{:06}", i);
            let res = app.clone().oneshot(request_from("10.0.0.7", Some(&visitor))).await.unwrap();
            if res.status() == StatusCode::OK {
                passed += 1;
            }
        }
        assert_eq!(passed, 10);
        assert_eq!(state.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_idle_buckets_are_evicted() {
        let (app, state) = throttled(ApiConfig {
            throttle_per_ip: 1000,
            throttle_burst: 1,
            throttle_window: Duration::from_millis(100),
            ..ApiConfig::default()
        });

        for ip in ["10.0.1.1", "10.0.1.2", "10.0.1.3"] {
            let res = app.clone().oneshot(request_from(ip, None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        assert_eq!(state.bucket_count(), 3);

        // One cell refills in 100µs.
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.evict_idle();
        assert_eq!(state.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_throttle_passes_everything() {
        let app = throttled_app(ApiConfig {
            throttle_enabled: false,
            throttle_per_ip: 1,
            throttle_burst: 1,
            ..ApiConfig::default()
        });
        for _ in 0..5 {
            let res = app.clone().oneshot(request_from("10.0.0.3", None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_extract_client_ip_prefers_forwarded_for() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .header("x-real-ip", "198.51.100.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            extract_client_ip(&request, None),
            Some("203.0.113.5".parse().unwrap())
        );

        let request = axum::http::Request::builder().body(Body::empty()).unwrap();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(extract_client_ip(&request, Some(addr)), Some(addr.ip()));
        assert_eq!(extract_client_ip(&request, None), None);
    }
}
