//! HTTP router configuration.

use std::env;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::{
    ApiDoc, confirm_booking_handler, email_webhook_handler, get_fulfillment_request_handler,
    health_check_handler, list_fulfillment_requests_handler, liveness_handler,
    payment_webhook_handler, readiness_handler, retry_fulfillment_handler,
};
use crate::app::AppState;
use crate::domain::{ErrorDetail, RateLimitResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Webhook payloads carry attachment metadata only, never content
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Inbound request rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_second: NonZeroU32,
    pub burst_size: NonZeroU32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: NonZeroU32::new(20).unwrap_or(NonZeroU32::MIN),
            burst_size: NonZeroU32::new(40).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl RateLimitConfig {
    /// Read `RATE_LIMIT_RPS` and `RATE_LIMIT_BURST`; zero or unparsable
    /// values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str| {
            env::var(name)
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .and_then(NonZeroU32::new)
        };
        Self {
            requests_per_second: read("RATE_LIMIT_RPS").unwrap_or(defaults.requests_per_second),
            burst_size: read("RATE_LIMIT_BURST").unwrap_or(defaults.burst_size),
        }
    }

    fn limiter(&self) -> DefaultDirectRateLimiter {
        RateLimiter::direct(Quota::per_second(self.requests_per_second).allow_burst(self.burst_size))
    }
}

async fn rate_limit_middleware(
    State(limiter): State<Arc<DefaultDirectRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.check().is_ok() {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Inbound rate limit exceeded");
    let body = RateLimitResponse {
        error: ErrorDetail {
            r#type: "rate_limited".to_string(),
            message: "Too many requests".to_string(),
        },
        retry_after: 1,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    response
}

fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/email", post(email_webhook_handler))
        .route("/webhooks/payment", post(payment_webhook_handler))
        .route("/bookings/confirm", post(confirm_booking_handler))
        .route("/fulfillment-requests", get(list_fulfillment_requests_handler))
        .route("/fulfillment-requests/{key}", get(get_fulfillment_request_handler))
        .route(
            "/fulfillment-requests/{key}/retry",
            post(retry_fulfillment_handler),
        )
        .with_state(state)
}

fn health_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}

fn finish(api: Router, state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api)
        .merge(health_routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Router without inbound rate limiting
pub fn create_router(state: Arc<AppState>) -> Router {
    finish(api_routes(Arc::clone(&state)), state)
}

/// Router with a global token bucket in front of the API routes. Health
/// probes are never limited.
pub fn create_router_with_rate_limit(state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let limiter = Arc::new(config.limiter());
    let api = api_routes(Arc::clone(&state))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    finish(api, state)
}
