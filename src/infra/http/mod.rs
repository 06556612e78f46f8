//! Outbound HTTP plumbing shared by every external client.
//!
//! All calls to a given upstream go through [`OutboundClient::send`], which
//! serializes them through the shared [`RateLimiter`] under the upstream's
//! key and retries rate-limit responses with [`RetryExecutor`].

pub mod rate_limiter;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::error;

use crate::domain::{AppError, ExternalServiceError};

pub use rate_limiter::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy, parse_retry_after};

/// Default per-request timeout for outbound calls
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a `reqwest` client with the relay's defaults.
pub fn build_http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fulfillment-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            AppError::ExternalService(ExternalServiceError::Configuration(format!(
                "failed to build HTTP client: {}",
                e
            )))
        })
}

/// Rate-limited, retrying HTTP client bound to one upstream key
#[derive(Debug, Clone)]
pub struct OutboundClient {
    http: Client,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    key: String,
    min_interval: Duration,
    max_retries: u32,
}

impl OutboundClient {
    #[must_use]
    pub fn new(
        http: Client,
        limiter: Arc<RateLimiter>,
        retry: RetryExecutor,
        key: impl Into<String>,
        min_interval: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            http,
            limiter,
            retry,
            key: key.into(),
            min_interval,
            max_retries,
        }
    }

    /// Underlying client, for building requests
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Rate-limiter key this client is bound to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Send through the rate limiter and retry executor.
    ///
    /// The returned response may still be a 429 when the retry budget ran
    /// out; use [`OutboundClient::send_json`] to turn that into an error.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ExternalServiceError> {
        let retry = self.retry;
        let max_retries = self.max_retries;
        let response = self
            .limiter
            .enqueue(&self.key, self.min_interval, || {
                retry.fetch_with_retry(request, max_retries)
            })
            .await?;
        Ok(response)
    }

    /// Send and map non-success statuses onto [`ExternalServiceError`].
    pub async fn send_checked(
        &self,
        request: RequestBuilder,
    ) -> Result<Response, ExternalServiceError> {
        let response = self.send(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExternalServiceError::RateLimited(self.key.clone()));
        }

        let body = response.text().await.unwrap_or_default();
        error!(upstream = %self.key, status = %status, body = %body, "Upstream returned error");
        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
            return Err(ExternalServiceError::Unavailable(format!(
                "{} returned {}",
                self.key, status
            )));
        }
        Err(ExternalServiceError::ApiError {
            status_code: status.as_u16(),
            message: body,
        })
    }

    /// Send, require success, and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ExternalServiceError> {
        let response = self.send_checked(request).await?;
        response.json::<T>().await.map_err(|e| {
            error!(upstream = %self.key, error = %e, "Failed to parse upstream response");
            ExternalServiceError::ParseError(e.to_string())
        })
    }
}
