//! Retry-with-backoff executor for single outbound HTTP calls.
//!
//! Only rate-limit responses (HTTP 429) are retried. The delay honours a
//! `Retry-After` hint when the upstream sends one, otherwise grows as
//! `base_delay * 2^attempt`. Once the budget is spent the last 429 response
//! is handed back rather than turned into an error, so callers choose
//! between degrading ("skip this attachment") and aborting.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

/// Backoff timing for [`RetryExecutor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry when no hint is given
    pub base_delay: Duration,
    /// Upper bound for any single wait, hinted or computed
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// 1s, 2s, 4s, ... capped at one minute
    pub const DEFAULT: Self = Self {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
    };

    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Computed delay for a zero-indexed retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Parse a `Retry-After` header expressed in (possibly fractional) seconds.
///
/// HTTP-date values are ignored and fall back to computed backoff.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = raw.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

/// Issues a request, retrying only on rate-limit responses
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, retrying up to `max_retries` times on HTTP 429.
    ///
    /// Any other status is returned immediately. Transport errors are
    /// returned as `Err` without retry. A request whose body cannot be
    /// cloned is sent exactly once.
    pub async fn fetch_with_retry(
        &self,
        request: RequestBuilder,
        max_retries: u32,
    ) -> Result<Response, reqwest::Error> {
        let mut pending = request;
        let mut attempt = 0u32;

        loop {
            let spare = if attempt < max_retries {
                pending.try_clone()
            } else {
                None
            };

            let response = pending.send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let Some(next) = spare else {
                warn!(
                    url = %response.url(),
                    attempts = attempt + 1,
                    "Rate limit persisted after retry budget, returning last response"
                );
                return Ok(response);
            };

            let delay = self.delay_for(response.headers(), attempt);
            warn!(
                url = %response.url(),
                attempt = attempt + 1,
                max_retries = max_retries,
                delay_ms = delay.as_millis() as u64,
                "Upstream rate limited, backing off"
            );
            drop(response);
            tokio::time::sleep(delay).await;

            pending = next;
            attempt += 1;
        }
    }

    fn delay_for(&self, headers: &HeaderMap, attempt: u32) -> Duration {
        match parse_retry_after(headers) {
            Some(hint) => hint.min(self.policy.max_delay),
            None => self.policy.delay_for_attempt(attempt),
        }
    }
}
