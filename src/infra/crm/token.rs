//! OAuth client-credentials token cache.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::ExternalServiceError;
use crate::infra::http::OutboundClient;

/// Refresh this long before the provider-reported expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    900
}

#[derive(Debug)]
struct CachedToken {
    value: SecretString,
    refresh_at: Instant,
}

/// Caches one bearer token and refreshes it on demand.
#[derive(Debug)]
pub(crate) struct TokenCache {
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub(crate) fn new(token_url: String, client_id: String, client_secret: SecretString) -> Self {
        Self {
            token_url,
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }
    }

    /// Current token, fetching a new one when absent or close to expiry.
    ///
    /// Concurrent callers wait on the same refresh instead of each
    /// requesting a token.
    pub(crate) async fn bearer(
        &self,
        client: &OutboundClient,
    ) -> Result<SecretString, ExternalServiceError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        debug!(url = %self.token_url, "Requesting CRM access token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        let request = client.http().post(&self.token_url).form(&form);
        let response: TokenResponse = client.send_json(request).await?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        let value = SecretString::from(response.access_token);
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        info!(expires_in = response.expires_in, "CRM access token refreshed");
        Ok(value)
    }

    /// Drop the cached token so the next call re-authenticates.
    pub(crate) async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_defaults_expiry() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(parsed.expires_in, 900);
    }

    #[tokio::test]
    async fn test_invalidate_clears_cache() {
        let cache = TokenCache::new(
            "http://localhost/token".to_string(),
            "id".to_string(),
            SecretString::from("secret"),
        );
        *cache.cached.lock().await = Some(CachedToken {
            value: SecretString::from("tok"),
            refresh_at: Instant::now() + Duration::from_secs(60),
        });
        cache.invalidate().await;
        assert!(cache.cached.lock().await.is_none());
    }
}
