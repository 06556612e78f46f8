//! Checkout-session lookups against the payment gateway's REST API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use crate::domain::{AppError, ExternalServiceError, PaymentGateway, PaymentSession};
use crate::infra::http::OutboundClient;

/// Default payment API base URL
pub const DEFAULT_PAYMENT_API_URL: &str = "https://api.stripe.com";

/// Payment gateway backed by the hosted checkout API
#[derive(Debug, Clone)]
pub struct StripePaymentGateway {
    client: OutboundClient,
    api_key: SecretString,
    base_url: String,
}

impl StripePaymentGateway {
    /// Create a gateway client.
    ///
    /// # Arguments
    /// * `client` - Outbound client bound to the `payment` rate-limit key
    /// * `api_key` - Secret API key, sent as a bearer token
    /// * `base_url` - Optional API base URL. Defaults to the production API.
    pub fn new(client: OutboundClient, api_key: SecretString, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_PAYMENT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client,
            api_key,
            base_url,
        }
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/v1/checkout/sessions/{}", self.base_url, session_id)
    }
}

#[async_trait]
impl PaymentGateway for StripePaymentGateway {
    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<PaymentSession, AppError> {
        if session_id.trim().is_empty() || session_id.contains('/') {
            return Err(AppError::Validation(
                crate::domain::ValidationError::InvalidField {
                    field: "session_id".to_string(),
                    message: "malformed session id".to_string(),
                },
            ));
        }

        let url = self.session_url(session_id);
        debug!(url = %url, "Retrieving checkout session");

        let request = self
            .client
            .http()
            .get(&url)
            .bearer_auth(self.api_key.expose_secret());

        match self.client.send_json::<PaymentSession>(request).await {
            Ok(session) => Ok(session),
            Err(ExternalServiceError::ApiError {
                status_code: 404, ..
            }) => Err(AppError::ResourceNotFound(format!(
                "checkout session {}",
                session_id
            ))),
            Err(e) => Err(AppError::ExternalService(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::http::{RateLimiter, RetryExecutor, build_http_client};
    use std::sync::Arc;
    use std::time::Duration;

    fn gateway(base_url: Option<String>) -> StripePaymentGateway {
        let client = OutboundClient::new(
            build_http_client(Duration::from_secs(5)).unwrap(),
            Arc::new(RateLimiter::new()),
            RetryExecutor::default(),
            "payment",
            Duration::ZERO,
            0,
        );
        StripePaymentGateway::new(client, SecretString::from("sk_test_x"), base_url)
    }

    #[test]
    fn test_session_url_trims_trailing_slash() {
        let gw = gateway(Some("http://localhost:9000/".to_string()));
        assert_eq!(
            gw.session_url("cs_test_1"),
            "http://localhost:9000/v1/checkout/sessions/cs_test_1"
        );
    }

    #[test]
    fn test_default_base_url() {
        let gw = gateway(None);
        assert!(gw.session_url("cs_1").starts_with(DEFAULT_PAYMENT_API_URL));
    }

    #[tokio::test]
    async fn test_rejects_path_like_session_id() {
        let gw = gateway(Some("http://127.0.0.1:1".to_string()));
        let result = gw.retrieve_session("../admin").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
