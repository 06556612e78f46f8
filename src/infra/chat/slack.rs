//! Incoming-webhook chat notifier.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::instrument;

use crate::domain::{ChatNotifier, NotifyError};
use crate::infra::http::OutboundClient;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    text: &'a str,
}

/// Posts plain-text messages to a chat incoming-webhook URL
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: OutboundClient,
    webhook_url: SecretString,
}

impl SlackNotifier {
    pub fn new(client: OutboundClient, webhook_url: SecretString) -> Self {
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl ChatNotifier for SlackNotifier {
    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        let request = self
            .client
            .http()
            .post(self.webhook_url.expose_secret())
            .json(&ChatMessage { text });

        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
