//! Attachment downloads from the inbound email provider.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use crate::domain::{
    AppError, AttachmentDescriptor, AttachmentFetch, AttachmentSource, ExternalServiceError,
};
use crate::infra::http::OutboundClient;

/// Default email provider API base URL
pub const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com";

/// Attachment source reading raw content from the provider API
#[derive(Debug, Clone)]
pub struct ResendAttachmentSource {
    client: OutboundClient,
    api_key: SecretString,
    base_url: String,
}

impl ResendAttachmentSource {
    pub fn new(client: OutboundClient, api_key: SecretString, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_EMAIL_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client,
            api_key,
            base_url,
        }
    }

    fn attachment_url(&self, email_id: &str, attachment_id: &str) -> String {
        format!(
            "{}/emails/{}/attachments/{}",
            self.base_url, email_id, attachment_id
        )
    }
}

#[async_trait]
impl AttachmentSource for ResendAttachmentSource {
    #[instrument(skip(self, attachment), fields(attachment_id = %attachment.id, filename = %attachment.filename))]
    async fn fetch_attachment(
        &self,
        email_id: &str,
        attachment: &AttachmentDescriptor,
        max_bytes: u64,
    ) -> Result<AttachmentFetch, AppError> {
        let url = self.attachment_url(email_id, &attachment.id);
        let request = self
            .client
            .http()
            .get(&url)
            .bearer_auth(self.api_key.expose_secret());

        let mut response = self.client.send(request).await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::ExternalService(ExternalServiceError::RateLimited(
                self.client.key().to_string(),
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        if let Some(length) = response.content_length()
            && length > max_bytes
        {
            warn!(size = length, max_bytes, "Attachment exceeds byte budget, not reading body");
            return Ok(AttachmentFetch::Oversized { size: length });
        }

        let mut content = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppError::ExternalService(ExternalServiceError::from(e)))?
        {
            let read = (content.len() + chunk.len()) as u64;
            if read > max_bytes {
                warn!(read, max_bytes, "Attachment stream exceeded byte budget, aborting");
                return Ok(AttachmentFetch::Oversized { size: read });
            }
            content.extend_from_slice(&chunk);
        }

        debug!(bytes = content.len(), "Attachment downloaded");
        Ok(AttachmentFetch::Downloaded(content))
    }
}
