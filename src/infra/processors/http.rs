//! Content processors reached over HTTP, one endpoint per kind.

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::domain::{AppError, ContentProcessor, Dispatch, ProcessorJob, ProcessorKind};
use crate::infra::http::OutboundClient;

/// Per-kind processor endpoints; a missing URL disables that processor.
#[derive(Debug, Clone, Default)]
pub struct ProcessorEndpoints {
    pub job_completion: Option<String>,
    pub invoice: Option<String>,
    pub estimate: Option<String>,
    pub customer_data: Option<String>,
}

impl ProcessorEndpoints {
    pub fn url_for(&self, kind: ProcessorKind) -> Option<&str> {
        match kind {
            ProcessorKind::JobCompletion => self.job_completion.as_deref(),
            ProcessorKind::Invoice => self.invoice.as_deref(),
            ProcessorKind::Estimate => self.estimate.as_deref(),
            ProcessorKind::CustomerData => self.customer_data.as_deref(),
        }
    }
}

/// Posts classified payloads as JSON
#[derive(Debug, Clone)]
pub struct HttpContentProcessor {
    client: OutboundClient,
    endpoints: ProcessorEndpoints,
}

impl HttpContentProcessor {
    pub fn new(client: OutboundClient, endpoints: ProcessorEndpoints) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl ContentProcessor for HttpContentProcessor {
    #[instrument(skip(self, job), fields(kind = %job.kind()))]
    async fn dispatch(&self, job: &ProcessorJob) -> Result<Dispatch, AppError> {
        let Some(url) = self.endpoints.url_for(job.kind()) else {
            warn!("No processor endpoint configured, dropping payload");
            return Ok(Dispatch::Unconfigured);
        };

        let request = self.client.http().post(url).json(job);
        self.client.send_checked(request).await?;
        info!("Payload dispatched to processor");
        Ok(Dispatch::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_kind() {
        let endpoints = ProcessorEndpoints {
            invoice: Some("http://proc/invoice".to_string()),
            ..Default::default()
        };
        assert_eq!(
            endpoints.url_for(ProcessorKind::Invoice),
            Some("http://proc/invoice")
        );
        assert_eq!(endpoints.url_for(ProcessorKind::Estimate), None);
    }
}
