//! Application state management.

use std::sync::Arc;

use crate::domain::{
    AttachmentSource, ChatNotifier, ContentProcessor, CrmClient, FulfillmentStore,
    HealthResponse, HealthStatus, PaymentGateway,
};

use super::crm_resolver::{CrmResolver, ResolverDefaults};
use super::email::{AttachmentLimits, EmailIngestionService};
use super::fulfillment::{FulfillmentConfig, FulfillmentService};
use super::monitor::MonitorForwarder;
use super::signature::{EmailSignatureVerifier, PaymentSignatureVerifier};

/// External systems the services talk to
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn FulfillmentStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub crm: Arc<dyn CrmClient>,
    pub attachments: Arc<dyn AttachmentSource>,
    pub processor: Arc<dyn ContentProcessor>,
    /// Monitoring channel; `None` disables forwarding
    pub chat: Option<Arc<dyn ChatNotifier>>,
}

/// Tunables for the services
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub fulfillment: FulfillmentConfig,
    pub resolver: ResolverDefaults,
    pub attachments: AttachmentLimits,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub fulfillment: Arc<FulfillmentService>,
    pub email: Arc<EmailIngestionService>,
    pub store: Arc<dyn FulfillmentStore>,
    pub email_verifier: Arc<EmailSignatureVerifier>,
    /// Payment webhook verification; the endpoint refuses requests when unset
    pub payment_verifier: Option<Arc<PaymentSignatureVerifier>>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(ports: Ports, settings: ServiceSettings, email_verifier: EmailSignatureVerifier) -> Self {
        let resolver = CrmResolver::new(
            Arc::clone(&ports.crm),
            Arc::clone(&ports.store),
            settings.resolver,
        );
        let fulfillment = Arc::new(FulfillmentService::new(
            Arc::clone(&ports.store),
            Arc::clone(&ports.gateway),
            Arc::clone(&ports.crm),
            resolver,
            settings.fulfillment,
        ));

        let monitor = match ports.chat {
            Some(chat) => MonitorForwarder::new(chat),
            None => MonitorForwarder::disabled(),
        };
        let email = Arc::new(EmailIngestionService::new(
            Arc::clone(&ports.attachments),
            Arc::clone(&ports.processor),
            monitor,
            settings.attachments,
        ));

        Self {
            fulfillment,
            email,
            store: ports.store,
            email_verifier: Arc::new(email_verifier),
            payment_verifier: None,
        }
    }

    /// Enable the payment webhook (builder pattern)
    #[must_use]
    pub fn with_payment_verifier(mut self, verifier: PaymentSignatureVerifier) -> Self {
        self.payment_verifier = Some(Arc::new(verifier));
        self
    }

    /// Store is critical; the CRM only degrades service.
    pub async fn health(&self) -> HealthResponse {
        let database = match self.store.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let crm = match self.fulfillment.crm_health().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(database, crm)
    }
}
