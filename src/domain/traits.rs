//! Domain traits defining contracts for external systems.

use async_trait::async_trait;

use super::error::{AppError, NotifyError};
use super::types::{
    AttachmentDescriptor, AttachmentFetch, BusinessUnit, CreateJobInput, CreatedJob, CrmIds,
    CustomerInput, Dispatch, FulfillmentRequest, FulfillmentStatus, NewFulfillmentRequest, PaymentSession,
    ProcessorJob, ServiceAddress,
};

/// Durable fulfillment record store; the single source of truth for
/// idempotency and status.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a `pending` row. Fails with `DatabaseError::Duplicate` when a
    /// row for the same idempotency key already exists.
    async fn insert_pending(
        &self,
        data: &NewFulfillmentRequest,
    ) -> Result<FulfillmentRequest, AppError>;

    /// Fetch a row by idempotency key
    async fn get_by_key(&self, key: &str) -> Result<Option<FulfillmentRequest>, AppError>;

    /// Transition to `confirmed` and record CRM ids
    async fn mark_confirmed(
        &self,
        key: &str,
        ids: &CrmIds,
    ) -> Result<FulfillmentRequest, AppError>;

    /// Transition to `failed`; CRM ids stay null
    async fn mark_failed(&self, key: &str, error: &str) -> Result<(), AppError>;

    /// Delete the row only if it is `failed`. Returns whether a row was removed.
    async fn delete_failed(&self, key: &str) -> Result<bool, AppError>;

    /// List rows in a given status, most recent first
    async fn list_by_status(
        &self,
        status: FulfillmentStatus,
        limit: i64,
    ) -> Result<Vec<FulfillmentRequest>, AppError>;

    /// Stored acquisition channel -> campaign name mapping
    async fn campaign_for_channel(&self, channel: &str) -> Result<Option<String>, AppError>;
}

/// Payment gateway, consulted for the authoritative payment state
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Retrieve a checkout session by its opaque id
    async fn retrieve_session(&self, session_id: &str) -> Result<PaymentSession, AppError>;
}

/// Field-service CRM operations needed to create a job
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Check CRM reachability (token acquisition)
    async fn health_check(&self) -> Result<(), AppError>;

    /// Campaign id by exact name
    async fn find_campaign_by_name(&self, name: &str) -> Result<Option<i64>, AppError>;

    /// Job type id by exact name
    async fn find_job_type_by_name(&self, name: &str) -> Result<Option<i64>, AppError>;

    /// All business units visible to the integration
    async fn list_business_units(&self) -> Result<Vec<BusinessUnit>, AppError>;

    /// Find a customer by phone or email, creating it when absent
    async fn ensure_customer(&self, customer: &CustomerInput) -> Result<i64, AppError>;

    /// Find a customer's location by address, creating it when absent
    async fn ensure_location(
        &self,
        customer_id: i64,
        name: &str,
        address: &ServiceAddress,
    ) -> Result<i64, AppError>;

    /// Create the job and its first appointment
    async fn create_job(&self, input: &CreateJobInput) -> Result<CreatedJob, AppError>;
}

/// Email provider attachment download
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// Download one attachment, reading at most `max_bytes`.
    ///
    /// Returns `AttachmentFetch::Oversized` instead of the content when the
    /// reported or streamed length exceeds the budget.
    async fn fetch_attachment(
        &self,
        email_id: &str,
        attachment: &AttachmentDescriptor,
        max_bytes: u64,
    ) -> Result<AttachmentFetch, AppError>;
}

/// Downstream consumer of classified email payloads
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn dispatch(&self, job: &ProcessorJob) -> Result<Dispatch, AppError>;
}

/// Internal chat channel used for best-effort monitoring
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}
