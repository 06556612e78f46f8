//! Domain types with validation support.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::error::ValidationError;

/// Lifecycle of a fulfillment record: `absent -> pending -> {confirmed | failed}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    /// CRM work in flight
    #[default]
    Pending,
    /// CRM job created and ids recorded
    Confirmed,
    /// Resolution or job creation failed; row may be replaced by a retry
    Failed,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for FulfillmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid fulfillment status: {}", s)),
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested arrival window for the first appointment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
    Anytime,
}

impl TimeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Anytime => "anytime",
        }
    }

    /// Arrival window as (start hour, end hour), local to the business.
    pub fn window_hours(&self) -> (u32, u32) {
        match self {
            Self::Morning => (8, 12),
            Self::Afternoon => (12, 16),
            Self::Evening => (16, 20),
            Self::Anytime => (8, 17),
        }
    }
}

impl std::str::FromStr for TimeSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower.starts_with("morning") || lower.starts_with("8") {
            Ok(Self::Morning)
        } else if lower.starts_with("afternoon") || lower.starts_with("12") {
            Ok(Self::Afternoon)
        } else if lower.starts_with("evening") || lower.starts_with("4") || lower.starts_with("16") {
            Ok(Self::Evening)
        } else if lower.is_empty() || lower == "anytime" || lower == "any" || lower == "flexible" {
            Ok(Self::Anytime)
        } else {
            Err(format!("Invalid time slot: {}", s))
        }
    }
}

/// Core fulfillment entity, one row per payment transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct FulfillmentRequest {
    /// Row identifier (UUID v7)
    pub id: String,
    /// Payment transaction id; unique across the table
    #[schema(example = "pi_3Nc1x2Lk9mQ0aB1c")]
    pub idempotency_key: String,
    /// Checkout session the transaction came from
    #[schema(example = "cs_test_a1B2c3")]
    pub session_id: String,
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub street: String,
    pub unit: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    /// Product / service the customer booked
    #[schema(example = "AC Tune-Up")]
    pub service_name: String,
    pub preferred_date: Option<NaiveDate>,
    pub time_slot: Option<TimeSlot>,
    /// Amount in minor currency units (cents)
    #[schema(example = 8900)]
    pub amount_cents: i64,
    #[schema(example = "usd")]
    pub currency: String,
    pub payment_status: String,
    pub acquisition_channel: Option<String>,
    pub referral_code: Option<String>,
    /// Original booking metadata, kept so a failed conversion can be replayed
    #[schema(value_type = Object)]
    pub request_payload: serde_json::Value,
    pub crm_customer_id: Option<i64>,
    pub crm_location_id: Option<i64>,
    pub crm_job_id: Option<i64>,
    #[schema(example = "J-500")]
    pub crm_job_number: Option<String>,
    pub crm_appointment_id: Option<i64>,
    pub status: FulfillmentStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub booked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl FulfillmentRequest {
    /// Materialize a `pending` row from an insert payload.
    #[must_use]
    pub fn pending(id: String, data: &NewFulfillmentRequest) -> Self {
        let now = Utc::now();
        let booking = &data.booking;
        Self {
            id,
            idempotency_key: data.idempotency_key.clone(),
            session_id: data.session_id.clone(),
            customer_name: booking.customer_name.clone(),
            email: booking.email.clone(),
            phone: booking.phone.clone(),
            street: booking.street.clone(),
            unit: booking.unit.clone(),
            city: booking.city.clone(),
            state: booking.state.clone(),
            zip: booking.zip.clone(),
            service_name: booking.service_name.clone(),
            preferred_date: booking.preferred_date,
            time_slot: booking.time_slot,
            amount_cents: data.amount_cents,
            currency: data.currency.clone(),
            payment_status: data.payment_status.clone(),
            acquisition_channel: booking.acquisition_channel.clone(),
            referral_code: booking.referral_code.clone(),
            request_payload: data.request_payload.clone(),
            crm_customer_id: None,
            crm_location_id: None,
            crm_job_id: None,
            crm_job_number: None,
            crm_appointment_id: None,
            status: FulfillmentStatus::Pending,
            last_error: None,
            created_at: now,
            booked_at: None,
            updated_at: now,
        }
    }

    /// `confirmed` with a CRM job id: the only terminal success state.
    pub fn is_fulfilled(&self) -> bool {
        self.status == FulfillmentStatus::Confirmed && self.crm_job_id.is_some()
    }
}

/// Insert payload for a new `pending` fulfillment row
#[derive(Debug, Clone, PartialEq)]
pub struct NewFulfillmentRequest {
    pub idempotency_key: String,
    pub session_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_status: String,
    pub booking: BookingDetails,
    pub request_payload: serde_json::Value,
}

impl NewFulfillmentRequest {
    /// Build the insert payload from a verified, paid session.
    pub fn from_session(session: &PaymentSession) -> Result<Self, ValidationError> {
        match Self::parse_session(session) {
            (request, None) => Ok(request),
            (_, Some(problem)) => Err(problem),
        }
    }

    /// Build the insert payload even when the booking does not validate.
    ///
    /// The second element is the first problem found. Fields that failed to
    /// parse are left empty; `request_payload` always carries the raw metadata.
    pub fn parse_session(session: &PaymentSession) -> (Self, Option<ValidationError>) {
        let (booking, mut problem) = BookingDetails::parse_session(session);
        let amount_cents = session.amount_total.unwrap_or_else(|| {
            problem.get_or_insert_with(|| ValidationError::MissingField("amount_total".to_string()));
            0
        });
        let request = Self {
            idempotency_key: session.transaction_id().to_string(),
            session_id: session.id.clone(),
            amount_cents,
            currency: session.currency.clone().unwrap_or_else(|| "usd".to_string()),
            payment_status: session.payment_status.clone(),
            booking,
            request_payload: serde_json::to_value(&session.metadata)
                .unwrap_or(serde_json::Value::Null),
        };
        (request, problem)
    }
}

/// Resolved CRM identifiers written on confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmIds {
    pub customer_id: i64,
    pub location_id: i64,
    pub job_id: i64,
    pub job_number: String,
    pub appointment_id: Option<i64>,
}

/// Service booking details carried in the checkout session metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BookingDetails {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(email(message = "Email is invalid"))]
    pub email: String,
    #[validate(length(min = 7, message = "Phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Street is required"))]
    pub street: String,
    pub unit: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 2, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 3, message = "Zip is required"))]
    pub zip: String,
    #[validate(length(min = 1, message = "Service name is required"))]
    pub service_name: String,
    pub job_type: Option<String>,
    pub preferred_date: Option<NaiveDate>,
    pub time_slot: Option<TimeSlot>,
    pub acquisition_channel: Option<String>,
    pub referral_code: Option<String>,
    pub notes: Option<String>,
}

impl BookingDetails {
    /// Parse and validate the booking carried by a checkout session.
    pub fn from_session(session: &PaymentSession) -> Result<Self, ValidationError> {
        match Self::parse_session(session) {
            (booking, None) => Ok(booking),
            (_, Some(problem)) => Err(problem),
        }
    }

    /// Parse the booking without rejecting it.
    ///
    /// Contact fields fall back to the gateway's `customer_details` when the
    /// metadata omits them. An unparseable date or time slot is dropped and
    /// reported; validation runs only when parsing succeeded.
    pub fn parse_session(session: &PaymentSession) -> (Self, Option<ValidationError>) {
        let meta = &session.metadata;
        let get = |key: &str| {
            meta.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let details = session.customer_details.clone().unwrap_or_default();
        let mut problem = None;

        let customer_name = match (get("first_name"), get("last_name")) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first,
            _ => get("customer_name").or(details.name).unwrap_or_default(),
        };

        let preferred_date = get("preferred_date").and_then(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|_| {
                    problem.get_or_insert(ValidationError::InvalidField {
                        field: "preferred_date".to_string(),
                        message: format!("expected YYYY-MM-DD, got {}", raw),
                    });
                })
                .ok()
        });

        let time_slot = get("time_slot").and_then(|raw| {
            raw.parse::<TimeSlot>()
                .map_err(|message| {
                    problem.get_or_insert(ValidationError::InvalidField {
                        field: "time_slot".to_string(),
                        message,
                    });
                })
                .ok()
        });

        let booking = Self {
            customer_name,
            email: get("email").or(details.email).unwrap_or_default(),
            phone: get("phone").or(details.phone).unwrap_or_default(),
            street: get("street").unwrap_or_default(),
            unit: get("unit"),
            city: get("city").unwrap_or_default(),
            state: get("state").unwrap_or_default(),
            zip: get("zip").unwrap_or_default(),
            service_name: get("service_name")
                .or_else(|| get("product_name"))
                .unwrap_or_default(),
            job_type: get("job_type"),
            preferred_date,
            time_slot,
            acquisition_channel: get("acquisition_channel")
                .or_else(|| get("utm_source"))
                .map(|c| c.to_lowercase()),
            referral_code: get("referral_code"),
            notes: get("notes"),
        };

        if problem.is_none()
            && let Err(e) = booking.validate()
        {
            problem = Some(ValidationError::Multiple(e.to_string()));
        }
        (booking, problem)
    }
}

/// Contact details the payment gateway collected at checkout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// Checkout session as returned by the payment gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    /// `paid`, `unpaid` or `no_payment_required`
    pub payment_status: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Minor currency units
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    /// Transaction id used as the idempotency key; the session id stands in
    /// when the gateway reports no payment intent.
    pub fn transaction_id(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}

/// Payment gateway webhook envelope
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentWebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentWebhookData {
    pub object: serde_json::Value,
}

impl PaymentWebhookEvent {
    pub const CHECKOUT_COMPLETED: &'static str = "checkout.session.completed";

    pub fn session_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }
}

/// Street address of the service location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAddress {
    pub street: String,
    pub unit: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl From<&BookingDetails> for ServiceAddress {
    fn from(booking: &BookingDetails) -> Self {
        Self {
            street: booking.street.clone(),
            unit: booking.unit.clone(),
            city: booking.city.clone(),
            state: booking.state.clone(),
            zip: booking.zip.clone(),
            country: "USA".to_string(),
        }
    }
}

/// Input for customer ensure-or-create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerInput {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: ServiceAddress,
}

/// CRM business unit listing entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusinessUnit {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Input for CRM job creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateJobInput {
    pub customer_id: i64,
    pub location_id: i64,
    pub business_unit_id: i64,
    pub job_type_id: i64,
    pub campaign_id: Option<i64>,
    pub summary: String,
    pub preferred_date: Option<NaiveDate>,
    pub time_slot: Option<TimeSlot>,
}

/// CRM job creation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedJob {
    pub job_id: i64,
    pub job_number: String,
    pub appointment_id: Option<i64>,
}

/// Result of running the idempotency protocol for one payment
#[derive(Debug, Clone, PartialEq)]
pub enum FulfillmentOutcome {
    /// Job exists; record carries its CRM ids
    Confirmed(FulfillmentRequest),
    /// Another attempt is still in flight (or failed and awaits retry)
    Processing(FulfillmentRequest),
}

impl FulfillmentOutcome {
    pub fn record(&self) -> &FulfillmentRequest {
        match self {
            Self::Confirmed(r) | Self::Processing(r) => r,
        }
    }

    pub fn job_number(&self) -> Option<&str> {
        match self {
            Self::Confirmed(r) => r.crm_job_number.as_deref(),
            Self::Processing(_) => None,
        }
    }
}

/// Email provider webhook envelope
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailWebhookEvent {
    #[serde(rename = "type")]
    #[schema(example = "email.received")]
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<String>,
    pub data: InboundEmailEvent,
}

impl EmailWebhookEvent {
    pub const EMAIL_RECEIVED: &'static str = "email.received";
}

/// Inbound transactional email; processed and discarded, never persisted
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InboundEmailEvent {
    pub email_id: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentDescriptor>,
}

impl InboundEmailEvent {
    /// Plain-text body, falling back to the HTML body.
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.html.as_deref())
            .unwrap_or_default()
    }
}

/// Attachment as declared by the webhook, before download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AttachmentDescriptor {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: String,
    /// Declared size in bytes, when the provider reports one
    #[serde(default)]
    pub size: Option<u64>,
}

/// Attachment resolved to in-memory content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAttachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl FetchedAttachment {
    pub fn from_descriptor(descriptor: &AttachmentDescriptor, content: Vec<u8>) -> Self {
        Self {
            id: descriptor.id.clone(),
            filename: descriptor.filename.clone(),
            content_type: descriptor.content_type.clone(),
            content,
        }
    }
}

/// Result of one attachment download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentFetch {
    Downloaded(Vec<u8>),
    /// Reported or streamed size exceeded the allowed budget
    Oversized { size: u64 },
}

/// Downstream processor categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorKind {
    JobCompletion,
    Invoice,
    Estimate,
    CustomerData,
}

impl ProcessorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobCompletion => "job_completion",
            Self::Invoice => "invoice",
            Self::Estimate => "estimate",
            Self::CustomerData => "customer_data",
        }
    }
}

impl std::fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of handing a job to a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// No endpoint is configured for this kind; the payload was dropped
    Unconfigured,
}

/// Attachment as shipped to a processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorAttachment {
    pub filename: String,
    pub content_type: String,
    pub content_base64: String,
}

impl From<&FetchedAttachment> for ProcessorAttachment {
    fn from(att: &FetchedAttachment) -> Self {
        use base64::Engine;
        Self {
            filename: att.filename.clone(),
            content_type: att.content_type.clone(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(&att.content),
        }
    }
}

/// Classified payload handed to a content processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessorJob {
    JobCompletion {
        email_id: String,
        from: String,
        subject: String,
        body: String,
    },
    Invoice {
        email_id: String,
        from: String,
        subject: String,
        invoice_number: String,
        attachment: ProcessorAttachment,
    },
    Estimate {
        email_id: String,
        from: String,
        subject: String,
        estimate_number: Option<String>,
        attachment: ProcessorAttachment,
    },
    CustomerData {
        email_id: String,
        from: String,
        subject: String,
        attachment: ProcessorAttachment,
    },
}

impl ProcessorJob {
    pub fn kind(&self) -> ProcessorKind {
        match self {
            Self::JobCompletion { .. } => ProcessorKind::JobCompletion,
            Self::Invoice { .. } => ProcessorKind::Invoice,
            Self::Estimate { .. } => ProcessorKind::Estimate,
            Self::CustomerData { .. } => ProcessorKind::CustomerData,
        }
    }
}

/// Request body for the client-side confirmation path
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ConfirmBookingRequest {
    /// Checkout session id returned to the browser after payment
    #[validate(length(min = 1, message = "Session id is required"))]
    #[schema(example = "cs_test_a1B2c3")]
    pub session_id: String,
}

/// Customer-facing fulfillment state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    Confirmed,
    Processing,
}

/// Response for booking confirmation and retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct FulfillmentResponse {
    pub status: BookingState,
    pub idempotency_key: String,
    #[schema(example = "J-500")]
    pub job_number: Option<String>,
}

impl FulfillmentResponse {
    pub fn from_outcome(outcome: &FulfillmentOutcome) -> Self {
        let status = match outcome {
            FulfillmentOutcome::Confirmed(_) => BookingState::Confirmed,
            FulfillmentOutcome::Processing(_) => BookingState::Processing,
        };
        Self {
            status,
            idempotency_key: outcome.record().idempotency_key.clone(),
            job_number: outcome.job_number().map(str::to_string),
        }
    }

    pub fn processing(idempotency_key: impl Into<String>) -> Self {
        Self {
            status: BookingState::Processing,
            idempotency_key: idempotency_key.into(),
            job_number: None,
        }
    }
}

/// Acknowledgement returned to webhook senders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

impl WebhookAck {
    pub fn received() -> Self {
        Self { received: true }
    }
}

/// Query parameters for listing fulfillment records
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ListFulfillmentParams {
    /// Status filter (default: failed)
    #[serde(default = "default_list_status")]
    pub status: FulfillmentStatus,
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
}

fn default_list_status() -> FulfillmentStatus {
    FulfillmentStatus::Failed
}

fn default_limit() -> i64 {
    20
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Fulfillment store health
    pub database: HealthStatus,
    /// CRM reachability
    pub crm: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    /// The store is critical; an unreachable CRM only degrades service
    /// because failed conversions are recorded and retried.
    #[must_use]
    pub fn new(database: HealthStatus, crm: HealthStatus) -> Self {
        let status = match (&database, &crm) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            crm,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Session id is required")]
    pub message: String,
}

/// Rate limit exceeded response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Seconds until rate limit resets
    #[schema(example = 1)]
    pub retry_after: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn paid_session() -> PaymentSession {
        let metadata: HashMap<String, String> = [
            ("first_name", "Dana"),
            ("last_name", "Reyes"),
            ("email", "dana@example.com"),
            ("phone", "555-201-3344"),
            ("street", "12 Elm St"),
            ("city", "Austin"),
            ("state", "TX"),
            ("zip", "78701"),
            ("service_name", "AC Tune-Up"),
            ("preferred_date", "2026-11-02"),
            ("time_slot", "Morning (8am-12pm)"),
            ("utm_source", "Google"),
            ("referral_code", "FRIEND10"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        PaymentSession {
            id: "cs_test_1".to_string(),
            payment_status: "paid".to_string(),
            status: Some("complete".to_string()),
            amount_total: Some(8900),
            currency: Some("usd".to_string()),
            payment_intent: Some("pi_123".to_string()),
            customer_details: None,
            metadata,
        }
    }

    #[test]
    fn test_fulfillment_status_display_and_parsing() {
        let statuses = vec![
            (FulfillmentStatus::Pending, "pending"),
            (FulfillmentStatus::Confirmed, "confirmed"),
            (FulfillmentStatus::Failed, "failed"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(FulfillmentStatus::from_str(string).unwrap(), status);
        }

        assert!(FulfillmentStatus::from_str("processing").is_err());
    }

    #[test]
    fn test_time_slot_parsing_is_lenient() {
        assert_eq!(TimeSlot::from_str("Morning (8am-12pm)").unwrap(), TimeSlot::Morning);
        assert_eq!(TimeSlot::from_str("afternoon").unwrap(), TimeSlot::Afternoon);
        assert_eq!(TimeSlot::from_str("4pm-8pm").unwrap(), TimeSlot::Evening);
        assert_eq!(TimeSlot::from_str("flexible").unwrap(), TimeSlot::Anytime);
        assert!(TimeSlot::from_str("midnight").is_err());
    }

    #[test]
    fn test_new_request_from_paid_session() {
        let session = paid_session();
        let new = NewFulfillmentRequest::from_session(&session).unwrap();

        assert_eq!(new.idempotency_key, "pi_123");
        assert_eq!(new.session_id, "cs_test_1");
        assert_eq!(new.amount_cents, 8900);
        assert_eq!(new.booking.customer_name, "Dana Reyes");
        assert_eq!(new.booking.acquisition_channel.as_deref(), Some("google"));
        assert_eq!(new.booking.time_slot, Some(TimeSlot::Morning));
        assert_eq!(
            new.booking.preferred_date,
            NaiveDate::from_ymd_opt(2026, 11, 2)
        );
        assert_eq!(new.request_payload["referral_code"], "FRIEND10");
    }

    #[test]
    fn test_transaction_id_falls_back_to_session_id() {
        let mut session = paid_session();
        session.payment_intent = None;
        assert_eq!(session.transaction_id(), "cs_test_1");
    }

    #[test]
    fn test_booking_uses_customer_details_fallback() {
        let mut session = paid_session();
        session.metadata.remove("email");
        session.metadata.remove("first_name");
        session.metadata.remove("last_name");
        session.customer_details = Some(CustomerDetails {
            email: Some("billing@example.com".to_string()),
            name: Some("Billing Name".to_string()),
            phone: None,
        });

        let booking = BookingDetails::from_session(&session).unwrap();
        assert_eq!(booking.email, "billing@example.com");
        assert_eq!(booking.customer_name, "Billing Name");
    }

    #[test]
    fn test_booking_validation_rejects_missing_address() {
        let mut session = paid_session();
        session.metadata.remove("street");
        assert!(matches!(
            BookingDetails::from_session(&session),
            Err(ValidationError::Multiple(_))
        ));
    }

    #[test]
    fn test_booking_rejects_bad_date() {
        let mut session = paid_session();
        session
            .metadata
            .insert("preferred_date".to_string(), "next tuesday".to_string());
        assert!(matches!(
            BookingDetails::from_session(&session),
            Err(ValidationError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_parse_session_keeps_unparseable_booking() {
        let mut session = paid_session();
        session
            .metadata
            .insert("preferred_date".to_string(), "11/02/2026".to_string());

        let (new, problem) = NewFulfillmentRequest::parse_session(&session);

        assert!(matches!(
            problem,
            Some(ValidationError::InvalidField { ref field, .. }) if field == "preferred_date"
        ));
        assert_eq!(new.idempotency_key, "pi_123");
        assert_eq!(new.amount_cents, 8900);
        assert!(new.booking.preferred_date.is_none());
        assert_eq!(new.request_payload["preferred_date"], "11/02/2026");
    }

    #[test]
    fn test_parse_session_reports_missing_amount() {
        let mut session = paid_session();
        session.amount_total = None;

        let (new, problem) = NewFulfillmentRequest::parse_session(&session);

        assert!(matches!(problem, Some(ValidationError::MissingField(_))));
        assert_eq!(new.amount_cents, 0);
    }

    #[test]
    fn test_pending_row_has_no_crm_ids() {
        let new = NewFulfillmentRequest::from_session(&paid_session()).unwrap();
        let row = FulfillmentRequest::pending("row-1".to_string(), &new);
        assert_eq!(row.status, FulfillmentStatus::Pending);
        assert!(row.crm_job_id.is_none());
        assert!(!row.is_fulfilled());
    }

    #[test]
    fn test_email_event_deserializes_provider_payload() {
        let json = serde_json::json!({
            "type": "email.received",
            "data": {
                "email_id": "em_1",
                "from": "billing@vendor.com",
                "subject": "Invoice #INV-77",
                "html": "<p>See attached</p>",
                "attachments": [
                    {"id": "att_1", "filename": "invoice.pdf", "content_type": "application/pdf"}
                ]
            }
        });
        let event: EmailWebhookEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.event_type, EmailWebhookEvent::EMAIL_RECEIVED);
        assert_eq!(event.data.body(), "<p>See attached</p>");
        assert_eq!(event.data.attachments[0].size, None);
    }

    #[test]
    fn test_processor_job_serializes_with_kind_tag() {
        let job = ProcessorJob::JobCompletion {
            email_id: "em_1".to_string(),
            from: "tech@example.com".to_string(),
            subject: "Job completed".to_string(),
            body: String::new(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "job_completion");
        assert_eq!(job.kind(), ProcessorKind::JobCompletion);
    }

    #[test]
    fn test_health_response_degrades_on_crm_outage() {
        let health = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Unhealthy);
        assert_eq!(health.status, HealthStatus::Degraded);
        let health = HealthResponse::new(HealthStatus::Unhealthy, HealthStatus::Healthy);
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
