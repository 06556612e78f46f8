//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, ExternalServiceError, NotifyError, ValidationError,
};
pub use traits::{
    AttachmentSource, ChatNotifier, ContentProcessor, CrmClient, FulfillmentStore, PaymentGateway,
};
pub use types::{
    AttachmentDescriptor, AttachmentFetch, BookingDetails, BookingState, BusinessUnit,
    ConfirmBookingRequest, CreateJobInput, CreatedJob, CrmIds, CustomerDetails, CustomerInput,
    Dispatch,
    EmailWebhookEvent, ErrorDetail, ErrorResponse, FetchedAttachment, FulfillmentOutcome,
    FulfillmentRequest, FulfillmentResponse, FulfillmentStatus, HealthResponse, HealthStatus,
    InboundEmailEvent, ListFulfillmentParams, NewFulfillmentRequest, PaymentSession,
    PaymentWebhookEvent, ProcessorAttachment, ProcessorJob, ProcessorKind, RateLimitResponse,
    ServiceAddress, TimeSlot, WebhookAck,
};
