//! Infrastructure layer implementations.

pub mod chat;
pub mod crm;
pub mod database;
pub mod email;
pub mod http;
pub mod payment;
pub mod processors;

pub use chat::SlackNotifier;
pub use crm::{CrmConfig, FieldServiceCrmClient};
pub use database::{PostgresClient, PostgresConfig};
pub use email::ResendAttachmentSource;
pub use http::{OutboundClient, RateLimiter, RetryExecutor, RetryPolicy};
pub use payment::StripePaymentGateway;
pub use processors::{HttpContentProcessor, ProcessorEndpoints};
