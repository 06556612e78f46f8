//! Application layer containing business logic and shared state.

pub mod classifier;
pub mod crm_resolver;
pub mod email;
pub mod fulfillment;
pub mod monitor;
pub mod signature;
pub mod state;

pub use crm_resolver::{CrmResolver, ResolvedEntities, ResolverDefaults};
pub use email::{AttachmentLimits, EmailIngestionService, RoutingReport, SkipReason};
pub use fulfillment::{FulfillmentConfig, FulfillmentService, job_summary};
pub use monitor::MonitorForwarder;
pub use signature::{EmailSignatureVerifier, PaymentSignatureVerifier, SignatureError};
pub use state::{AppState, Ports, ServiceSettings};
