//! Payment gateway integrations.

pub mod stripe;

pub use stripe::{DEFAULT_PAYMENT_API_URL, StripePaymentGateway};
