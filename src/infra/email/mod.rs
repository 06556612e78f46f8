//! Inbound email provider integration.

pub mod resend;

pub use resend::{DEFAULT_EMAIL_API_URL, ResendAttachmentSource};
