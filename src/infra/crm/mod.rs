//! Field-service CRM integration.

pub mod client;
mod token;

pub use client::{CrmConfig, FieldServiceCrmClient};
