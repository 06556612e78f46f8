//! Webhook-driven fulfillment relay.
//!
//! Turns "payment completed" and "email received" webhooks into exactly-once
//! side effects against a field-service CRM and downstream content processors.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
