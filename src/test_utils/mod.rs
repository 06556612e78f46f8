//! Test utilities: in-memory implementations of every port.

pub mod mocks;

pub use mocks::{
    MockAttachmentSource, MockChatNotifier, MockConfig, MockContentProcessor, MockCrmClient,
    MockFulfillmentStore, MockPaymentGateway, paid_session, sample_booking_metadata,
};
