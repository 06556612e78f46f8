//! Downstream content processors.

pub mod http;

pub use http::{HttpContentProcessor, ProcessorEndpoints};
