//! Internal chat notifications.

pub mod slack;

pub use slack::SlackNotifier;
