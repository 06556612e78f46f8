//! Best-effort forwarding of inbound events to the internal chat channel.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

use crate::domain::ChatNotifier;

/// Longest raw payload excerpt posted to chat
const MAX_EXCERPT_CHARS: usize = 3000;

/// Detaches chat notifications from the request path.
///
/// Each forward runs on its own task; a failure there is logged and dropped
/// and has no way back to the caller.
#[derive(Clone, Default)]
pub struct MonitorForwarder {
    notifier: Option<Arc<dyn ChatNotifier>>,
}

impl MonitorForwarder {
    #[must_use]
    pub fn new(notifier: Arc<dyn ChatNotifier>) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }

    /// Forwarder that drops every message
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Spawn the notification. The handle is only useful to tests.
    pub fn forward(&self, text: String) -> Option<JoinHandle<()>> {
        let Some(notifier) = self.notifier.clone() else {
            debug!("Monitor forwarding disabled");
            return None;
        };

        let span = tracing::info_span!("monitor_forward");
        Some(tokio::spawn(
            async move {
                if let Err(e) = notifier.notify(&text).await {
                    warn!(error = %e, "Monitor forward failed");
                }
            }
            .instrument(span),
        ))
    }
}

/// Chat text for an inbound email: a header line plus a truncated raw excerpt
pub fn email_digest(from: &str, subject: &str, attachments: usize, raw: &str) -> String {
    let excerpt: String = raw.chars().take(MAX_EXCERPT_CHARS).collect();
    let ellipsis = if raw.chars().count() > MAX_EXCERPT_CHARS {
        "\n…"
    } else {
        ""
    };
    format!(
        "Inbound email from {} ({} attachment(s)): {}\n```{}{}```",
        from, attachments, subject, excerpt, ellipsis
    )
}
