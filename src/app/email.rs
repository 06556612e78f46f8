//! Inbound email ingestion: attachment collection, classification and routing.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::classifier::classify;
use super::monitor::{MonitorForwarder, email_digest};
use crate::domain::{
    AttachmentFetch, AttachmentSource, ContentProcessor, Dispatch, EmailWebhookEvent,
    FetchedAttachment, InboundEmailEvent, ProcessorKind,
};

/// Attachment ceilings for one email
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLimits {
    pub max_item_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_item_bytes: 10 * 1024 * 1024,
            max_total_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Declared size above the per-item ceiling; never fetched
    DeclaredTooLarge { size: u64 },
    /// Nothing left of the running total
    TotalExhausted,
    /// Reported or streamed size above the remaining budget
    Oversized { size: u64 },
    FetchFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAttachment {
    pub id: String,
    pub filename: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// What happened to one email
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingReport {
    /// Event type was not one we process
    pub ignored: bool,
    pub accepted_bytes: u64,
    pub dispatched: Vec<ProcessorKind>,
    /// Matched but no processor endpoint is configured
    pub unconfigured: Vec<ProcessorKind>,
    pub failed: Vec<ProcessorKind>,
    pub skipped: Vec<SkippedAttachment>,
}

pub struct EmailIngestionService {
    source: Arc<dyn AttachmentSource>,
    processor: Arc<dyn ContentProcessor>,
    monitor: MonitorForwarder,
    limits: AttachmentLimits,
}

impl EmailIngestionService {
    #[must_use]
    pub fn new(
        source: Arc<dyn AttachmentSource>,
        processor: Arc<dyn ContentProcessor>,
        monitor: MonitorForwarder,
        limits: AttachmentLimits,
    ) -> Self {
        Self {
            source,
            processor,
            monitor,
            limits,
        }
    }

    /// Process a verified event. Never fails: every downstream problem is
    /// logged and recorded in the report.
    #[instrument(skip(self, event, raw), fields(email_id = %event.data.email_id, event_type = %event.event_type))]
    pub async fn ingest(&self, event: &EmailWebhookEvent, raw: &str) -> RoutingReport {
        let mut report = RoutingReport::default();
        if event.event_type != EmailWebhookEvent::EMAIL_RECEIVED {
            info!("Ignoring email event type");
            report.ignored = true;
            return report;
        }

        let email = &event.data;
        self.monitor.forward(email_digest(
            &email.from,
            &email.subject,
            email.attachments.len(),
            raw,
        ));

        let attachments = self.collect_attachments(email, &mut report).await;

        for job in classify(email, &attachments) {
            let kind = job.kind();
            match self.processor.dispatch(&job).await {
                Ok(Dispatch::Delivered) => report.dispatched.push(kind),
                Ok(Dispatch::Unconfigured) => report.unconfigured.push(kind),
                Err(e) => {
                    error!(kind = %kind, error = %e, "Processor dispatch failed");
                    report.failed.push(kind);
                }
            }
        }

        info!(
            dispatched = ?report.dispatched,
            unconfigured = ?report.unconfigured,
            failed = ?report.failed,
            skipped = report.skipped.len(),
            "Email routed"
        );
        report
    }

    /// Fetch attachments one at a time, under the per-item and running-total
    /// ceilings. Peak memory is bounded by the total ceiling.
    pub async fn collect_attachments(
        &self,
        email: &InboundEmailEvent,
        report: &mut RoutingReport,
    ) -> Vec<FetchedAttachment> {
        let mut fetched = Vec::new();
        let mut total = 0u64;

        for descriptor in &email.attachments {
            let mut skip = |reason: SkipReason| {
                warn!(attachment_id = %descriptor.id, filename = %descriptor.filename, reason = ?reason, "Skipping attachment");
                report.skipped.push(SkippedAttachment {
                    id: descriptor.id.clone(),
                    filename: descriptor.filename.clone(),
                    reason,
                });
            };

            if let Some(size) = descriptor.size
                && size > self.limits.max_item_bytes
            {
                skip(SkipReason::DeclaredTooLarge { size });
                continue;
            }

            let remaining = self.limits.max_total_bytes.saturating_sub(total);
            if remaining == 0 {
                skip(SkipReason::TotalExhausted);
                continue;
            }
            if let Some(size) = descriptor.size
                && size > remaining
            {
                skip(SkipReason::Oversized { size });
                continue;
            }

            let budget = self.limits.max_item_bytes.min(remaining);
            match self
                .source
                .fetch_attachment(&email.email_id, descriptor, budget)
                .await
            {
                Ok(AttachmentFetch::Downloaded(content)) if content.len() as u64 <= budget => {
                    total += content.len() as u64;
                    fetched.push(FetchedAttachment::from_descriptor(descriptor, content));
                }
                Ok(AttachmentFetch::Downloaded(content)) => {
                    skip(SkipReason::Oversized {
                        size: content.len() as u64,
                    });
                }
                Ok(AttachmentFetch::Oversized { size }) => skip(SkipReason::Oversized { size }),
                Err(e) => skip(SkipReason::FetchFailed {
                    message: e.to_string(),
                }),
            }
        }

        report.accepted_bytes = total;
        fetched
    }
}
