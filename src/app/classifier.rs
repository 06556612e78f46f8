//! Content classification for inbound email.
//!
//! Routing order is fixed. Job-completion markers are checked first and never
//! stop routing. After that the first matching rule among invoice, estimate
//! and customer-data export wins; an invoice PDF with no extractable number
//! falls through to the later rules.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::domain::{FetchedAttachment, InboundEmailEvent, ProcessorAttachment, ProcessorJob};

const JOB_COMPLETION_MARKERS: [&str; 4] = [
    "job completed",
    "job complete",
    "job has been completed",
    "work order completed",
];

const SPREADSHEET_EXTENSIONS: [&str; 3] = [".csv", ".xls", ".xlsx"];

const SPREADSHEET_CONTENT_TYPES: [&str; 4] = [
    "text/csv",
    "application/csv",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

static INVOICE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\binvoice\s*(?:#|no\.?|number|num\.?)?\s*:?\s*#?\s*([a-z0-9][a-z0-9-]*\d[a-z0-9-]*)")
        .expect("invalid invoice number pattern")
});

static ESTIMATE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:estimate|quote)\s*(?:#|no\.?|number|num\.?)?\s*:?\s*#?\s*([a-z0-9][a-z0-9-]*\d[a-z0-9-]*)")
        .expect("invalid estimate number pattern")
});

pub fn has_job_completion_marker(subject: &str, body: &str) -> bool {
    let subject = subject.to_lowercase();
    let body = body.to_lowercase();
    JOB_COMPLETION_MARKERS
        .iter()
        .any(|marker| subject.contains(marker) || body.contains(marker))
}

fn is_pdf(attachment: &FetchedAttachment) -> bool {
    let content_type = attachment.content_type.to_lowercase();
    let named_pdf = attachment.filename.to_lowercase().ends_with(".pdf");
    content_type.starts_with("application/pdf")
        || (named_pdf
            && (content_type.is_empty() || content_type == "application/octet-stream"))
}

pub fn is_invoice_pdf(attachment: &FetchedAttachment) -> bool {
    let name = attachment.filename.to_lowercase();
    is_pdf(attachment) && name.contains("invoice") && name.ends_with(".pdf")
}

pub fn is_estimate_pdf(attachment: &FetchedAttachment) -> bool {
    let name = attachment.filename.to_lowercase();
    is_pdf(attachment) && (name.contains("estimate") || name.contains("quote"))
}

pub fn is_spreadsheet(attachment: &FetchedAttachment) -> bool {
    let name = attachment.filename.to_lowercase();
    let content_type = attachment.content_type.to_lowercase();
    SPREADSHEET_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
        || SPREADSHEET_CONTENT_TYPES
            .iter()
            .any(|ct| content_type.starts_with(ct))
}

/// Spreadsheet whose subject or filename says it holds customer records
pub fn is_customer_export(subject: &str, attachment: &FetchedAttachment) -> bool {
    if !is_spreadsheet(attachment) {
        return false;
    }
    let haystack = format!("{} {}", subject, attachment.filename).to_lowercase();
    haystack.contains("customer") || (haystack.contains("export") && haystack.contains("client"))
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
}

pub fn invoice_number_from_subject(subject: &str) -> Option<String> {
    capture(&INVOICE_NUMBER, subject)
}

/// Best-effort scan of the PDF bytes; only finds uncompressed text.
pub fn invoice_number_from_pdf(content: &[u8]) -> Option<String> {
    capture(&INVOICE_NUMBER, &String::from_utf8_lossy(content))
}

pub fn estimate_number_from_subject(subject: &str) -> Option<String> {
    capture(&ESTIMATE_NUMBER, subject)
}

/// Processor jobs for one email, in dispatch order.
pub fn classify(email: &InboundEmailEvent, attachments: &[FetchedAttachment]) -> Vec<ProcessorJob> {
    let mut jobs = Vec::new();

    if has_job_completion_marker(&email.subject, email.body()) {
        info!("Job-completion marker found");
        jobs.push(ProcessorJob::JobCompletion {
            email_id: email.email_id.clone(),
            from: email.from.clone(),
            subject: email.subject.clone(),
            body: email.body().to_string(),
        });
    }

    if let Some(job) = route_attachment(email, attachments) {
        jobs.push(job);
    } else if jobs.is_empty() {
        info!(attachments = attachments.len(), "No routing rule matched");
    }

    jobs
}

fn route_attachment(
    email: &InboundEmailEvent,
    attachments: &[FetchedAttachment],
) -> Option<ProcessorJob> {
    for attachment in attachments.iter().filter(|a| is_invoice_pdf(a)) {
        let number = invoice_number_from_subject(&email.subject)
            .or_else(|| invoice_number_from_pdf(&attachment.content));
        match number {
            Some(invoice_number) => {
                return Some(ProcessorJob::Invoice {
                    email_id: email.email_id.clone(),
                    from: email.from.clone(),
                    subject: email.subject.clone(),
                    invoice_number,
                    attachment: ProcessorAttachment::from(attachment),
                });
            }
            None => {
                info!(filename = %attachment.filename, "Invoice PDF without an invoice number, falling through");
            }
        }
    }

    if let Some(attachment) = attachments.iter().find(|a| is_estimate_pdf(a)) {
        let estimate_number = estimate_number_from_subject(&email.subject);
        debug!(estimate_number = ?estimate_number, "Estimate PDF found");
        return Some(ProcessorJob::Estimate {
            email_id: email.email_id.clone(),
            from: email.from.clone(),
            subject: email.subject.clone(),
            estimate_number,
            attachment: ProcessorAttachment::from(attachment),
        });
    }

    attachments
        .iter()
        .find(|a| is_customer_export(&email.subject, a))
        .map(|attachment| ProcessorJob::CustomerData {
            email_id: email.email_id.clone(),
            from: email.from.clone(),
            subject: email.subject.clone(),
            attachment: ProcessorAttachment::from(attachment),
        })
}
