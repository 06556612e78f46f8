use axum::http::HeaderMap;
use base64::{Engine, engine::general_purpose::STANDARD};
use criterion::{Criterion, criterion_group, criterion_main};
use fulfillment_relay::app::EmailSignatureVerifier;
use fulfillment_relay::app::classifier::classify;
use fulfillment_relay::domain::{AttachmentDescriptor, FetchedAttachment, InboundEmailEvent};
use secrecy::SecretString;
use std::hint::black_box;

fn bench_email_signature(c: &mut Criterion) {
    let secret = format!("whsec_{}", STANDARD.encode(b"benchmark-secret"));
    let verifier = EmailSignatureVerifier::new(SecretString::from(secret));
    let body = br#"{"type":"email.received","data":{"email_id":"em_1","from":"a@b.com","subject":"Invoice #INV-1","attachments":[]}}"#;
    let ts = 1_790_000_000;
    let signature = verifier.sign("msg_1", ts, body).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("svix-id", "msg_1".parse().unwrap());
    headers.insert("svix-timestamp", ts.to_string().parse().unwrap());
    headers.insert("svix-signature", signature.parse().unwrap());

    c.bench_function("verify_email_signature", |b| {
        b.iter(|| verifier.verify_at(black_box(&headers), black_box(body), ts))
    });
}

fn bench_classification(c: &mut Criterion) {
    let descriptor = AttachmentDescriptor {
        id: "att_1".to_string(),
        filename: "invoice-2041.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        size: None,
    };
    let mut content = b"%PDF-1.4 ".repeat(2000);
    content.extend_from_slice(b"Invoice Number: INV-2041");
    let attachments = vec![FetchedAttachment::from_descriptor(&descriptor, content)];
    let email = InboundEmailEvent {
        email_id: "em_1".to_string(),
        from: "billing@vendor.com".to_string(),
        to: vec![],
        subject: "Your statement".to_string(),
        text: Some("The job has been completed. Thanks!".to_string()),
        html: None,
        attachments: vec![descriptor],
    };

    c.bench_function("classify_invoice_from_pdf", |b| {
        b.iter(|| classify(black_box(&email), black_box(&attachments)))
    });
}

criterion_group!(benches, bench_email_signature, bench_classification);
criterion_main!(benches);
