//! Webhook signature verification using timestamped HMAC-SHA256.
//!
//! Two schemes are accepted:
//!
//! * Email provider (Svix style): headers `svix-id`, `svix-timestamp` and
//!   `svix-signature`. The signed content is `"{id}.{timestamp}.{body}"`, the
//!   key is the base64 part of a `whsec_...` secret, and the signature header
//!   carries one or more space-separated `v1,<base64>` entries.
//! * Payment gateway: a single `stripe-signature: t=<ts>,v1=<hex>` header
//!   over `"{t}.{body}"`, keyed with the raw secret string.
//!
//! Both reject timestamps more than five minutes away from the local clock.
//! Verification runs before the body is parsed; nothing else may look at
//! the payload until it succeeds.

use std::time::Duration;

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use thiserror::Error;

use crate::domain::{AppError, ConfigError, EmailWebhookEvent, ValidationError};

type HmacSha256 = Hmac<Sha256>;

pub const EMAIL_ID_HEADER: &str = "svix-id";
pub const EMAIL_TIMESTAMP_HEADER: &str = "svix-timestamp";
pub const EMAIL_SIGNATURE_HEADER: &str = "svix-signature";
pub const PAYMENT_SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum distance between the signed timestamp and now
pub const SIGNATURE_TOLERANCE: Duration = Duration::from_secs(300);

const SECRET_PREFIX: &str = "whsec_";

/// Reasons a signed webhook is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    #[error("timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("no matching signature")]
    Mismatch,

    /// The configured secret cannot be used as a key
    #[error("webhook secret unusable: {0}")]
    InvalidSecret(String),

    /// Signature verified but the body is not the expected JSON
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidSecret(message) => AppError::Config(ConfigError::Invalid {
                key: "webhook secret".to_string(),
                message,
            }),
            SignatureError::MalformedPayload(message) => {
                AppError::Validation(ValidationError::InvalidField {
                    field: "body".to_string(),
                    message,
                })
            }
            other => AppError::Authentication(other.to_string()),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, SignatureError> {
    let value = headers
        .get(name)
        .ok_or(SignatureError::MissingHeader(name))?
        .to_str()
        .map_err(|_| SignatureError::MalformedHeader(name))?
        .trim();
    if value.is_empty() {
        return Err(SignatureError::MissingHeader(name));
    }
    Ok(value)
}

fn check_timestamp(
    raw: &str,
    now: i64,
    name: &'static str,
) -> Result<i64, SignatureError> {
    let ts: i64 = raw
        .parse()
        .map_err(|_| SignatureError::MalformedHeader(name))?;
    if now.abs_diff(ts) > SIGNATURE_TOLERANCE.as_secs() {
        return Err(SignatureError::TimestampOutOfTolerance);
    }
    Ok(ts)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, SignatureError> {
    serde_json::from_slice(body).map_err(|e| SignatureError::MalformedPayload(e.to_string()))
}

fn mac_over(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SignatureError::InvalidSecret(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// Verifier for the email provider's signed webhooks
#[derive(Debug, Clone)]
pub struct EmailSignatureVerifier {
    secret: SecretString,
}

impl EmailSignatureVerifier {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn key(&self) -> Result<Vec<u8>, SignatureError> {
        let raw = self.secret.expose_secret();
        let encoded = raw.strip_prefix(SECRET_PREFIX).unwrap_or(raw);
        BASE64
            .decode(encoded)
            .map_err(|e| SignatureError::InvalidSecret(e.to_string()))
    }

    /// Verify against the current clock and parse the event.
    pub fn verify(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<EmailWebhookEvent, SignatureError> {
        self.verify_at(headers, body, Utc::now().timestamp())
    }

    /// Verify against an explicit unix time.
    pub fn verify_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: i64,
    ) -> Result<EmailWebhookEvent, SignatureError> {
        let id = header(headers, EMAIL_ID_HEADER)?;
        let timestamp = header(headers, EMAIL_TIMESTAMP_HEADER)?;
        let signatures = header(headers, EMAIL_SIGNATURE_HEADER)?;

        check_timestamp(timestamp, now, EMAIL_TIMESTAMP_HEADER)?;

        let key = self.key()?;
        let mac = mac_over(
            &key,
            &[id.as_bytes(), b".", timestamp.as_bytes(), b".", body],
        )?;

        let matched = signatures
            .split_whitespace()
            .filter_map(|entry| entry.strip_prefix("v1,"))
            .filter_map(|encoded| BASE64.decode(encoded).ok())
            .any(|candidate| mac.clone().verify_slice(&candidate).is_ok());
        if !matched {
            return Err(SignatureError::Mismatch);
        }

        parse_body(body)
    }

    /// Produce a `svix-signature` header value for `body`.
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
        let key = self.key()?;
        let ts = timestamp.to_string();
        let mac = mac_over(&key, &[id.as_bytes(), b".", ts.as_bytes(), b".", body])?;
        Ok(format!("v1,{}", BASE64.encode(mac.finalize().into_bytes())))
    }
}

/// Verifier for the payment gateway's signed webhooks
#[derive(Debug, Clone)]
pub struct PaymentSignatureVerifier {
    secret: SecretString,
}

impl PaymentSignatureVerifier {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn verify<T: DeserializeOwned>(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<T, SignatureError> {
        self.verify_at(headers, body, Utc::now().timestamp())
    }

    pub fn verify_at<T: DeserializeOwned>(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: i64,
    ) -> Result<T, SignatureError> {
        let raw = header(headers, PAYMENT_SIGNATURE_HEADER)?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in raw.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(SignatureError::MalformedHeader(PAYMENT_SIGNATURE_HEADER))?;
        check_timestamp(timestamp, now, PAYMENT_SIGNATURE_HEADER)?;

        let mac = mac_over(
            self.secret.expose_secret().as_bytes(),
            &[timestamp.as_bytes(), b".", body],
        )?;
        let matched = candidates
            .into_iter()
            .filter_map(|value| hex::decode(value).ok())
            .any(|candidate| mac.clone().verify_slice(&candidate).is_ok());
        if !matched {
            return Err(SignatureError::Mismatch);
        }

        parse_body(body)
    }

    /// Produce a `stripe-signature` header value for `body`.
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
        let ts = timestamp.to_string();
        let mac = mac_over(
            self.secret.expose_secret().as_bytes(),
            &[ts.as_bytes(), b".", body],
        )?;
        Ok(format!(
            "t={},v1={}",
            ts,
            hex::encode(mac.finalize().into_bytes())
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const NOW: i64 = 1_760_000_000;
    const BODY: &[u8] = br#"{"type":"email.received","data":{"email_id":"em_1","from":"a@b.com","subject":"hi"}}"#;

    fn email_verifier() -> EmailSignatureVerifier {
        EmailSignatureVerifier::new(SecretString::from(format!(
            "whsec_{}",
            BASE64.encode(b"test-signing-key")
        )))
    }

    fn signed_headers(verifier: &EmailSignatureVerifier, id: &str, ts: i64, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(EMAIL_ID_HEADER, HeaderValue::from_str(id).unwrap());
        headers.insert(
            EMAIL_TIMESTAMP_HEADER,
            HeaderValue::from_str(&ts.to_string()).unwrap(),
        );
        let sig = verifier.sign(id, ts, body).unwrap();
        headers.insert(EMAIL_SIGNATURE_HEADER, HeaderValue::from_str(&sig).unwrap());
        headers
    }

    #[test]
    fn test_valid_email_signature_returns_event() {
        let verifier = email_verifier();
        let headers = signed_headers(&verifier, "msg_1", NOW, BODY);
        let event = verifier.verify_at(&headers, BODY, NOW).unwrap();
        assert_eq!(event.event_type, "email.received");
        assert_eq!(event.data.email_id, "em_1");
    }

    #[test]
    fn test_any_listed_signature_may_match() {
        let verifier = email_verifier();
        let mut headers = signed_headers(&verifier, "msg_1", NOW, BODY);
        let good = verifier.sign("msg_1", NOW, BODY).unwrap();
        let combined = format!("v1,AAAA {}", good);
        headers.insert(
            EMAIL_SIGNATURE_HEADER,
            HeaderValue::from_str(&combined).unwrap(),
        );
        assert!(verifier.verify_at(&headers, BODY, NOW).is_ok());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let verifier = email_verifier();
        let headers = signed_headers(&verifier, "msg_1", NOW, BODY);
        let tampered = br#"{"type":"email.received","data":{"email_id":"em_2","from":"a@b.com","subject":"hi"}}"#;
        assert_eq!(
            verifier.verify_at(&headers, tampered, NOW).unwrap_err(),
            SignatureError::Mismatch
        );
    }

    #[test]
    fn test_signature_is_bound_to_message_id() {
        let verifier = email_verifier();
        let mut headers = signed_headers(&verifier, "msg_1", NOW, BODY);
        headers.insert(EMAIL_ID_HEADER, HeaderValue::from_static("msg_2"));
        assert_eq!(
            verifier.verify_at(&headers, BODY, NOW).unwrap_err(),
            SignatureError::Mismatch
        );
    }

    #[test]
    fn test_missing_headers_fail_closed() {
        let verifier = email_verifier();
        for name in [EMAIL_ID_HEADER, EMAIL_TIMESTAMP_HEADER, EMAIL_SIGNATURE_HEADER] {
            let mut headers = signed_headers(&verifier, "msg_1", NOW, BODY);
            headers.remove(name);
            assert_eq!(
                verifier.verify_at(&headers, BODY, NOW).unwrap_err(),
                SignatureError::MissingHeader(name)
            );
        }
    }

    #[test]
    fn test_stale_and_future_timestamps_rejected() {
        let verifier = email_verifier();
        let headers = signed_headers(&verifier, "msg_1", NOW, BODY);
        assert_eq!(
            verifier.verify_at(&headers, BODY, NOW + 301).unwrap_err(),
            SignatureError::TimestampOutOfTolerance
        );
        assert_eq!(
            verifier.verify_at(&headers, BODY, NOW - 301).unwrap_err(),
            SignatureError::TimestampOutOfTolerance
        );
        assert!(verifier.verify_at(&headers, BODY, NOW + 300).is_ok());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let verifier = email_verifier();
        let headers = signed_headers(&verifier, "msg_1", NOW, BODY);
        let other = EmailSignatureVerifier::new(SecretString::from(format!(
            "whsec_{}",
            BASE64.encode(b"another-key")
        )));
        assert_eq!(
            other.verify_at(&headers, BODY, NOW).unwrap_err(),
            SignatureError::Mismatch
        );
    }

    #[test]
    fn test_unusable_secret_maps_to_config_error() {
        let verifier = email_verifier();
        let headers = signed_headers(&verifier, "msg_1", NOW, BODY);
        let broken = EmailSignatureVerifier::new(SecretString::from("whsec_***not-base64***"));
        let err = broken.verify_at(&headers, BODY, NOW).unwrap_err();
        assert!(matches!(err, SignatureError::InvalidSecret(_)));
        assert!(matches!(AppError::from(err), AppError::Config(_)));
    }

    #[test]
    fn test_signature_errors_map_to_authentication() {
        let err: AppError = SignatureError::Mismatch.into();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[test]
    fn test_payment_signature_round_trip_and_tamper() {
        let verifier = PaymentSignatureVerifier::new(SecretString::from("whsec_payment"));
        let body = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            PAYMENT_SIGNATURE_HEADER,
            HeaderValue::from_str(&verifier.sign(NOW, body).unwrap()).unwrap(),
        );

        let event: crate::domain::PaymentWebhookEvent =
            verifier.verify_at(&headers, body, NOW).unwrap();
        assert_eq!(event.session_id(), Some("cs_1"));

        let tampered = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_2"}}}"#;
        assert_eq!(
            verifier
                .verify_at::<serde_json::Value>(&headers, tampered, NOW)
                .unwrap_err(),
            SignatureError::Mismatch
        );
    }

    #[test]
    fn test_payment_header_without_timestamp_is_malformed() {
        let verifier = PaymentSignatureVerifier::new(SecretString::from("whsec_payment"));
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_SIGNATURE_HEADER, HeaderValue::from_static("v1=abcd"));
        assert_eq!(
            verifier
                .verify_at::<serde_json::Value>(&headers, b"{}", NOW)
                .unwrap_err(),
            SignatureError::MalformedHeader(PAYMENT_SIGNATURE_HEADER)
        );
    }
}
