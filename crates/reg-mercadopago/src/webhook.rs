//! # Mercado Pago Webhooks
//!
//! Signature verification and notification parsing for inbound
//! Mercado Pago notifications.
//!
//! ```text
//! x-signature: ts=1704908010,v1=618c85345248dd820d5fd456117c2ab2ef8eda45a0282ff693eac24131a5e839
//! x-request-id: bb56a2f1-6aae-46ac-982e-9dcd3581d08e
//!
//! manifest = "id:{data.id};request-id:{x-request-id};ts:{ts};"
//! v1       = hex(HMAC-SHA256(secret, manifest))
//! ```
//!
//! Verification fails closed. Without a secret every notification is
//! refused unless unsigned delivery was explicitly allowed.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum age of a signed notification
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Timestamps above this are milliseconds
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookVerificationError {
    #[error("webhook secret not configured")]
    MissingSecret,

    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("malformed signature header: {0}")]
    MalformedSignature(String),

    #[error("timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("invalid webhook secret")]
    InvalidSecret,

    #[error("signed id '{signed}' does not match notified id '{notified}'")]
    IdMismatch { signed: String, notified: String },
}

/// How a notification passed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Signed,
    /// No usable signature, accepted because unsigned delivery is allowed
    UnsignedAllowed,
}

/// Verifies `x-signature` headers
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    allow_unsigned: bool,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            allow_unsigned: false,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Builder: accept notifications that carry no verifiable signature
    pub fn allow_unsigned(mut self, allow: bool) -> Self {
        self.allow_unsigned = allow;
        self
    }

    pub fn with_tolerance_secs(mut self, secs: i64) -> Self {
        self.tolerance_secs = secs;
        self
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Check a notification's signature.
    ///
    /// A present but wrong signature is always rejected, even when unsigned
    /// delivery is allowed.
    pub fn verify(
        &self,
        signature: Option<&str>,
        request_id: Option<&str>,
        data_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Verification, WebhookVerificationError> {
        let Some(secret) = self.secret.as_deref() else {
            return self.unsigned(WebhookVerificationError::MissingSecret);
        };

        let Some(signature) = signature else {
            return self.unsigned(WebhookVerificationError::MissingHeader("x-signature"));
        };

        let header = parse_signature_header(signature)?;

        let ts_secs = if header.timestamp > MILLIS_THRESHOLD {
            header.timestamp / 1000
        } else {
            header.timestamp
        };

        if (now.timestamp() - ts_secs).abs() > self.tolerance_secs {
            return Err(WebhookVerificationError::TimestampOutOfTolerance);
        }

        let manifest = signature_manifest(data_id, request_id, &header.raw_timestamp);
        let expected = compute_hmac_sha256(secret, &manifest)?;

        if constant_time_compare(&header.signature.to_ascii_lowercase(), &expected) {
            debug!("Verified Mercado Pago webhook signature");
            Ok(Verification::Signed)
        } else {
            Err(WebhookVerificationError::SignatureMismatch)
        }
    }

    fn unsigned(
        &self,
        reason: WebhookVerificationError,
    ) -> Result<Verification, WebhookVerificationError> {
        if self.allow_unsigned {
            warn!("Accepting unsigned webhook: {}", reason);
            Ok(Verification::UnsignedAllowed)
        } else {
            Err(reason)
        }
    }
}

/// Build the signed manifest, omitting parts that are absent
pub fn signature_manifest(data_id: &str, request_id: Option<&str>, ts: &str) -> String {
    let mut manifest = String::new();
    if !data_id.is_empty() {
        manifest.push_str(&format!("id:{data_id};"));
    }
    if let Some(request_id) = request_id.filter(|r| !r.is_empty()) {
        manifest.push_str(&format!("request-id:{request_id};"));
    }
    if !ts.is_empty() {
        manifest.push_str(&format!("ts:{ts};"));
    }
    manifest
}

// =============================================================================
// Notification Parsing
// =============================================================================

/// Inbound notification, from the JSON body and the query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub topic: Option<String>,
    pub payment_id: Option<String>,
}

impl WebhookNotification {
    /// Parses a notification.
    ///
    /// The query's `data.id` is the signed id. When present it is the payment
    /// id, and any other id in the body or query must agree with it.
    pub fn parse(
        body: &Value,
        query: &HashMap<String, String>,
    ) -> Result<Self, WebhookVerificationError> {
        let topic = body
            .get("topic")
            .and_then(Value::as_str)
            .or_else(|| body.get("type").and_then(Value::as_str))
            .or_else(|| query.get("topic").map(String::as_str))
            .or_else(|| query.get("type").map(String::as_str))
            .map(String::from);

        let notified = body
            .get("resource")
            .and_then(Value::as_str)
            .and_then(|resource| resource.trim_end_matches('/').rsplit('/').next())
            .map(String::from)
            .or_else(|| query.get("id").cloned())
            .or_else(|| body.get("data").and_then(|d| d.get("id")).and_then(id_string))
            .filter(|id| !id.trim().is_empty());

        let signed = query
            .get("data.id")
            .filter(|id| !id.trim().is_empty())
            .cloned();

        let payment_id = match (signed, notified) {
            (Some(signed), Some(notified)) if !signed.eq_ignore_ascii_case(&notified) => {
                return Err(WebhookVerificationError::IdMismatch { signed, notified });
            }
            (Some(signed), _) => Some(signed),
            (None, notified) => notified,
        };

        Ok(Self { topic, payment_id })
    }

    pub fn is_payment(&self) -> bool {
        self.topic.as_deref() == Some("payment")
    }

    /// Id used in the signature manifest, lowercased like the sender does
    pub fn signature_data_id(&self) -> String {
        self.payment_id
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Webhook Signature Verification
// =============================================================================

struct SignatureHeader {
    raw_timestamp: String,
    timestamp: i64,
    signature: String,
}

fn parse_signature_header(header: &str) -> Result<SignatureHeader, WebhookVerificationError> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ts" => timestamp = Some(value.trim().to_string()),
            "v1" => signature = Some(value.trim().to_string()),
            _ => {}
        }
    }

    let raw_timestamp = timestamp.ok_or_else(|| {
        WebhookVerificationError::MalformedSignature("missing ts".to_string())
    })?;
    let signature = signature.ok_or_else(|| {
        WebhookVerificationError::MalformedSignature("missing v1".to_string())
    })?;
    let timestamp = raw_timestamp.parse().map_err(|_| {
        WebhookVerificationError::MalformedSignature(format!("bad ts '{raw_timestamp}'"))
    })?;

    Ok(SignatureHeader {
        raw_timestamp,
        timestamp,
        signature,
    })
}

pub fn compute_hmac_sha256(secret: &str, message: &str) -> Result<String, WebhookVerificationError> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookVerificationError::InvalidSecret)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
