//! Payment provider webhook events: signature verification and payload
//! parsing. Nothing here touches the database; see
//! [`PaymentReconciler`](crate::services::reconciler::PaymentReconciler) for
//! what an event does to an order.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no signature matched")]
    Mismatch,
    #[error("webhook signing secret not configured")]
    NoSecret,
}

fn mac_for(secret: &str, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::NoSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Builds a `t=<timestamp>,v1=<hex>` header value for `payload`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
    let ts = timestamp.to_string();
    let mac = mac_for(secret, &ts, payload)?;
    Ok(format!(
        "t={},v1={}",
        ts,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Checks a `Stripe-Signature` header against the raw request body.
///
/// The header carries `t=<unix seconds>` and one or more `v1=<hex>` entries;
/// any `v1` that matches HMAC-SHA256(secret, "<t>.<body>") is accepted.
/// Timestamps further than `tolerance_secs` from `now` in either direction
/// are rejected. Comparison is constant time.
pub fn verify_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::NoSecret);
    }
    let header = header.ok_or(SignatureError::Missing)?;

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let raw_ts = timestamp.ok_or(SignatureError::Malformed)?;
    let ts: i64 = raw_ts.parse().map_err(|_| SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(ts) > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mac = mac_for(secret, raw_ts, payload)?;
    let matched = candidates
        .into_iter()
        .filter_map(|candidate| hex::decode(candidate).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    /// Acknowledged and ignored.
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastPaymentError {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentIntentObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentEventData {
    #[serde(default)]
    pub object: PaymentIntentObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: PaymentEventData,
}

impl PaymentEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn kind(&self) -> PaymentEventKind {
        match self.event_type.as_str() {
            EVENT_PAYMENT_SUCCEEDED => PaymentEventKind::Succeeded,
            EVENT_PAYMENT_FAILED => PaymentEventKind::Failed,
            _ => PaymentEventKind::Other,
        }
    }

    /// Provider payment intent id the event refers to.
    pub fn intent_id(&self) -> &str {
        &self.data.object.id
    }

    pub fn failure(&self) -> Option<&LastPaymentError> {
        self.data.object.last_payment_error.as_ref()
    }
}
