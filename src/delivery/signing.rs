//! Webhook payload signing.
//!
//! The signature is hex HMAC-SHA256 over the raw payload bytes, keyed by
//! the destination's secret. Receivers recompute it over the body they got.

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::types::DeliveryTask;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-payrail-signature";
pub const EVENT_TYPE_HEADER: &str = "x-payrail-event";
pub const DELIVERY_ID_HEADER: &str = "x-payrail-delivery";
pub const TIMESTAMP_HEADER: &str = "x-payrail-timestamp";

/// Hex signature of `payload`; empty when there is no secret
pub fn sign(secret: Option<&str>, payload: &[u8]) -> String {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return String::new();
    };
    // HMAC accepts keys of any length, so new_from_slice cannot fail here
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Constant-time check of a hex signature
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Headers sent with every attempt of `task`
pub fn signed_headers(task: &DeliveryTask, now: DateTime<Utc>) -> Vec<(String, String)> {
    vec![
        ("content-type".to_string(), "application/json".to_string()),
        (
            SIGNATURE_HEADER.to_string(),
            sign(task.secret.as_deref(), &task.payload),
        ),
        (EVENT_TYPE_HEADER.to_string(), task.event_type.clone()),
        (DELIVERY_ID_HEADER.to_string(), task.id.clone()),
        (
            TIMESTAMP_HEADER.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ]
}

/// Replace the timestamp header with `now`, keeping the rest
pub fn refresh_timestamp(headers: &mut Vec<(String, String)>, now: DateTime<Utc>) {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    match headers
        .iter_mut()
        .find(|(name, _)| name.eq_ignore_ascii_case(TIMESTAMP_HEADER))
    {
        Some((_, value)) => *value = stamp,
        None => headers.push((TIMESTAMP_HEADER.to_string(), stamp)),
    }
}
