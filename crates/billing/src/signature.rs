//! Webhook signature verification.
//!
//! All verification runs over the exact raw byte payload as received.
//! Re-serializing parsed JSON before signing risks field-order and
//! whitespace mismatches, so callers must pass the untouched request body.
//! Verification returns `false` on malformed headers, never an error.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a Stripe-signed payload (seconds).
const STRIPE_TOLERANCE_SECS: i64 = 300;

/// Verify a plain hex-encoded HMAC-SHA256 of the raw payload.
///
/// This is the Razorpay scheme: `X-Razorpay-Signature` carries
/// `hex(hmac_sha256(secret, body))`.
pub fn verify_hmac_hex(payload: &[u8], signature_hex: &str, secret: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let expected = hmac_sha256(secret, payload);
    constant_time_eq(&expected, &signature)
}

/// Verify a Stripe-style signature header.
///
/// Header format: `t=<unix>,v1=<hex>[,v0=<hex>]`; the signed payload is
/// `"{t}.{body}"`. Timestamps outside the tolerance window are rejected to
/// limit replay.
pub fn verify_stripe_header(payload: &[u8], header: &str, secret: &str, now_unix: i64) -> bool {
    let Some((timestamp, v1_signature)) = parse_stripe_header(header) else {
        return false;
    };

    if (now_unix - timestamp).abs() > STRIPE_TOLERANCE_SECS {
        return false;
    }

    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);

    let expected = hmac_sha256(secret, &signed);
    constant_time_eq(&expected, &v1_signature)
}

/// Parse `t=...,v1=...` into (timestamp, decoded v1). Unknown fields are
/// ignored for forward compatibility.
fn parse_stripe_header(header: &str) -> Option<(i64, Vec<u8>)> {
    let mut timestamp: Option<i64> = None;
    let mut v1: Option<Vec<u8>> = None;

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => v1 = hex::decode(value).ok(),
            _ => {}
        }
    }

    Some((timestamp?, v1?))
}

fn hmac_sha256(secret: &str, payload: &[u8]) -> Vec<u8> {
    // HMAC-SHA256 accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison; length mismatch is an immediate reject.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Produce a valid Stripe-style signature header for test fixtures.
#[cfg(test)]
pub(crate) fn stripe_test_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);
    format!("t={},v1={}", timestamp, hex::encode(hmac_sha256(secret, &signed)))
}

/// Produce a valid Razorpay-style signature for test fixtures.
#[cfg(test)]
pub(crate) fn razorpay_test_signature(secret: &str, payload: &[u8]) -> String {
    hex::encode(hmac_sha256(secret, payload))
}
