//! Webhook payload signing.
//!
//! Signatures are `hex(HMAC_SHA256(secret, body-bytes))` over the exact
//! serialized body. Receivers recompute the same MAC over the raw request
//! body and compare in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
#[error("failed to initialize HMAC for webhook signing")]
pub struct SignError;

/// Compute the signature header value for a payload.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, SignError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignError)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received signature against a payload (constant-time compare).
///
/// Exposed for receiver-side checks and for the delivery tests; the
/// dispatcher itself only signs.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = match sign_payload(secret, body) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    let received_bytes = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let expected_bytes = match hex::decode(&expected) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    if received_bytes.len() != expected_bytes.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a, b) in received_bytes.iter().zip(expected_bytes.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}
