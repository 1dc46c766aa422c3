//! HMAC-SHA256 signing of outbound webhook bodies.
//!
//! Every delivery sequence signs its body exactly once. The body is the
//! canonical JSON envelope `{"event_kind", "payload", "timestamp"}` with
//! object keys sorted at every depth, so the same inputs always serialize to
//! the same bytes and therefore the same signature. Receivers recompute the
//! HMAC over the raw request body with their copy of the secret and compare
//! it against the `X-Hookline-Signature` header, rejecting stale
//! `X-Hookline-Timestamp` values to bound replay.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use hookline_core::EventKind;
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>`.
pub const SIGNATURE_HEADER: &str = "X-Hookline-Signature";

/// Header carrying the signing timestamp in unix seconds.
pub const TIMESTAMP_HEADER: &str = "X-Hookline-Timestamp";

/// Header carrying the event kind tag.
pub const EVENT_HEADER: &str = "X-Hookline-Event";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Errors raised while producing a signed body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    /// Subscriber has no secret configured.
    #[error("subscriber secret is empty")]
    EmptySecret,

    /// Payload cannot be represented as canonical JSON.
    #[error("payload cannot be serialized: {0}")]
    Serialization(String),
}

/// Body and signature for one delivery sequence.
///
/// Retries reuse the same value, so every physical attempt carries identical
/// bytes and headers.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// Canonical JSON body.
    pub body: Bytes,
    /// Header value, `sha256=<hex>`.
    pub signature: String,
    /// Unix seconds embedded in the body.
    pub timestamp: i64,
}

impl std::fmt::Debug for SignedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPayload")
            .field("body_len", &self.body.len())
            .field("signature", &self.signature)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[derive(Serialize)]
struct Envelope<'a, P: ?Sized> {
    event_kind: &'a str,
    payload: &'a P,
    timestamp: i64,
}

/// Serializes the canonical envelope for `(kind, payload, timestamp)`.
///
/// Going through [`serde_json::Value`] sorts object keys at every depth,
/// independent of the payload type's field order.
///
/// # Errors
///
/// Returns [`SigningError::Serialization`] when the payload cannot be
/// represented as JSON, e.g. a map with non-string keys.
pub fn canonical_body<P>(
    kind: &EventKind,
    payload: &P,
    timestamp: i64,
) -> Result<Bytes, SigningError>
where
    P: Serialize + ?Sized,
{
    let envelope = Envelope { event_kind: kind.as_str(), payload, timestamp };

    let value = serde_json::to_value(&envelope)
        .map_err(|e| SigningError::Serialization(e.to_string()))?;
    let bytes =
        serde_json::to_vec(&value).map_err(|e| SigningError::Serialization(e.to_string()))?;

    Ok(Bytes::from(bytes))
}

/// Produces signed webhook bodies.
///
/// Stateless; the secret is supplied per call so a single signer serves all
/// subscribers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signer;

impl Signer {
    /// Creates a signer.
    pub fn new() -> Self {
        Self
    }

    /// Builds the canonical body and signs it with `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::EmptySecret`] for an empty secret and
    /// [`SigningError::Serialization`] when the payload is not JSON
    /// representable.
    pub fn sign<P>(
        &self,
        secret: &str,
        kind: &EventKind,
        payload: &P,
        timestamp: i64,
    ) -> Result<SignedPayload, SigningError>
    where
        P: Serialize + ?Sized,
    {
        if secret.is_empty() {
            return Err(SigningError::EmptySecret);
        }

        let body = canonical_body(kind, payload, timestamp)?;
        let signature = format!("{SIGNATURE_PREFIX}{}", generate_hmac_hex(&body, secret)?);

        Ok(SignedPayload { body, signature, timestamp })
    }
}

/// Computes the lowercase hex HMAC-SHA256 of `body` keyed by `secret`.
///
/// # Errors
///
/// Returns [`SigningError::EmptySecret`] for an empty secret.
pub fn generate_hmac_hex(body: &[u8], secret: &str) -> Result<String, SigningError> {
    if secret.is_empty() {
        return Err(SigningError::EmptySecret);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningError::EmptySecret)?;
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a signature header against a received body.
///
/// Accepts `sha256=<hex>` or bare 64-character hex. Comparison is
/// constant-time in the signature length.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(provided) = parse_signature(header) else {
        return false;
    };

    match generate_hmac_hex(body, secret) {
        Ok(expected) => timing_safe_eq(&provided.to_ascii_lowercase(), &expected),
        Err(_) => false,
    }
}

fn parse_signature(header: &str) -> Option<&str> {
    let hex = header.trim();
    let hex = hex.strip_prefix(SIGNATURE_PREFIX).unwrap_or(hex);

    (hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(hex)
}

fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn kind() -> EventKind {
        EventKind::from("application.created")
    }

    #[test]
    fn canonical_body_sorts_keys() {
        let body = canonical_body(&kind(), &json!({"z": 1, "a": {"y": 2, "b": 3}}), 1_700_000_000)
            .unwrap();

        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"{"event_kind":"application.created","payload":{"a":{"b":3,"y":2},"z":1},"timestamp":1700000000}"#
        );
    }

    #[test]
    fn struct_field_order_does_not_change_body() {
        #[derive(Serialize)]
        struct Forward {
            alpha: u8,
            beta: u8,
        }
        #[derive(Serialize)]
        struct Reverse {
            beta: u8,
            alpha: u8,
        }

        let a = canonical_body(&kind(), &Forward { alpha: 1, beta: 2 }, 7).unwrap();
        let b = canonical_body(&kind(), &Reverse { beta: 2, alpha: 1 }, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_string_map_keys_fail_serialization() {
        let mut payload = HashMap::new();
        payload.insert((1u8, 2u8), "tuple key");

        let err = Signer::new().sign("whsec", &kind(), &payload, 0).unwrap_err();
        assert!(matches!(err, SigningError::Serialization(_)));
    }

    #[test]
    fn empty_secret_rejected() {
        let err = Signer::new().sign("", &kind(), &json!({}), 0).unwrap_err();
        assert_eq!(err, SigningError::EmptySecret);
    }

    #[test]
    fn signature_verifies_against_body() {
        let signed = Signer::new().sign("whsec_test", &kind(), &json!({"id": "a1"}), 42).unwrap();

        assert!(signed.signature.starts_with("sha256="));
        assert_eq!(signed.signature.len(), "sha256=".len() + 64);
        assert!(verify_signature("whsec_test", &signed.body, &signed.signature));
        assert!(verify_signature(
            "whsec_test",
            &signed.body,
            signed.signature.trim_start_matches("sha256=")
        ));
        assert!(!verify_signature("whsec_other", &signed.body, &signed.signature));
        assert!(!verify_signature("whsec_test", b"tampered", &signed.signature));
    }

    #[test]
    fn malformed_headers_rejected() {
        assert!(!verify_signature("whsec", b"{}", ""));
        assert!(!verify_signature("whsec", b"{}", "sha256=abc"));
        assert!(!verify_signature("whsec", b"{}", &"z".repeat(64)));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let hex = generate_hmac_hex(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(hex, "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }
}
