//! Webhook signature generation and verification

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Scheme prefix of the signature header value.
pub const SIGNATURE_SCHEME: &str = "sha256";

/// HMAC-SHA256 signer for outbound deliveries.
///
/// The header value is `sha256=<hex digest>` over the exact raw body, so a
/// receiver authenticates by recomputing the digest over the bytes it got.
#[derive(Clone)]
pub struct WebhookSignature {
    secret: String,
}

impl WebhookSignature {
    /// Create a new signature utility with the given secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signature header value for `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        format!("{}={}", SIGNATURE_SCHEME, self.digest(body))
    }

    /// Check a signature header value against `body`.
    pub fn verify(&self, body: &[u8], header: &str) -> bool {
        let Some((scheme, signature)) = header.trim().split_once('=') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case(SIGNATURE_SCHEME) {
            return false;
        }

        constant_time_compare(signature, &self.digest(body))
    }

    fn digest(&self, body: &[u8]) -> String {
        // HMAC accepts keys of any length, so this never falls back.
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for WebhookSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSignature")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Header names for outbound deliveries
pub mod headers {
    /// HMAC signature of the raw body
    pub const SIGNATURE: &str = "X-Webhook-Signature";

    /// Event type
    pub const EVENT_TYPE: &str = "X-Webhook-Event";

    /// Idempotency key shared by every delivery of one published event
    pub const IDEMPOTENCY_KEY: &str = "X-Idempotency-Key";

    /// Delivery id
    pub const DELIVERY_ID: &str = "X-Webhook-Delivery";
}
