//! Hex HMAC-SHA256 signatures over raw webhook bodies.
//!
//! The same scheme is used in both directions:
//! - outgoing QR code webhooks carry `X-Webhook-Signature: hex(hmac(secret, body))`
//! - incoming Razorpay callbacks carry `X-Razorpay-Signature` computed the same way
//!
//! The signature always covers the exact bytes on the wire, never a re-serialized
//! document.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::random_hex_token;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature on outgoing deliveries
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header naming the event type on outgoing deliveries
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Header Razorpay signs its callbacks with
pub const RAZORPAY_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

/// Generate a new per-QR-code webhook secret (32 random bytes, hex encoded).
pub fn generate_secret() -> String {
    random_hex_token(32)
}

/// Lower-case hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature in constant time. Case of the hex digits is ignored.
pub fn verify_hex(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let sig = sign_hex("Jefe", b"what do ya want for nothing?");
        assert_eq!(sig, "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = generate_secret();
        let payload = br#"{"event":"scan.created","qrCodeId":"abc"}"#;
        let signature = sign_hex(&secret, payload);

        assert!(verify_hex(&secret, payload, &signature));
        assert!(verify_hex(&secret, payload, &signature.to_uppercase()));

        // Any change to the body must fail
        assert!(!verify_hex(&secret, br#"{"event":"scan.created","qrCodeId":"abd"}"#, &signature));
        // Wrong secret must fail
        assert!(!verify_hex(&generate_secret(), payload, &signature));
    }

    #[test]
    fn test_verify_rejects_malformed_signatures() {
        assert!(!verify_hex("secret", b"body", ""));
        assert!(!verify_hex("secret", b"body", "not-hex"));
        let truncated = &sign_hex("secret", b"body")[..20];
        assert!(!verify_hex("secret", b"body", truncated));
    }
}
