use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};

/// Prefix carried by every developer API key
pub const API_KEY_PREFIX: &str = "sk_";

/// Number of leading key characters kept in the clear for display
const DISPLAY_PREFIX_LEN: usize = 12;

/// Generates a developer API key with 256 bits of entropy.
///
/// The key is formatted as `sk_{base64url_encoded_random_bytes}` (no padding),
/// so it is always 46 characters long.
pub fn generate_api_key() -> String {
    let mut key_bytes = [0u8; 32];
    rng().fill(&mut key_bytes);

    format!("{API_KEY_PREFIX}{}", general_purpose::URL_SAFE_NO_PAD.encode(key_bytes))
}

/// Lookup digest stored in place of the key itself (lower-case hex SHA-256).
///
/// Keys carry 256 bits of entropy, so a fast digest is enough and lets the
/// column be indexed for direct lookup.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// The recognisable part of a key shown in listings, e.g. `sk_AbC123xYz...`
pub fn display_prefix(key: &str) -> String {
    let head: String = key.chars().take(DISPLAY_PREFIX_LEN).collect();
    format!("{head}...")
}

/// Random token of `n_bytes` bytes, hex encoded.
///
/// Used for webhook secrets, invitation tokens and domain verification tokens.
pub fn random_hex_token(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rng().fill(bytes.as_mut_slice());
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_api_key_format() {
        let key = generate_api_key();
        assert!(key.starts_with("sk_"));
        assert_eq!(key.len(), 46);
        assert!(!key.contains('='));
        assert!(key[3..].chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generate_api_key_uniqueness() {
        let keys: std::collections::HashSet<_> = (0..100).map(|_| generate_api_key()).collect();
        assert_eq!(keys.len(), 100);
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let key = "sk_test";
        let hash = hash_api_key(key);
        assert_eq!(hash, hash_api_key(key));
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_api_key("sk_other"));
        // sha256("abc")
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_display_prefix() {
        assert_eq!(display_prefix("sk_ABCDEFGHIJKLMNOP"), "sk_ABCDEFGHI...");
        assert_eq!(display_prefix("short"), "short...");
    }

    #[test]
    fn test_random_hex_token() {
        let token = random_hex_token(32);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, random_hex_token(32));
    }
}
