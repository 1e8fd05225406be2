//! Random secrets and their digests
//!
//! Refresh secrets and API keys are high-entropy random values, so a single
//! fast SHA-256 pass is enough to store them; the slow password hash is
//! reserved for low-entropy human passwords.

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of random bytes in refresh secrets and API keys (256 bits)
pub const SECRET_BYTES: usize = 32;

/// Generate a URL-safe random secret
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex-encoded SHA-256 digest of a secret
pub fn digest_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare two digests without an early exit on the first differing byte
pub fn digests_match(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_are_unique_and_url_safe() {
        let a = generate_secret();
        let b = generate_secret();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_digest_is_deterministic() {
        let digest = digest_secret("s3cret");
        assert_eq!(digest, digest_secret("s3cret"));
        assert_ne!(digest, digest_secret("s3cret2"));
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_digests_match() {
        let digest = digest_secret("value");
        assert!(digests_match(&digest, &digest_secret("value")));
        assert!(!digests_match(&digest, &digest_secret("other")));
        assert!(!digests_match(&digest, ""));
    }
}
