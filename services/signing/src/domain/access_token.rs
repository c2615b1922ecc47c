/// Signer access tokens
///
/// A token is a 256-bit random value handed to a signer when their turn
/// starts. Only its SHA-256 digest is persisted, so a storage leak never
/// exposes a usable token.
///
/// Requirements: 2.3, 7.2
use rand::RngCore;
use sha2::{Digest, Sha256};

pub struct AccessToken;

impl AccessToken {
    /// Generate a fresh token and its digest
    ///
    /// Returns `(token, digest)`. The token goes out once in the turn
    /// notification; the digest is what gets stored on the signer.
    pub fn generate() -> (String, String) {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        let digest = Self::digest(&token);
        (token, digest)
    }

    /// SHA-256 digest of a presented token, hex encoded
    pub fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compare a presented token against a stored digest
    pub fn verify(token: &str, stored_digest: &str) -> bool {
        Self::digest(token) == stored_digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_returns_hex_token_and_digest() {
        let (token, digest) = AccessToken::generate();
        assert_eq!(token.len(), 64);
        assert_eq!(digest.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(AccessToken::digest(&token), digest);
    }

    #[test]
    fn test_generate_is_not_repeatable() {
        let (a, _) = AccessToken::generate();
        let (b, _) = AccessToken::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            AccessToken::digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_accepts_matching_token() {
        let (token, digest) = AccessToken::generate();
        assert!(AccessToken::verify(&token, &digest));
    }

    #[test]
    fn test_verify_rejects_wrong_token() {
        let (_, digest) = AccessToken::generate();
        assert!(!AccessToken::verify("not-the-token", &digest));
    }
}
