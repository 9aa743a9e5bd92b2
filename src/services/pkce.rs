//! PKCE (RFC 7636) pair generation for redirect-chain logins.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Random bytes behind each verifier
const VERIFIER_BYTES: usize = 28;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let bytes: [u8; VERIFIER_BYTES] = rand::thread_rng().gen();
        let verifier = bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        let challenge = challenge_for(&verifier);
        Self { verifier, challenge }
    }
}

/// `base64url_nopad(SHA256(verifier))`
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rfc7636_vector() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let pair = PkcePair::generate();
        assert_eq!(challenge_for(&pair.verifier), pair.challenge);
        assert_eq!(pair.verifier.len(), VERIFIER_BYTES * 2);
        assert!(pair.verifier.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!pair.challenge.contains('='));
    }

    #[test]
    fn test_no_collisions() {
        let pairs: Vec<PkcePair> = (0..10_000).map(|_| PkcePair::generate()).collect();
        let verifiers: HashSet<&str> = pairs.iter().map(|p| p.verifier.as_str()).collect();
        let challenges: HashSet<&str> = pairs.iter().map(|p| p.challenge.as_str()).collect();
        assert_eq!(verifiers.len(), pairs.len());
        assert_eq!(challenges.len(), pairs.len());
    }
}
