//! Cryptographic utilities for LeafMesh
//!
//! Bearer token generation, token fingerprints for logs, and TOTP
//! verification for step-up authentication.

use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, Secret, TOTP};

const TOKEN_BYTES: usize = 32;
const TOTP_STEP_SECS: i64 = 30;

/// Generate a new random bearer token
pub fn generate_bearer_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Short, non-reversible identifier of a token, safe to log
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut v: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        v |= x ^ y;
    }
    v == 0
}

/// TOTP verifier used to unlock privileged credential operations
#[derive(Clone)]
pub struct OtpVerifier {
    totp: TOTP,
}

impl OtpVerifier {
    /// Build from a base32 (no padding) secret
    pub fn from_base32(secret_b32: &str) -> Result<Self> {
        let secret = Secret::Encoded(secret_b32.trim().to_string())
            .to_bytes()
            .map_err(|e| Error::Crypto(format!("invalid OTP secret: {:?}", e)))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            TOTP_STEP_SECS as u64,
            secret,
            Some("LeafMesh".to_string()),
            "controller".to_string(),
        )
        .map_err(|e| Error::Crypto(format!("invalid OTP secret: {}", e)))?;
        Ok(Self { totp })
    }

    /// Code for a given epoch second
    pub fn generate(&self, at: i64) -> String {
        self.totp.generate(at.max(0) as u64)
    }

    /// Accept the current code or one step either side for clock skew
    pub fn verify(&self, code: &str, now: i64) -> bool {
        let code = code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        [-TOTP_STEP_SECS, 0, TOTP_STEP_SECS]
            .iter()
            .any(|offset| constant_time_eq(&self.generate(now + offset), code))
    }
}

impl std::fmt::Debug for OtpVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpVerifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 20 bytes, base32 without padding
    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    #[test]
    fn test_bearer_token_shape() {
        let a = generate_bearer_token();
        let b = generate_bearer_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(!a.contains('='));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let fp = token_fingerprint("secret");
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, token_fingerprint("secret"));
        assert_ne!(fp, token_fingerprint("other"));
    }

    #[test]
    fn test_otp_window() {
        let verifier = OtpVerifier::from_base32(SECRET).unwrap();
        let now = 1_700_000_000;
        let code = verifier.generate(now);
        assert!(verifier.verify(&code, now));
        assert!(verifier.verify(&code, now + 30));
        assert!(!verifier.verify(&code, now + 300));
        assert!(!verifier.verify("12345", now));
        assert!(!verifier.verify("abcdef", now));
    }

    #[test]
    fn test_otp_rejects_bad_secret() {
        assert!(OtpVerifier::from_base32("not base32!").is_err());
    }
}
