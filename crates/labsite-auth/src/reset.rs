//! Password-reset tokens
//!
//! The plaintext token only travels in the emailed link; the database keeps
//! its SHA-256 digest.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

const RESET_TOKEN_BYTES: usize = 32;

/// A freshly issued reset token
#[derive(Debug, Clone)]
pub struct ResetToken {
    /// Opaque value sent to the user
    pub token: String,
    /// Digest stored on the user row
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    /// Issue a token valid for `ttl`
    pub fn issue(ttl: Duration) -> Self {
        let token = generate_reset_token();
        let digest = digest_reset_token(&token);
        Self {
            token,
            digest,
            expires_at: Utc::now() + ttl,
        }
    }
}

/// Generate a random hex token
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 digest of a token, hex encoded
pub fn digest_reset_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
