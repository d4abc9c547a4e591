//! Opaque refresh-token secrets.
//!
//! The client receives 32 random bytes, base64url-encoded; the store only
//! ever sees the SHA-256 of that string.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

const SECRET_BYTES: usize = 32;

pub struct RefreshSecret {
    /// Handed to the client exactly once.
    pub token: String,
    pub hash: String,
}

impl RefreshSecret {
    pub fn generate() -> Result<Self, rand_core::Error> {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.try_fill_bytes(&mut bytes)?;
        let token = URL_SAFE_NO_PAD.encode(bytes);
        let hash = hash_token(&token);
        Ok(Self { token, hash })
    }
}

/// Hex-encoded SHA-256 of the presented token string.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
