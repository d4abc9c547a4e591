use bcrypt::{HashParts, hash, verify};
use std::sync::Arc;

/// Cost bounds accepted by `bcrypt::hash`.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    HashingFailed(bcrypt::BcryptError),
    #[error("Password verification failed: {0}")]
    VerificationFailed(bcrypt::BcryptError),
    #[error("Password worker failed: {0}")]
    WorkerFailed(String),
}

/// Outcome of a password check. `rehash` carries a fresh hash when the stored
/// one was produced with a different cost than the configured one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordCheck {
    pub valid: bool,
    pub rehash: Option<String>,
}

impl PasswordCheck {
    fn rejected() -> Self {
        Self {
            valid: false,
            rehash: None,
        }
    }
}

#[derive(Clone)]
pub struct PasswordManager {
    cost: u32,
    // Compared against when the account does not exist, so unknown emails
    // cost the same bcrypt round as wrong passwords.
    dummy_hash: Arc<str>,
}

impl PasswordManager {
    pub fn new(cost: u32) -> Result<Self, PasswordError> {
        let dummy_hash = hash("dummy-password-for-timing", cost).map_err(PasswordError::HashingFailed)?;
        Ok(Self {
            cost,
            dummy_hash: dummy_hash.into(),
        })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        hash(password, self.cost).map_err(PasswordError::HashingFailed)
    }

    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        verify(password, hash).map_err(PasswordError::VerificationFailed)
    }

    pub fn needs_rehash(&self, hash: &str) -> bool {
        hash.parse::<HashParts>()
            .ok()
            .is_none_or(|parts| parts.get_cost() != self.cost)
    }

    /// Verifies against `stored`, or against a dummy hash when there is none.
    /// A malformed stored hash is reported as a mismatch, not an error.
    pub fn verify_timing_safe(
        &self,
        password: &str,
        stored: Option<&str>,
    ) -> Result<PasswordCheck, PasswordError> {
        let Some(stored) = stored.filter(|h| !h.is_empty()) else {
            let _ = verify(password, &self.dummy_hash);
            return Ok(PasswordCheck::rejected());
        };

        if !verify(password, stored).unwrap_or(false) {
            return Ok(PasswordCheck::rejected());
        }

        let rehash = if self.needs_rehash(stored) {
            Some(self.hash(password)?)
        } else {
            None
        };

        Ok(PasswordCheck {
            valid: true,
            rehash,
        })
    }

    /// `hash` on the blocking pool; bcrypt would otherwise stall the runtime.
    pub async fn hash_blocking(&self, password: String) -> Result<String, PasswordError> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.hash(&password))
            .await
            .map_err(|e| PasswordError::WorkerFailed(e.to_string()))?
    }

    pub async fn verify_blocking(
        &self,
        password: String,
        stored: Option<String>,
    ) -> Result<PasswordCheck, PasswordError> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.verify_timing_safe(&password, stored.as_deref()))
            .await
            .map_err(|e| PasswordError::WorkerFailed(e.to_string()))?
    }
}
