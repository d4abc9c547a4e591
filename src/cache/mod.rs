//! Short-TTL denylist of explicitly revoked access tokens, keyed by `jti`.

pub mod memory;
pub mod redis_denylist;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use memory::MemoryDenylist;
pub use redis_denylist::RedisDenylist;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connection(String),
    #[error("Cache command failed: {0}")]
    Command(String),
    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

#[async_trait]
pub trait AccessTokenDenylist: Send + Sync {
    /// Denies `jti` until `expires_at` and not a moment longer.
    /// A token that has already expired needs no entry.
    async fn deny(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), CacheError>;

    async fn is_denied(&self, jti: &str) -> Result<bool, CacheError>;
}

/// Remaining lifetime of a token, or `None` once it is past expiry.
pub(crate) fn remaining_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (expires_at - now).to_std().ok().filter(|ttl| !ttl.is_zero())
}

pub(crate) fn denylist_key(jti: &str) -> String {
    format!("blacklist:{jti}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_ttl_is_none_for_expired_tokens() {
        let now = Utc::now();
        assert_eq!(remaining_ttl(now - chrono::Duration::seconds(1), now), None);
        assert_eq!(remaining_ttl(now, now), None);
    }

    #[test]
    fn remaining_ttl_matches_time_to_expiry() {
        let now = Utc::now();
        let ttl = remaining_ttl(now + chrono::Duration::seconds(90), now).unwrap();
        assert_eq!(ttl, Duration::from_secs(90));
    }

    #[test]
    fn denylist_key_is_namespaced() {
        assert_eq!(denylist_key("abc"), "blacklist:abc");
    }
}
