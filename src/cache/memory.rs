use super::{AccessTokenDenylist, CacheError, remaining_ttl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Process-local denylist for tests and single-process deployments. Entries
/// lapse on the tokio clock, so tests can drive expiry with
/// `tokio::time::advance`. Every `deny` prunes lapsed entries, which keeps the
/// map bounded by the number of live denied tokens.
#[derive(Debug, Default)]
pub struct MemoryDenylist {
    entries: RwLock<HashMap<String, Instant>>,
}

impl MemoryDenylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops lapsed entries; returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, deadline| *deadline > now);
        before - entries.len()
    }
}

#[async_trait]
impl AccessTokenDenylist for MemoryDenylist {
    async fn deny(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), CacheError> {
        let Some(ttl) = remaining_ttl(expires_at, Utc::now()) else {
            return Ok(());
        };
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, deadline| *deadline > now);
        entries.insert(jti.to_string(), now + ttl);
        Ok(())
    }

    async fn is_denied(&self, jti: &str) -> Result<bool, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(jti)
            .is_some_and(|deadline| *deadline > Instant::now()))
    }
}
