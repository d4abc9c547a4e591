//! Redis-backed access-token denylist.
//!
//! Keys are `blacklist:<jti>` with a millisecond TTL equal to the token's
//! remaining lifetime, so Redis evicts them exactly when the token would have
//! expired anyway.

use super::{AccessTokenDenylist, CacheError, denylist_key, remaining_ttl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct RedisDenylist {
    connection: MultiplexedConnection,
    op_timeout: Duration,
}

impl RedisDenylist {
    /// Connects with exponential backoff (3 attempts, starting at 100ms).
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, CacheError> {
        info!("Connecting denylist cache at {}", mask_url(url));

        let client = Client::open(url).map_err(|e| {
            error!("Invalid Redis URL: {e}");
            CacheError::Connection(format!("Invalid Redis URL: {e}"))
        })?;

        let mut attempts = 0;
        let mut delay = CONNECT_RETRY_DELAY;
        let connection = loop {
            attempts += 1;
            match client.get_multiplexed_async_connection().await {
                Ok(connection) => break connection,
                Err(e) if attempts < CONNECT_ATTEMPTS => {
                    warn!(
                        "Failed to connect to Redis (attempt {attempts}/{CONNECT_ATTEMPTS}): {e}. Retrying in {delay:?}..."
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
                Err(e) => {
                    error!("Failed to connect to Redis after {attempts} attempts: {e}");
                    return Err(e.into());
                }
            }
        };

        info!("Denylist cache connected");
        Ok(Self {
            connection,
            op_timeout,
        })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        }
    }
}

#[async_trait]
impl AccessTokenDenylist for RedisDenylist {
    async fn deny(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), CacheError> {
        let Some(ttl) = remaining_ttl(expires_at, Utc::now()) else {
            debug!(jti, "Access token already expired, nothing to deny");
            return Ok(());
        };

        let key = denylist_key(jti);
        // Round up so the entry never lapses before the token does.
        let ttl_ms = u64::try_from(ttl.as_micros().div_ceil(1000)).unwrap_or(u64::MAX);
        let mut conn = self.connection.clone();
        self.bounded(conn.pset_ex::<_, _, ()>(&key, "1", ttl_ms))
            .await
            .inspect_err(|e| error!(jti, "Failed to deny access token: {e}"))?;

        debug!(jti, ttl_ms, "Access token denied");
        Ok(())
    }

    async fn is_denied(&self, jti: &str) -> Result<bool, CacheError> {
        let key = denylist_key(jti);
        let mut conn = self.connection.clone();
        self.bounded(conn.exists::<_, bool>(&key)).await
    }
}

/// Masks the password in a Redis URL for logging
fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@')
        && let Some(scheme_end) = url.find("://")
    {
        return format!("{}***{}", &url[..scheme_end + 3], &url[at_pos..]);
    }
    url.to_string()
}
