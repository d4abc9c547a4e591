//! Periodic purge of refresh-token records that expired long ago.
//!
//! Records are kept for a grace period past expiry so that a late replay of a
//! consumed token is still recognised as reuse rather than as an unknown token.

use crate::db::error::RepositoryError;
use crate::db::repositories::RefreshTokenStore;
use chrono::{Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct RetentionSweeper {
    tokens: Arc<dyn RefreshTokenStore>,
    interval: std::time::Duration,
    grace: Duration,
}

impl RetentionSweeper {
    pub fn new(
        tokens: Arc<dyn RefreshTokenStore>,
        interval: std::time::Duration,
        grace: Duration,
    ) -> Self {
        Self {
            tokens,
            interval,
            grace,
        }
    }

    /// Deletes records whose expiry is older than the grace period.
    pub async fn run_once(&self) -> Result<usize, RepositoryError> {
        let cutoff = Utc::now() - self.grace;
        let purged = self.tokens.purge_expired(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "Purged expired refresh tokens");
        } else {
            debug!(%cutoff, "No expired refresh tokens to purge");
        }
        Ok(purged)
    }

    /// Sweeps on every tick until `shutdown` resolves. A failed sweep is
    /// logged and retried on the next tick.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval = ?self.interval,
            grace_hours = self.grace.num_hours(),
            "Retention sweeper started"
        );
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Refresh token purge failed: {e}");
                    }
                }
            }
        }
        info!("Retention sweeper stopped");
    }
}
