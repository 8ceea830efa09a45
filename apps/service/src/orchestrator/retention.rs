//! Automatic retention of probe history.
//!
//! Rows older than `history_days` are deleted from the history store.
//! Cleanup runs periodically (hourly by default) as a background task.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config;
use crate::database::History;

/// How long probe history is kept
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep probe results
    pub history_days: i64,
    /// Time between cleanup runs
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { history_days: 30, interval: Duration::from_secs(3600) }
    }
}

impl From<&config::Retention> for RetentionPolicy {
    fn from(retention: &config::Retention) -> Self {
        Self {
            history_days: retention.history_days,
            interval: Duration::from_secs(retention.cleanup_interval_seconds.max(1)),
        }
    }
}

impl RetentionPolicy {
    fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_days)
    }
}

/// Cleanup manager for expired history
pub struct RetentionCleanup {
    history: Arc<dyn History>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(history: Arc<dyn History>, policy: RetentionPolicy) -> Self {
        Self { history, policy }
    }

    /// Delete every probe result older than the retention window
    pub async fn cleanup_expired_results(&self) -> Result<u64> {
        let cutoff = chrono::Utc::now() - self.policy.retention();
        debug!(%cutoff, days = self.policy.history_days, "Starting retention cleanup");

        let deleted = self.history.delete_older_than(cutoff).await?;

        info!("Retention cleanup completed: {} probe results deleted", deleted);
        Ok(deleted)
    }

    /// Start background cleanup task; stops when `shutdown` fires
    pub fn start_periodic_cleanup(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = self.cleanup_expired_results().await {
                    warn!("Periodic history cleanup failed: {}", e);
                }
            }

            debug!("Retention cleanup stopped");
        })
    }
}
