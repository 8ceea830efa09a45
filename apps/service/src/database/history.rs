use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};

use super::StoreError;
use super::models::{ProbeResult, UserId, i64_to_timestamp, timestamp_to_i64};
use crate::monitoring::types::Outcome;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Append-only time-series of probe results
#[async_trait]
pub trait History: Send + Sync {
    /// Persist one observation, returning its row id
    async fn append(&self, result: &ProbeResult) -> Result<i64, StoreError>;

    /// Most recent observation per URL for `owner`
    async fn latest_per_url(&self, owner: UserId) -> Result<Vec<ProbeResult>, StoreError>;

    /// Observations for one (owner, url), newest first
    async fn history_for_url(&self, owner: UserId, url: &str, limit: Option<usize>) -> Result<Vec<ProbeResult>, StoreError>;

    async fn count_for_owner(&self, owner: UserId) -> Result<u64, StoreError>;

    /// Drop observations older than `cutoff`, returning how many went
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct LibsqlHistory {
    pool: LibsqlPool,
}

impl LibsqlHistory {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }
}

const RESULT_COLUMNS: &str = "id, owner_user_id, url, observed_at, latency_ms, outcome";

fn result_from_row(row: &Row) -> Result<ProbeResult, StoreError> {
    let outcome: String = row.get(5)?;
    let outcome = outcome
        .parse::<Outcome>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    Ok(ProbeResult {
        id: Some(row.get(0)?),
        endpoint_id: None,
        owner_user_id: row.get(1)?,
        url: row.get(2)?,
        observed_at: i64_to_timestamp(row.get(3)?),
        latency_ms: row.get(4)?,
        outcome,
    })
}

#[async_trait]
impl History for LibsqlHistory {
    async fn append(&self, result: &ProbeResult) -> Result<i64, StoreError> {
        let conn = self.get_conn().await?;

        let mut rows = conn
            .query(
                "INSERT INTO probe_results (owner_user_id, url, observed_at, latency_ms, outcome)
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
                params![
                    result.owner_user_id,
                    result.url.as_str(),
                    timestamp_to_i64(result.observed_at),
                    result.latency_ms,
                    result.outcome.as_str()
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(StoreError::Corrupt("insert returned no id".to_string())),
        }
    }

    async fn latest_per_url(&self, owner: UserId) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM probe_results p
                     WHERE p.owner_user_id = ?1
                       AND p.id = (
                           SELECT id FROM probe_results
                           WHERE owner_user_id = ?1 AND url = p.url
                           ORDER BY observed_at DESC, id DESC
                           LIMIT 1
                       )
                     ORDER BY p.url"
                ),
                params![owner],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(result_from_row(&row)?);
        }
        Ok(results)
    }

    async fn history_for_url(&self, owner: UserId, url: &str, limit: Option<usize>) -> Result<Vec<ProbeResult>, StoreError> {
        let conn = self.get_conn().await?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|limit| limit as i64).unwrap_or(-1);

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM probe_results
                     WHERE owner_user_id = ? AND url = ?
                     ORDER BY observed_at DESC, id DESC
                     LIMIT ?"
                ),
                params![owner, url, limit],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(result_from_row(&row)?);
        }
        Ok(results)
    }

    async fn count_for_owner(&self, owner: UserId) -> Result<u64, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM probe_results WHERE owner_user_id = ?", params![owner])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as u64),
            None => Ok(0),
        }
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM probe_results WHERE observed_at < ?", params![timestamp_to_i64(cutoff)])
            .await?;
        Ok(deleted)
    }
}
