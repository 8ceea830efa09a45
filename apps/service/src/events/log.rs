//! Durable, partitioned, at-least-once log backed by libsql.
//!
//! Records are appended per partition with dense offsets starting at 0.
//! Consumer groups track one committed offset per partition; a partition is
//! consumed by whichever group member holds its lease.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use sha2::{Digest, Sha256};

use crate::database::models::{i64_to_timestamp, timestamp_to_i64};
use crate::pool::{LibsqlManager, LibsqlPool};

pub type PartitionId = u32;
pub type Offset = u64;

/// Where an appended record landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    pub partition: PartitionId,
    pub offset: Offset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub partition: PartitionId,
    pub offset: Offset,
    pub key: String,
    pub payload: Vec<u8>,
    pub appended_at: DateTime<Utc>,
}

/// Partition for a record key: first four bytes of SHA-256(key), modulo the partition count.
pub fn partition_for(key: &str, partitions: u32) -> PartitionId {
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions.max(1)
}

#[async_trait]
pub trait EventLog: Send + Sync {
    fn topic(&self) -> &str;

    fn partition_count(&self) -> u32;

    /// Append a record; records with the same key keep their relative order
    async fn append(&self, key: &str, payload: &[u8]) -> Result<LogPosition>;

    /// Take or renew the lease on `partition` for `member`.
    ///
    /// Returns `false` while another member holds an unexpired lease.
    async fn claim(&self, group: &str, partition: PartitionId, member: &str, ttl: Duration) -> Result<bool>;

    async fn release(&self, group: &str, partition: PartitionId, member: &str) -> Result<()>;

    /// Next offset the group has to process; 0 for a new group
    async fn committed(&self, group: &str, partition: PartitionId) -> Result<Offset>;

    async fn fetch(&self, partition: PartitionId, from: Offset, max: usize) -> Result<Vec<LogRecord>>;

    /// Move the group's offset forward to `next_offset`.
    ///
    /// Only the lease holder may commit; returns `false` otherwise. Offsets
    /// never move backwards.
    async fn commit(&self, group: &str, partition: PartitionId, member: &str, next_offset: Offset) -> Result<bool>;

    /// Count one more failed delivery of the record at `offset`, returning the total
    async fn record_redelivery(&self, group: &str, partition: PartitionId, offset: Offset) -> Result<u32>;
}

pub struct LibsqlEventLog {
    pool: LibsqlPool,
    topic: String,
    partitions: u32,
}

impl LibsqlEventLog {
    pub fn new_from_pool(pool: LibsqlPool, topic: impl Into<String>, partitions: u32) -> Self {
        Self { pool, topic: topic.into(), partitions: partitions.max(1) }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("Event log connection unavailable: {e}"))
    }
}

#[async_trait]
impl EventLog for LibsqlEventLog {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition_count(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, key: &str, payload: &[u8]) -> Result<LogPosition> {
        let partition = partition_for(key, self.partitions);
        let conn = self.get_conn().await?;

        // Offset allocation and insert are one statement, so concurrent
        // appenders serialize on the database write lock.
        let mut rows = conn
            .query(
                "INSERT INTO log_records (topic, partition_id, log_offset, record_key, payload, appended_at)
                 SELECT ?1, ?2, COALESCE(MAX(log_offset) + 1, 0), ?3, ?4, ?5
                 FROM log_records WHERE topic = ?1 AND partition_id = ?2
                 RETURNING log_offset",
                params![
                    self.topic.as_str(),
                    partition as i64,
                    key,
                    payload.to_vec(),
                    timestamp_to_i64(Utc::now())
                ],
            )
            .await?;

        let row = rows.next().await?.ok_or_else(|| anyhow!("Append returned no offset"))?;
        let offset: i64 = row.get(0)?;

        Ok(LogPosition { partition, offset: offset as Offset })
    }

    async fn claim(&self, group: &str, partition: PartitionId, member: &str, ttl: Duration) -> Result<bool> {
        let conn = self.get_conn().await?;
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl)?;

        let changed = conn
            .execute(
                "INSERT INTO partition_leases (group_id, topic, partition_id, member_id, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(group_id, topic, partition_id) DO UPDATE
                 SET member_id = excluded.member_id, expires_at = excluded.expires_at
                 WHERE partition_leases.member_id = excluded.member_id
                    OR partition_leases.expires_at < ?6",
                params![
                    group,
                    self.topic.as_str(),
                    partition as i64,
                    member,
                    timestamp_to_i64(expires_at),
                    timestamp_to_i64(now)
                ],
            )
            .await?;

        Ok(changed > 0)
    }

    async fn release(&self, group: &str, partition: PartitionId, member: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "DELETE FROM partition_leases
             WHERE group_id = ? AND topic = ? AND partition_id = ? AND member_id = ?",
            params![group, self.topic.as_str(), partition as i64, member],
        )
        .await?;
        Ok(())
    }

    async fn committed(&self, group: &str, partition: PartitionId) -> Result<Offset> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT next_offset FROM consumer_offsets WHERE group_id = ? AND topic = ? AND partition_id = ?",
                params![group, self.topic.as_str(), partition as i64],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)?.max(0) as Offset),
            None => Ok(0),
        }
    }

    async fn fetch(&self, partition: PartitionId, from: Offset, max: usize) -> Result<Vec<LogRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT log_offset, record_key, payload, appended_at FROM log_records
                 WHERE topic = ? AND partition_id = ? AND log_offset >= ?
                 ORDER BY log_offset
                 LIMIT ?",
                params![self.topic.as_str(), partition as i64, from as i64, max as i64],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(LogRecord {
                partition,
                offset: row.get::<i64>(0)? as Offset,
                key: row.get(1)?,
                payload: row.get(2)?,
                appended_at: i64_to_timestamp(row.get(3)?),
            });
        }
        Ok(records)
    }

    async fn commit(&self, group: &str, partition: PartitionId, member: &str, next_offset: Offset) -> Result<bool> {
        let conn = self.get_conn().await?;

        let changed = conn
            .execute(
                "INSERT INTO consumer_offsets (group_id, topic, partition_id, next_offset, updated_at)
                 SELECT ?1, ?2, ?3, ?4, ?6
                 WHERE EXISTS (
                     SELECT 1 FROM partition_leases
                     WHERE group_id = ?1 AND topic = ?2 AND partition_id = ?3 AND member_id = ?5
                 )
                 ON CONFLICT(group_id, topic, partition_id) DO UPDATE
                 SET next_offset = MAX(consumer_offsets.next_offset, excluded.next_offset),
                     updated_at = excluded.updated_at",
                params![
                    group,
                    self.topic.as_str(),
                    partition as i64,
                    next_offset as i64,
                    member,
                    timestamp_to_i64(Utc::now())
                ],
            )
            .await?;

        if changed == 0 {
            return Ok(false);
        }

        conn.execute(
            "DELETE FROM redeliveries WHERE group_id = ? AND topic = ? AND partition_id = ? AND log_offset < ?",
            params![group, self.topic.as_str(), partition as i64, next_offset as i64],
        )
        .await?;

        Ok(true)
    }

    async fn record_redelivery(&self, group: &str, partition: PartitionId, offset: Offset) -> Result<u32> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "INSERT INTO redeliveries (group_id, topic, partition_id, log_offset, count)
                 VALUES (?, ?, ?, ?, 1)
                 ON CONFLICT(group_id, topic, partition_id, log_offset) DO UPDATE
                 SET count = redeliveries.count + 1
                 RETURNING count",
                params![group, self.topic.as_str(), partition as i64, offset as i64],
            )
            .await?;

        let row = rows.next().await?.ok_or_else(|| anyhow!("Redelivery upsert returned no count"))?;
        Ok(row.get::<i64>(0)?.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Schema;
    use crate::testing::temp_store;

    const GROUP: &str = "notification-service";

    async fn open_log(partitions: u32) -> anyhow::Result<(tempfile::TempDir, LibsqlEventLog)> {
        let (dir, pool) = temp_store(Schema::EventLog).await?;
        Ok((dir, LibsqlEventLog::new_from_pool(pool, "notification-alerts", partitions)))
    }

    #[test]
    fn test_partition_for_is_stable_and_in_range() {
        for key in ["https://a.example/", "https://b.example/", ""] {
            let partition = partition_for(key, 3);
            assert!(partition < 3);
            assert_eq!(partition, partition_for(key, 3));
        }
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[tokio::test]
    async fn test_same_key_appends_in_order_to_one_partition() -> anyhow::Result<()> {
        let (_dir, log) = open_log(3).await?;
        let key = "https://down.example/";

        let first = log.append(key, b"one").await?;
        let second = log.append(key, b"two").await?;
        assert_eq!(first.partition, second.partition);
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);

        let records = log.fetch(first.partition, 0, 10).await?;
        let payloads: Vec<&[u8]> = records.iter().map(|record| record.payload.as_slice()).collect();
        assert_eq!(payloads, vec![b"one".as_slice(), b"two".as_slice()]);
        assert!(records.iter().all(|record| record.key == key));

        assert_eq!(log.fetch(first.partition, 1, 10).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_offsets() -> anyhow::Result<()> {
        let (_dir, log) = open_log(1).await?;
        let log = std::sync::Arc::new(log);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move { log.append("same-key", format!("{i}").as_bytes()).await })
            })
            .collect();

        let mut offsets = Vec::new();
        for handle in handles {
            offsets.push(handle.await??.offset);
        }
        offsets.sort_unstable();
        assert_eq!(offsets, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released() -> anyhow::Result<()> {
        let (_dir, log) = open_log(2).await?;
        let ttl = Duration::from_secs(60);

        assert!(log.claim(GROUP, 0, "member-a", ttl).await?);
        assert!(log.claim(GROUP, 0, "member-a", ttl).await?, "holder renews");
        assert!(!log.claim(GROUP, 0, "member-b", ttl).await?);
        assert!(log.claim(GROUP, 1, "member-b", ttl).await?);

        log.release(GROUP, 0, "member-a").await?;
        assert!(log.claim(GROUP, 0, "member-b", ttl).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() -> anyhow::Result<()> {
        let (_dir, log) = open_log(1).await?;

        assert!(log.claim(GROUP, 0, "member-a", Duration::from_millis(20)).await?);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(log.claim(GROUP, 0, "member-b", Duration::from_secs(60)).await?);
        assert!(!log.commit(GROUP, 0, "member-a", 1).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_requires_lease_and_never_moves_back() -> anyhow::Result<()> {
        let (_dir, log) = open_log(1).await?;
        assert_eq!(log.committed(GROUP, 0).await?, 0);

        assert!(!log.commit(GROUP, 0, "member-a", 3).await?);
        assert_eq!(log.committed(GROUP, 0).await?, 0);

        log.claim(GROUP, 0, "member-a", Duration::from_secs(60)).await?;
        assert!(log.commit(GROUP, 0, "member-a", 3).await?);
        assert!(log.commit(GROUP, 0, "member-a", 1).await?);
        assert_eq!(log.committed(GROUP, 0).await?, 3);
        assert_eq!(log.committed("another-group", 0).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_redelivery_counter_resets_after_commit() -> anyhow::Result<()> {
        let (_dir, log) = open_log(1).await?;
        log.claim(GROUP, 0, "member-a", Duration::from_secs(60)).await?;

        assert_eq!(log.record_redelivery(GROUP, 0, 4).await?, 1);
        assert_eq!(log.record_redelivery(GROUP, 0, 4).await?, 2);
        assert_eq!(log.record_redelivery(GROUP, 0, 5).await?, 1);

        log.commit(GROUP, 0, "member-a", 5).await?;
        assert_eq!(log.record_redelivery(GROUP, 0, 4).await?, 1);
        assert_eq!(log.record_redelivery(GROUP, 0, 5).await?, 2);
        Ok(())
    }
}
