use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::delivery::{Delivery, DeliveryReport};
use super::retry::{RetryError, RetryPolicy, deliver_with_retry};
use super::templates::render_down_alert;
use crate::config;
use crate::events::log::{EventLog, LogRecord, Offset, PartitionId};
use crate::events::{MessageError, NotificationMessage};

/// Shortest lease renewal period while a delivery is in flight
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Consumer-group membership and pacing
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group: String,
    pub member_id: String,
    pub fetch_batch: usize,
    pub poll_interval: Duration,
    pub broker_backoff: Duration,
    pub lease_ttl: Duration,
    pub redelivery_backoff: Duration,
    pub max_redeliveries: u32,
}

impl ConsumerSettings {
    pub fn from_config(notifier: &config::Notifier) -> Self {
        Self {
            group: notifier.consumer_group.clone(),
            member_id: format!("{}-{}", notifier.consumer_group, Uuid::new_v4()),
            fetch_batch: notifier.fetch_batch,
            poll_interval: Duration::from_millis(notifier.poll_interval_ms),
            broker_backoff: Duration::from_secs(notifier.broker_backoff_seconds),
            lease_ttl: Duration::from_secs(notifier.lease_ttl_seconds),
            redelivery_backoff: Duration::from_secs(notifier.redelivery_backoff_seconds),
            max_redeliveries: notifier.max_redeliveries,
        }
    }
}

/// What happened to one record
#[derive(Debug)]
pub enum Handled {
    /// Delivered; the offset may be committed
    Acked(DeliveryReport),
    /// Payload failed validation
    Rejected(MessageError),
    /// Every delivery attempt failed
    Abandoned(DeliveryReport),
    /// Shutdown arrived while backing off between attempts
    Interrupted,
}

/// What a partition worker should do next
enum Step {
    Continue,
    Idle,
    NotOwner,
    Redeliver,
}

/// Turns failure events from the log into delivered notifications.
///
/// One worker per partition; records within a partition are handled strictly
/// in order and the offset only moves after a record is acked or skipped.
pub struct NotificationConsumer {
    log: Arc<dyn EventLog>,
    delivery: Arc<dyn Delivery>,
    policy: RetryPolicy,
    settings: ConsumerSettings,
}

impl NotificationConsumer {
    pub fn new(
        log: Arc<dyn EventLog>,
        delivery: Arc<dyn Delivery>,
        policy: RetryPolicy,
        settings: ConsumerSettings,
    ) -> Self {
        Self { log, delivery, policy, settings }
    }

    /// Spawn one worker per partition. Workers exit once `shutdown` fires and
    /// their in-flight record is finished.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            topic = self.log.topic(),
            group = %self.settings.group,
            member = %self.settings.member_id,
            channel = self.delivery.name(),
            partitions = self.log.partition_count(),
            "Starting notification consumer"
        );

        (0..self.log.partition_count())
            .map(|partition| {
                let consumer = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { consumer.run_partition(partition, shutdown).await })
            })
            .collect()
    }

    async fn run_partition(&self, partition: PartitionId, shutdown: CancellationToken) {
        let mut position: Option<Offset> = None;

        while !shutdown.is_cancelled() {
            let wait = match self.poll_partition(partition, &mut position, &shutdown).await {
                Ok(Step::Continue) => continue,
                Ok(Step::Idle) | Ok(Step::NotOwner) => self.settings.poll_interval,
                Ok(Step::Redeliver) => self.settings.redelivery_backoff,
                Err(e) => {
                    error!(partition, error = %e, "Event log error, backing off");
                    position = None;
                    self.settings.broker_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        if let Err(e) = self.log.release(&self.settings.group, partition, &self.settings.member_id).await {
            warn!(partition, error = %e, "Failed to release partition lease");
        }
        debug!(partition, "Partition worker stopped");
    }

    /// Claim the partition, fetch a batch from `position` and work through it
    async fn poll_partition(
        &self,
        partition: PartitionId,
        position: &mut Option<Offset>,
        shutdown: &CancellationToken,
    ) -> Result<Step> {
        let settings = &self.settings;

        if !self.log.claim(&settings.group, partition, &settings.member_id, settings.lease_ttl).await? {
            *position = None;
            return Ok(Step::NotOwner);
        }

        let from = match *position {
            Some(offset) => offset,
            None => self.log.committed(&settings.group, partition).await?,
        };

        let records = self.log.fetch(partition, from, settings.fetch_batch).await?;
        if records.is_empty() {
            *position = Some(from);
            return Ok(Step::Idle);
        }

        for record in records {
            if shutdown.is_cancelled() {
                return Ok(Step::Continue);
            }

            // Renewed again by the heartbeat while the record is being delivered
            if !self.log.claim(&settings.group, partition, &settings.member_id, settings.lease_ttl).await? {
                *position = None;
                return Ok(Step::NotOwner);
            }

            match self.handle_leased(&record, shutdown).await {
                Handled::Acked(report) => {
                    debug!(
                        partition,
                        offset = record.offset,
                        status = ?report.status,
                        message_id = report.message_id.as_deref().unwrap_or("-"),
                        "Committing delivered message"
                    );
                    if !self.commit_past(&record).await? {
                        *position = None;
                        return Ok(Step::NotOwner);
                    }
                    *position = Some(record.offset + 1);
                }
                Handled::Rejected(_) | Handled::Abandoned(_) => {
                    let count = self.log.record_redelivery(&settings.group, partition, record.offset).await?;

                    if count >= settings.max_redeliveries {
                        error!(
                            partition,
                            offset = record.offset,
                            key = %record.key,
                            redeliveries = count,
                            "Skipping message after repeated failures"
                        );
                        if !self.commit_past(&record).await? {
                            *position = None;
                            return Ok(Step::NotOwner);
                        }
                        *position = Some(record.offset + 1);
                        continue;
                    }

                    *position = None;
                    return Ok(Step::Redeliver);
                }
                Handled::Interrupted => return Ok(Step::Continue),
            }
        }

        Ok(Step::Continue)
    }

    /// `handle` while renewing the partition lease every third of its TTL
    async fn handle_leased(&self, record: &LogRecord, shutdown: &CancellationToken) -> Handled {
        let settings = &self.settings;
        let period = (settings.lease_ttl / 3).max(MIN_HEARTBEAT);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handling = self.handle(record, shutdown);
        tokio::pin!(handling);

        loop {
            tokio::select! {
                handled = &mut handling => return handled,
                _ = heartbeat.tick() => {
                    match self.log.claim(&settings.group, record.partition, &settings.member_id, settings.lease_ttl).await {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            partition = record.partition,
                            offset = record.offset,
                            "Partition lease taken over during delivery"
                        ),
                        Err(e) => warn!(partition = record.partition, error = %e, "Failed to renew partition lease"),
                    }
                }
            }
        }
    }

    async fn commit_past(&self, record: &LogRecord) -> Result<bool> {
        let committed = self
            .log
            .commit(&self.settings.group, record.partition, &self.settings.member_id, record.offset + 1)
            .await?;

        if !committed {
            warn!(
                partition = record.partition,
                offset = record.offset,
                "Lost partition lease before commit, message will be redelivered"
            );
        }
        Ok(committed)
    }

    /// Validate, render and deliver one record. Never touches offsets.
    pub async fn handle(&self, record: &LogRecord, cancel: &CancellationToken) -> Handled {
        let message = match NotificationMessage::decode(&record.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(partition = record.partition, offset = record.offset, error = %e, "Rejecting notification message");
                return Handled::Rejected(e);
            }
        };

        info!(
            partition = record.partition,
            offset = record.offset,
            email = %message.email,
            site = %message.site,
            time = %message.time,
            "Processing notification"
        );

        let email = render_down_alert(&message);
        match deliver_with_retry(self.delivery.as_ref(), &email, &self.policy, cancel).await {
            Ok(delivered) => {
                info!(
                    to = %email.to,
                    attempts = delivered.attempts,
                    message_id = delivered.message_id.as_deref().unwrap_or("-"),
                    "Notification delivered"
                );
                Handled::Acked(DeliveryReport::sent(delivered.message_id))
            }
            Err(RetryError::Cancelled { attempts }) => {
                info!(to = %email.to, attempts, "Delivery interrupted by shutdown");
                Handled::Interrupted
            }
            Err(e) => {
                error!(to = %email.to, site = %message.site, error = %e, "Notification abandoned");
                Handled::Abandoned(DeliveryReport::failed(e))
            }
        }
    }
}
