use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use super::log::{EventLog, LogPosition};
use super::message::{FailureEvent, MessageError, NotificationMessage};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] MessageError),

    #[error("event log append failed: {0:#}")]
    Log(anyhow::Error),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Hands failure events to the durable log
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &FailureEvent) -> Result<LogPosition, PublishError>;
}

/// Publishes to an [`EventLog`], keyed by endpoint URL
pub struct LogPublisher {
    log: Arc<dyn EventLog>,
    timeout: Duration,
}

impl LogPublisher {
    pub fn new(log: Arc<dyn EventLog>, timeout: Duration) -> Self {
        Self { log, timeout }
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, event: &FailureEvent) -> Result<LogPosition, PublishError> {
        let payload = NotificationMessage::from(event).encode()?;

        let position = timeout(self.timeout, self.log.append(&event.url, &payload))
            .await
            .map_err(|_| PublishError::Timeout(self.timeout))?
            .map_err(PublishError::Log)?;

        debug!(
            topic = self.log.topic(),
            url = %event.url,
            partition = position.partition,
            offset = position.offset,
            "Published failure event"
        );

        Ok(position)
    }
}
