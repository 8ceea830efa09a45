use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// A rendered notification ready to hand to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Outcome of one delivery, as logged and reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn sent(message_id: Option<String>) -> Self {
        Self { status: DeliveryStatus::Sent, message_id, error: None }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self { status: DeliveryStatus::Failed, message_id: None, error: Some(error.to_string()) }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by provider ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound notification channel.
///
/// One call is one attempt. Callers own retries, so implementations must
/// tolerate being invoked repeatedly for the same logical event.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the provider's message id, if it hands one back
    async fn send(&self, email: &Email) -> Result<Option<String>, DeliveryError>;
}
