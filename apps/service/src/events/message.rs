use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::models::UserId;
use crate::validation::is_valid_email;

/// Display format of `time` in topic messages
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// A probe came back `failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEvent {
    pub owner_user_id: UserId,
    /// Owner contact resolved at detection time
    pub email: String,
    pub url: String,
    pub latency_ms: i64,
    pub detected_at: DateTime<Utc>,
}

/// Topic message carried by the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationMessage {
    pub email: String,
    pub site: String,
    /// Opaque, human-readable detection time
    pub time: String,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("message email is not a valid address: {0}")]
    InvalidEmail(String),
}

impl From<&FailureEvent> for NotificationMessage {
    fn from(event: &FailureEvent) -> Self {
        Self {
            email: event.email.clone(),
            site: event.url.clone(),
            time: event.detected_at.format(TIME_FORMAT).to_string(),
        }
    }
}

impl NotificationMessage {
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a payload read from the log
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let message: Self = serde_json::from_slice(payload)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), MessageError> {
        for (name, value) in [("email", &self.email), ("site", &self.site), ("time", &self.time)] {
            if value.trim().is_empty() {
                return Err(MessageError::EmptyField(name));
            }
        }

        if !is_valid_email(&self.email) {
            return Err(MessageError::InvalidEmail(self.email.clone()));
        }

        Ok(())
    }
}
