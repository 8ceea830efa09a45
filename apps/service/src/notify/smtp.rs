use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::delivery::{Delivery, DeliveryError, Email};
use crate::config;

/// Deterministic id for an SMTP send; the relay does not hand one back
fn message_id(email: &Email) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.to.as_bytes());
    hasher.update([0]);
    hasher.update(email.subject.as_bytes());
    hasher.update([0]);
    hasher.update(email.text_body.as_bytes());
    let digest = hasher.finalize();
    format!("smtp-{}", hex::encode(&digest[..8]))
}

/// Delivery over an SMTP relay with STARTTLS
pub struct SmtpDelivery {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpDelivery {
    pub fn from_config(notifier: &config::Notifier) -> Result<Self> {
        let smtp = &notifier.smtp;

        let address: Address = notifier
            .from_email
            .parse()
            .with_context(|| format!("Invalid sender address: {}", notifier.from_email))?;
        let from = Mailbox::new(Some(notifier.from_name.clone()), address);

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .with_context(|| format!("Invalid SMTP relay: {}", smtp.host))?
            .port(smtp.port)
            .timeout(Some(Duration::from_secs(notifier.delivery_timeout_seconds)));

        if let Some(password) = &smtp.password {
            builder = builder.credentials(Credentials::new(smtp.username.clone(), password.clone()));
        }

        Ok(Self { transport: builder.build(), from })
    }
}

#[async_trait]
impl Delivery for SmtpDelivery {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &Email) -> Result<Option<String>, DeliveryError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| DeliveryError::InvalidMessage(format!("recipient {}: {e}", email.to)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(email.text_body.clone(), email.html_body.clone()))
            .map_err(|e| DeliveryError::InvalidMessage(e.to_string()))?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        debug!(to = %email.to, code = %response.code(), "SMTP relay accepted message");
        Ok(Some(message_id(email)))
    }
}
