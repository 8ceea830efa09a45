use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::delivery::{Delivery, DeliveryError, Email};
use crate::config;

#[derive(Serialize)]
struct Party<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: Party<'a>,
    to: [Party<'a>; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

/// Delivery through a MailerSend-style HTTP email API
pub struct ApiDelivery {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_email: String,
    from_name: String,
    timeout: Duration,
}

impl ApiDelivery {
    pub fn from_config(client: &reqwest::Client, notifier: &config::Notifier) -> Result<Self> {
        let api_key = notifier
            .api
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("notifier.api.api_key (or MAILERSEND_API_KEY) is required for the api channel"))?;

        Ok(Self {
            client: client.clone(),
            endpoint: notifier.api.endpoint.clone(),
            api_key,
            from_email: notifier.from_email.clone(),
            from_name: notifier.from_name.clone(),
            timeout: Duration::from_secs(notifier.delivery_timeout_seconds),
        })
    }
}

#[async_trait]
impl Delivery for ApiDelivery {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn send(&self, email: &Email) -> Result<Option<String>, DeliveryError> {
        let body = SendRequest {
            from: Party { email: &self.from_email, name: Some(&self.from_name) },
            to: [Party { email: &email.to, name: None }],
            subject: &email.subject,
            html: &email.html_body,
            text: &email.text_body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected { status: status.as_u16(), body });
        }

        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        debug!(to = %email.to, status = status.as_u16(), ?message_id, "Email API accepted message");
        Ok(message_id)
    }
}
