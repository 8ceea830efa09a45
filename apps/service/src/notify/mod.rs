/// Notification side of the pipeline: consume failure events, render the
/// alert and deliver it through the configured channel.
pub mod api;
pub mod consumer;
pub mod delivery;
pub mod retry;
pub mod smtp;
pub mod templates;

use std::sync::Arc;

use anyhow::Result;

pub use consumer::{ConsumerSettings, Handled, NotificationConsumer};
pub use delivery::{Delivery, DeliveryError, DeliveryReport, DeliveryStatus, Email};
pub use retry::{Delivered, RetryError, RetryPolicy, deliver_with_retry};

use crate::config::{self, Channel};

/// Pick the delivery channel named in the config
pub fn build_delivery(client: &reqwest::Client, notifier: &config::Notifier) -> Result<Arc<dyn Delivery>> {
    let delivery: Arc<dyn Delivery> = match notifier.channel {
        Channel::Smtp => Arc::new(smtp::SmtpDelivery::from_config(notifier)?),
        Channel::Api => Arc::new(api::ApiDelivery::from_config(client, notifier)?),
    };
    Ok(delivery)
}
