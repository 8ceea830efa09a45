use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::delivery::{Delivery, DeliveryError, Email};
use crate::config;

/// Bounded linear backoff: wait `attempt × backoff_step` after each failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    /// Deadline for a single `send`
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_step: Duration::from_secs(2), attempt_timeout: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    pub fn from_config(notifier: &config::Notifier) -> Self {
        Self {
            max_attempts: notifier.max_attempts,
            backoff_step: Duration::from_secs(notifier.backoff_step_seconds),
            attempt_timeout: Duration::from_secs(notifier.delivery_timeout_seconds),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: DeliveryError },

    /// The channel refused the message itself; another attempt cannot help
    #[error("delivery rejected: {0}")]
    Rejected(DeliveryError),

    #[error("delivery cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// A successful send and how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub message_id: Option<String>,
    pub attempts: u32,
}

/// Send `email`, retrying per `policy`.
///
/// `InvalidMessage` is returned after the first attempt.
///
/// Cancellation is only observed between attempts; an attempt already in
/// flight runs to its own deadline.
pub async fn deliver_with_retry(
    delivery: &dyn Delivery,
    email: &Email,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Delivered, RetryError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = match timeout(policy.attempt_timeout, delivery.send(email)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(policy.attempt_timeout)),
        };

        let error = match result {
            Ok(message_id) => return Ok(Delivered { message_id, attempts: attempt }),
            Err(error @ DeliveryError::InvalidMessage(_)) => {
                warn!(channel = delivery.name(), to = %email.to, error = %error, "Delivery rejected, not retrying");
                return Err(RetryError::Rejected(error));
            }
            Err(error) => error,
        };

        warn!(
            channel = delivery.name(),
            to = %email.to,
            attempt,
            max_attempts,
            error = %error,
            "Delivery attempt failed"
        );

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted { attempts: attempt, last: error });
        }

        let backoff = policy.backoff(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
            _ = sleep(backoff) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDelivery;
    use std::time::Instant;

    fn email() -> Email {
        Email { to: "ops@example.com".into(), subject: "s".into(), html_body: "h".into(), text_body: "t".into() }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, backoff_step: Duration::from_millis(10), attempt_timeout: Duration::from_secs(1) }
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_fail_twice_then_succeed() {
        let delivery = ScriptedDelivery::failing_times(2);
        let started = Instant::now();

        let delivered = deliver_with_retry(&delivery, &email(), &fast_policy(), &CancellationToken::new())
            .await
            .expect("third attempt succeeds");

        assert_eq!(delivered.attempts, 3);
        assert_eq!(delivery.calls(), 3);
        // 10ms after the first failure, 20ms after the second
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_always_failing_stops_at_max_attempts() {
        let delivery = ScriptedDelivery::always_failing();

        let error = deliver_with_retry(&delivery, &email(), &fast_policy(), &CancellationToken::new())
            .await
            .expect_err("never succeeds");

        assert_eq!(delivery.calls(), 3);
        assert!(matches!(error, RetryError::Exhausted { attempts: 3, .. }));
        let rendered = error.to_string();
        assert!(rendered.starts_with("delivery failed after 3 attempts: "), "{rendered}");
        assert!(rendered.contains("scripted failure 3"), "{rendered}");
    }

    #[tokio::test]
    async fn test_invalid_message_is_not_retried() {
        let delivery = ScriptedDelivery::invalid_recipient();

        let error = deliver_with_retry(&delivery, &email(), &fast_policy(), &CancellationToken::new())
            .await
            .expect_err("rejected");

        assert_eq!(delivery.calls(), 1);
        assert!(matches!(error, RetryError::Rejected(DeliveryError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_aborts() {
        let delivery = ScriptedDelivery::always_failing();
        let policy = RetryPolicy { backoff_step: Duration::from_secs(60), ..fast_policy() };
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let error = deliver_with_retry(&delivery, &email(), &policy, &cancel).await.expect_err("cancelled");

        assert!(matches!(error, RetryError::Cancelled { attempts: 1 }));
        assert_eq!(delivery.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_slow_attempt_counts_as_timeout() {
        let delivery = ScriptedDelivery::hanging();
        let policy = RetryPolicy { max_attempts: 2, attempt_timeout: Duration::from_millis(20), ..fast_policy() };

        let error = deliver_with_retry(&delivery, &email(), &policy, &CancellationToken::new())
            .await
            .expect_err("times out");

        assert!(matches!(error, RetryError::Exhausted { attempts: 2, last: DeliveryError::Timeout(_) }));
    }
}
