//! Input validation shared by registration and notification intake.

use anyhow::{Result, anyhow};
use lettre::Address;
use std::time::Duration;

/// Accepted range for an endpoint's check interval, in seconds.
pub const MIN_CHECK_INTERVAL: u64 = 10;
pub const MAX_CHECK_INTERVAL: u64 = 86_400;
pub const DEFAULT_CHECK_INTERVAL: u64 = 60;

/// Validate check interval for a registered endpoint
pub fn validate_check_interval(interval_seconds: u64) -> Result<()> {
    if interval_seconds < MIN_CHECK_INTERVAL {
        return Err(anyhow!(
            "Check interval too short: {} seconds (minimum: {})",
            interval_seconds,
            MIN_CHECK_INTERVAL
        ));
    }

    if interval_seconds > MAX_CHECK_INTERVAL {
        return Err(anyhow!(
            "Check interval too long: {} seconds (maximum: {})",
            interval_seconds,
            MAX_CHECK_INTERVAL
        ));
    }

    Ok(())
}

/// Validate timeout is reasonable
pub fn validate_timeout(timeout: Duration) -> Result<()> {
    const MIN_TIMEOUT: Duration = Duration::from_millis(1);
    const MAX_TIMEOUT: Duration = Duration::from_secs(300);

    if timeout < MIN_TIMEOUT {
        return Err(anyhow!("Timeout too short: {:?} (minimum: {:?})", timeout, MIN_TIMEOUT));
    }

    if timeout > MAX_TIMEOUT {
        return Err(anyhow!("Timeout too long: {:?} (maximum: {:?})", timeout, MAX_TIMEOUT));
    }

    Ok(())
}

/// Mailbox address lettre can send to, with a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Ok(address) = email.trim().parse::<Address>() else {
        return false;
    };

    match address.domain().rsplit_once('.') {
        Some((name, tld)) => !name.is_empty() && !tld.is_empty(),
        None => false,
    }
}
