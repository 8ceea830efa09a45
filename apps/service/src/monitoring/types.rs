use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Classification of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ok" => Ok(Outcome::Ok),
            "failed" => Ok(Outcome::Failed),
            other => Err(anyhow::anyhow!("Unknown probe outcome: {other}")),
        }
    }
}

/// Latency reported when the probe never got a response.
pub const UNREACHABLE_LATENCY_MS: i64 = -1;

/// What one probe observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Milliseconds until response headers arrived, or -1 if none did
    pub latency_ms: i64,

    pub outcome: Outcome,

    /// HTTP status code, when a response was received
    pub status_code: Option<u16>,
}

impl ProbeOutcome {
    /// DNS, connect, TLS or timeout failure
    pub fn unreachable() -> Self {
        Self { latency_ms: UNREACHABLE_LATENCY_MS, outcome: Outcome::Failed, status_code: None }
    }

    /// A response arrived; statuses from 400 up count as failures
    pub fn responded(latency_ms: u64, status_code: u16) -> Self {
        let outcome = if status_code >= 400 { Outcome::Failed } else { Outcome::Ok };
        Self {
            latency_ms: i64::try_from(latency_ms).unwrap_or(i64::MAX),
            outcome,
            status_code: Some(status_code),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}
