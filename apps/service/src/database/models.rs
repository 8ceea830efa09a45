use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{Outcome, ProbeOutcome};

pub type UserId = i64;
pub type EndpointId = i64;

/// Account that owns monitored endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Monitored endpoint - unique per (owner, url)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub owner_user_id: UserId,
    pub url: String,
    pub check_interval: u64,
    pub created_at: DateTime<Utc>,
}

/// A user together with every endpoint they registered (possibly none)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEndpoints {
    pub user_id: UserId,
    pub endpoints: Vec<Endpoint>,
}

/// One (user, endpoint) pair the sweep has to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepTarget {
    pub endpoint_id: EndpointId,
    pub owner_user_id: UserId,
    pub url: String,
}

impl From<&Endpoint> for SweepTarget {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            endpoint_id: endpoint.id,
            owner_user_id: endpoint.owner_user_id,
            url: endpoint.url.clone(),
        }
    }
}

/// One row of the probe history time-series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: Option<i64>,
    /// Resolved from the registry on read; `None` once the URL is no longer registered
    pub endpoint_id: Option<EndpointId>,
    pub owner_user_id: UserId,
    pub url: String,
    pub observed_at: DateTime<Utc>,
    pub latency_ms: i64,
    pub outcome: Outcome,
}

impl ProbeResult {
    /// Create a new history row from a probe observation
    pub fn from_probe(target: &SweepTarget, observed_at: DateTime<Utc>, probe: &ProbeOutcome) -> Self {
        Self {
            id: None,
            endpoint_id: Some(target.endpoint_id),
            owner_user_id: target.owner_user_id,
            url: target.url.clone(),
            observed_at,
            latency_ms: probe.latency_ms,
            outcome: probe.outcome,
        }
    }
}

/// Convert a timestamp to Unix milliseconds
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert Unix milliseconds to a timestamp
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
