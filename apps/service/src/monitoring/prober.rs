use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::types::ProbeOutcome;
use crate::config;

/// Idle pooled connections are dropped after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

/// One bounded-time health check of a target URL
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `target` once.
    ///
    /// Network failures are an outcome (`{-1, failed}`), not an error; only a
    /// target that cannot be turned into an http(s) URL is rejected.
    async fn probe(&self, target: &str) -> Result<ProbeOutcome, ProbeError>;
}

/// Turn user input into a probeable URL.
///
/// Input without a scheme is treated as a bare host and gets `https://`.
pub fn normalize_target(target: &str) -> Result<Url, ProbeError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(ProbeError::InvalidTarget("empty target".to_string()));
    }

    let candidate = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };

    let url = Url::parse(&candidate).map_err(|e| ProbeError::InvalidTarget(format!("{trimmed}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProbeError::InvalidTarget(format!("{trimmed}: unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProbeError::InvalidTarget(format!("{trimmed}: missing host")));
    }

    Ok(url)
}

/// Build the process-wide HTTP client.
///
/// reqwest's connect phase includes the TLS handshake, so the connect
/// timeout is the sum of both budgets.
pub fn build_http_client(config: &config::Prober) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout() + config.tls_handshake_timeout())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .user_agent(concat!("pingtower/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// HTTP GET prober
pub struct HttpProber {
    client: reqwest::Client,
    request_timeout: Duration,
    /// Connect, TLS and response-header budgets back to back, capped by the request timeout
    header_deadline: Duration,
}

impl HttpProber {
    pub fn new(client: &reqwest::Client, config: &config::Prober) -> Self {
        let phases = config.connect_timeout() + config.tls_handshake_timeout() + config.response_header_timeout();
        Self {
            client: client.clone(),
            request_timeout: config.request_timeout(),
            header_deadline: phases.min(config.request_timeout()),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &str) -> Result<ProbeOutcome, ProbeError> {
        let url = normalize_target(target)?;

        let start = Instant::now();
        let request = self.client.get(url).timeout(self.request_timeout).send();

        // `send` resolves once the status line and headers are in
        let outcome = match timeout(self.header_deadline, request).await {
            Ok(Ok(response)) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                ProbeOutcome::responded(latency_ms, response.status().as_u16())
            }
            Ok(Err(e)) => {
                debug!(target, error = %e, "Probe transport failure");
                ProbeOutcome::unreachable()
            }
            Err(_) => {
                debug!(target, timeout = ?self.header_deadline, "Probe timed out waiting for headers");
                ProbeOutcome::unreachable()
            }
        };

        Ok(outcome)
    }
}
