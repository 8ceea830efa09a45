//! Shared fixtures for unit and pipeline tests.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::database::{Schema, initialize_database};
use crate::events::{FailureEvent, LogPosition, PublishError, Publisher};
use crate::monitoring::types::ProbeOutcome;
use crate::monitoring::{ProbeError, Prober};
use crate::notify::{Delivery, DeliveryError, Email};
use crate::pool::{LibsqlPool, open_local};

/// Fresh migrated store in its own temporary directory
pub async fn temp_store(schema: Schema) -> Result<(TempDir, LibsqlPool)> {
    let dir = tempfile::tempdir()?;
    let pool = open_local(dir.path().join("store.db"), 4).await?;
    initialize_database(&pool, schema).await?;
    Ok((dir, pool))
}

/// Poll `condition` every 10ms until it holds or `limit` passes
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A local port with nothing listening on it
pub async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// Minimal HTTP/1.1 server answering every request with a fixed status after a delay
pub struct HttpStub {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl HttpStub {
    pub async fn spawn(status: u16, delay: Duration) -> Result<Self> {
        Self::spawn_with_headers(status, delay, &[]).await
    }

    pub async fn spawn_with_headers(status: u16, delay: Duration, headers: &[(&str, &str)]) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));

        let extra: String = headers.iter().map(|(name, value)| format!("{name}: {value}\r\n")).collect();
        let response = format!("HTTP/1.1 {status} Stub\r\nContent-Length: 0\r\nConnection: close\r\n{extra}\r\n");

        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let response = response.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &response, delay, &recorded).await;
                });
            }
        });

        Ok(Self { addr, requests, task })
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub async fn last_request(&self) -> Option<String> {
        self.requests.lock().ok()?.last().cloned()
    }
}

impl Drop for HttpStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, response: &str, delay: Duration, recorded: &Mutex<Vec<String>>) -> Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    if let Ok(mut requests) = recorded.lock() {
        requests.push(String::from_utf8_lossy(&buffer).to_string());
    }

    tokio::time::sleep(delay).await;
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Prober returning canned outcomes per URL
pub struct ScriptedProber {
    default: ProbeOutcome,
    overrides: HashMap<String, ProbeOutcome>,
    rejected: HashSet<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(default: ProbeOutcome) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            rejected: HashSet::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, url: &str, outcome: ProbeOutcome) -> Self {
        self.overrides.insert(url.to_string(), outcome);
        self
    }

    pub fn rejecting(mut self, url: &str) -> Self {
        self.rejected.insert(url.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, target: &str) -> Result<ProbeOutcome, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rejected.contains(target) {
            return Err(ProbeError::InvalidTarget(target.to_string()));
        }
        Ok(self.overrides.get(target).copied().unwrap_or(self.default))
    }
}

/// Publisher that keeps events in memory, or fails every publish
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<FailureEvent>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: true }
    }

    pub fn events(&self) -> Vec<FailureEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, event: &FailureEvent) -> Result<LogPosition, PublishError> {
        if self.fail {
            return Err(PublishError::Timeout(Duration::from_secs(5)));
        }
        let mut events = self.events.lock().map_err(|e| PublishError::Log(anyhow::anyhow!("{e}")))?;
        events.push(event.clone());
        Ok(LogPosition { partition: 0, offset: (events.len() - 1) as u64 })
    }
}

/// Delivery that fails its first `failures` calls, then records what it sends
pub struct ScriptedDelivery {
    failures: u32,
    hang: bool,
    invalid: bool,
    delay: Duration,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    sent: Mutex<Vec<Email>>,
}

impl ScriptedDelivery {
    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures,
            hang: false,
            invalid: false,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::failing_times(0)
    }

    pub fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    /// Every call blocks until the caller's deadline
    pub fn hanging() -> Self {
        Self { hang: true, ..Self::succeeding() }
    }

    /// Every call fails with `InvalidMessage`
    pub fn invalid_recipient() -> Self {
        Self { invalid: true, ..Self::succeeding() }
    }

    /// Each call takes `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most sends ever running at the same time
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Delivery for ScriptedDelivery {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, email: &Email) -> Result<Option<String>, DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.invalid {
            return Err(DeliveryError::InvalidMessage(format!("recipient {}: invalid", email.to)));
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call <= self.failures {
            return Err(DeliveryError::Transport(format!("scripted failure {call}")));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(Some(format!("scripted-{call}")))
    }
}
