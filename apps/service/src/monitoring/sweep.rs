use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::prober::Prober;
use super::types::ProbeOutcome;
use crate::config;
use crate::database::models::{EndpointId, ProbeResult, SweepTarget};
use crate::database::{History, Registry};
use crate::events::{FailureEvent, Publisher};

/// Aggregate counts for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Targets read from the registry
    pub attempted: usize,
    /// Targets whose probe, history write and (if down) publish all went through
    pub succeeded: usize,
    /// Targets where some step of the pipeline errored
    pub failed: usize,
    /// Probes classified `failed`
    pub down: usize,
    pub events_published: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct TargetReport {
    completed: bool,
    down: bool,
    published: bool,
}

impl SweepReport {
    fn record(&mut self, target: TargetReport) {
        self.attempted += 1;
        if target.completed {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if target.down {
            self.down += 1;
        }
        if target.published {
            self.events_published += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub concurrency: usize,
    pub batch_size: usize,
}

impl From<&config::Scheduler> for SweepSettings {
    fn from(scheduler: &config::Scheduler) -> Self {
        Self { concurrency: scheduler.sweep_concurrency, batch_size: scheduler.batch_size }
    }
}

/// Probes every registered endpoint, records the results and publishes failures.
pub struct SweepCoordinator {
    registry: Arc<dyn Registry>,
    history: Arc<dyn History>,
    prober: Arc<dyn Prober>,
    publisher: Arc<dyn Publisher>,
    settings: SweepSettings,
    running: Mutex<()>,
}

impl SweepCoordinator {
    pub fn new(
        registry: Arc<dyn Registry>,
        history: Arc<dyn History>,
        prober: Arc<dyn Prober>,
        publisher: Arc<dyn Publisher>,
        settings: SweepSettings,
    ) -> Self {
        Self { registry, history, prober, publisher, settings, running: Mutex::new(()) }
    }

    /// Run a sweep, waiting for any sweep already in flight to finish first
    pub async fn run_sweep(&self) -> SweepReport {
        let _running = self.running.lock().await;
        self.sweep().await
    }

    /// Run a sweep unless one is already in flight
    pub async fn try_run_sweep(&self) -> Option<SweepReport> {
        let _running = self.running.try_lock().ok()?;
        Some(self.sweep().await)
    }

    async fn sweep(&self) -> SweepReport {
        let started = Instant::now();
        let batch_size = self.settings.batch_size.max(1);
        let concurrency = self.settings.concurrency.max(1);

        let mut report = SweepReport::default();
        let mut after: Option<EndpointId> = None;

        loop {
            let page = match self.registry.list_targets_page(after, batch_size).await {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, after = ?after, "Failed to read sweep targets, ending sweep early");
                    break;
                }
            };

            let page_len = page.len();
            after = page.last().map(|target| target.endpoint_id);

            let results: Vec<TargetReport> = stream::iter(page)
                .map(|target| self.check_target(target))
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for result in results {
                report.record(result);
            }

            if page_len < batch_size {
                break;
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            down = report.down,
            events_published = report.events_published,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sweep finished"
        );

        report
    }

    /// Probe, persist and (if down) publish for one target. Never fails the sweep.
    async fn check_target(&self, target: SweepTarget) -> TargetReport {
        let observed_at = Utc::now();

        let probe = match self.prober.probe(&target.url).await {
            Ok(probe) => probe,
            Err(e) => {
                warn!(url = %target.url, owner_user_id = target.owner_user_id, error = %e, "Stored target cannot be probed");
                ProbeOutcome::unreachable()
            }
        };
        let down = probe.is_failed();

        let row = ProbeResult::from_probe(&target, observed_at, &probe);
        if let Err(e) = self.history.append(&row).await {
            error!(url = %target.url, owner_user_id = target.owner_user_id, error = %e, "Failed to persist probe result");
            return TargetReport { completed: false, down, published: false };
        }

        if !down {
            return TargetReport { completed: true, down, published: false };
        }

        let email = match self.registry.get_contact(target.owner_user_id).await {
            Ok(email) => email,
            Err(e) => {
                warn!(url = %target.url, owner_user_id = target.owner_user_id, error = %e, "Cannot resolve owner contact");
                return TargetReport { completed: false, down, published: false };
            }
        };

        let event = FailureEvent {
            owner_user_id: target.owner_user_id,
            email,
            url: target.url,
            latency_ms: probe.latency_ms,
            detected_at: observed_at,
        };

        match self.publisher.publish(&event).await {
            Ok(_) => TargetReport { completed: true, down, published: true },
            Err(e) => {
                error!(url = %event.url, owner_user_id = event.owner_user_id, error = %e, "Failed to publish failure event");
                TargetReport { completed: false, down, published: false }
            }
        }
    }
}
