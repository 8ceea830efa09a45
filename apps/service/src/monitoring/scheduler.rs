use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::sweep::{SweepCoordinator, SweepReport};

/// Triggers one sweep per fixed interval until shutdown
pub struct SweepScheduler {
    coordinator: Arc<SweepCoordinator>,
    interval: Duration,
    drain_timeout: Duration,
}

impl SweepScheduler {
    pub fn new(coordinator: Arc<SweepCoordinator>, interval: Duration, drain_timeout: Duration) -> Self {
        Self { coordinator, interval, drain_timeout }
    }

    /// Tick on wall-clock cadence; the first sweep starts immediately.
    ///
    /// Ticks that land while a sweep is still running are skipped. On shutdown
    /// the in-flight sweep gets `drain_timeout` to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<Option<SweepReport>>> = None;
        info!(interval = ?self.interval, "Sweep scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Some(handle) = in_flight.take() {
                if !handle.is_finished() {
                    warn!("Previous sweep still running, skipping this tick");
                    in_flight = Some(handle);
                    continue;
                }
                log_outcome(handle.await);
            }

            let coordinator = Arc::clone(&self.coordinator);
            in_flight = Some(tokio::spawn(async move { coordinator.try_run_sweep().await }));
        }

        info!("Sweep scheduler stopping");
        if let Some(handle) = in_flight {
            match timeout(self.drain_timeout, handle).await {
                Ok(outcome) => log_outcome(outcome),
                Err(_) => warn!(drain_timeout = ?self.drain_timeout, "In-flight sweep did not finish before drain timeout"),
            }
        }
    }
}

fn log_outcome(outcome: Result<Option<SweepReport>, JoinError>) {
    match outcome {
        Ok(Some(report)) => debug!(?report, "Scheduled sweep completed"),
        Ok(None) => warn!("Sweep trigger skipped, another sweep was already running"),
        Err(e) => error!(error = %e, "Sweep task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{LibsqlHistory, LibsqlRegistry, Registry, Schema};
    use crate::monitoring::sweep::SweepSettings;
    use crate::monitoring::types::ProbeOutcome;
    use crate::testing::{RecordingPublisher, ScriptedProber, temp_store};

    async fn scheduled(
        prober: Arc<ScriptedProber>,
    ) -> anyhow::Result<(Vec<tempfile::TempDir>, Arc<SweepCoordinator>)> {
        let (registry_dir, registry_pool) = temp_store(Schema::Registry).await?;
        let (history_dir, history_pool) = temp_store(Schema::History).await?;
        let registry = Arc::new(LibsqlRegistry::new_from_pool(registry_pool));
        let user = registry.create_user("ops@example.com").await?;
        registry.add_endpoint(user.id, "https://site.example/", 60).await?;

        let coordinator = Arc::new(SweepCoordinator::new(
            registry,
            Arc::new(LibsqlHistory::new_from_pool(history_pool)),
            prober,
            Arc::new(RecordingPublisher::default()),
            SweepSettings { concurrency: 2, batch_size: 10 },
        ));
        Ok((vec![registry_dir, history_dir], coordinator))
    }

    #[tokio::test]
    async fn test_ticks_during_a_slow_sweep_are_skipped() -> anyhow::Result<()> {
        let prober = Arc::new(ScriptedProber::new(ProbeOutcome::responded(1, 200)).with_delay(Duration::from_millis(300)));
        let (_dirs, coordinator) = scheduled(prober.clone()).await?;
        let scheduler = SweepScheduler::new(coordinator, Duration::from_millis(20), Duration::from_secs(5));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        scheduler.run(shutdown).await;

        // Several ticks fired, one sweep ran, and shutdown waited for it
        assert_eq!(prober.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_fast_sweeps_run_every_tick() -> anyhow::Result<()> {
        let prober = Arc::new(ScriptedProber::new(ProbeOutcome::responded(1, 200)));
        let (_dirs, coordinator) = scheduled(prober.clone()).await?;
        let scheduler = SweepScheduler::new(coordinator, Duration::from_millis(30), Duration::from_secs(5));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        scheduler.run(shutdown).await;
        assert!(prober.calls() >= 3, "only {} sweeps ran", prober.calls());
        Ok(())
    }
}
