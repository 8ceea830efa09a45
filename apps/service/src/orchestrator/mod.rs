/// Orchestrator module - wires the pipeline together and owns its lifecycle
///
/// Startup order:
/// - open and migrate the registry, history and event log stores (fatal on failure)
/// - start the notification consumer
/// - start history retention
/// - start the sweep scheduler
///
/// Shutdown runs the other way round: sweep triggers stop and the active sweep
/// drains, then consumer intake stops and in-flight deliveries finish.
pub mod retention;


pub use retention::{RetentionCleanup, RetentionPolicy};

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{History, LibsqlHistory, LibsqlRegistry, Registry, Schema, open_store};
use crate::events::{EventLog, LibsqlEventLog, LogPublisher};
use crate::monitoring::{HttpProber, SweepCoordinator, SweepReport, SweepScheduler, SweepSettings, build_http_client};
use crate::notify::{ConsumerSettings, Delivery, NotificationConsumer, RetryPolicy, build_delivery};

/// Which halves of the pipeline this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Scheduler, sweeps and history retention
    Monitor,
    /// Notification consumer
    Notify,
    All,
}

impl Role {
    pub fn monitors(self) -> bool {
        matches!(self, Role::Monitor | Role::All)
    }

    pub fn notifies(self) -> bool {
        matches!(self, Role::Notify | Role::All)
    }
}

/// Main orchestrator for the PingTower service
pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<dyn Registry>,
    history: Arc<dyn History>,
    event_log: Arc<dyn EventLog>,
    /// Shared by every outbound HTTP caller
    client: reqwest::Client,
}

impl Orchestrator {
    /// Open the stores, run until Ctrl-C/SIGTERM, then drain
    pub async fn start(config: Config, role: Role) -> Result<()> {
        let orchestrator = Self::new(config).await?;
        orchestrator.run(role, shutdown_signal()).await
    }

    /// Open and migrate every store. Any failure here is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        let storage = &config.storage;

        info!("Initializing stores...");
        let registry_pool = open_store(&storage.registry_path, storage.pool_size, Schema::Registry).await?;
        let history_pool = open_store(&storage.history_path, storage.pool_size, Schema::History).await?;
        let event_pool = open_store(&storage.event_log_path, storage.pool_size, Schema::EventLog).await?;

        let client = build_http_client(&config.prober).context("Failed to build HTTP client")?;

        let event_log = LibsqlEventLog::new_from_pool(event_pool, config.events.topic.clone(), config.events.partitions);

        Ok(Self::from_parts(
            config,
            Arc::new(LibsqlRegistry::new_from_pool(registry_pool)),
            Arc::new(LibsqlHistory::new_from_pool(history_pool)),
            Arc::new(event_log),
            client,
        ))
    }

    pub fn from_parts(
        config: Config,
        registry: Arc<dyn Registry>,
        history: Arc<dyn History>,
        event_log: Arc<dyn EventLog>,
        client: reqwest::Client,
    ) -> Self {
        Self { config: Arc::new(config), registry, history, event_log, client }
    }

    pub fn coordinator(&self) -> Arc<SweepCoordinator> {
        let prober = HttpProber::new(&self.client, &self.config.prober);
        let publisher = LogPublisher::new(
            self.event_log.clone(),
            Duration::from_millis(self.config.events.publish_timeout_ms),
        );

        Arc::new(SweepCoordinator::new(
            self.registry.clone(),
            self.history.clone(),
            Arc::new(prober),
            Arc::new(publisher),
            SweepSettings::from(&self.config.scheduler),
        ))
    }

    pub fn consumer(&self, delivery: Arc<dyn Delivery>) -> Arc<NotificationConsumer> {
        Arc::new(NotificationConsumer::new(
            self.event_log.clone(),
            delivery,
            RetryPolicy::from_config(&self.config.notifier),
            ConsumerSettings::from_config(&self.config.notifier),
        ))
    }

    /// One sweep, outside the scheduler
    pub async fn sweep_once(&self) -> SweepReport {
        self.coordinator().run_sweep().await
    }

    /// Run `role` until `stop` resolves, using the configured delivery channel
    pub async fn run(&self, role: Role, stop: impl Future<Output = ()>) -> Result<()> {
        let delivery = if role.notifies() {
            Some(build_delivery(&self.client, &self.config.notifier)?)
        } else {
            None
        };
        self.run_with(role, delivery, stop).await
    }

    pub async fn run_with(
        &self,
        role: Role,
        delivery: Option<Arc<dyn Delivery>>,
        stop: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(?role, "Starting PingTower orchestrator...");

        let monitor_shutdown = CancellationToken::new();
        let consumer_shutdown = CancellationToken::new();

        let mut consumer_workers: Vec<JoinHandle<()>> = Vec::new();
        if role.notifies() {
            let delivery = delivery.context("Notify role needs a delivery channel")?;
            consumer_workers = self.consumer(delivery).start(consumer_shutdown.clone());
        }

        let mut monitor_tasks: Vec<JoinHandle<()>> = Vec::new();
        if role.monitors() {
            let policy = RetentionPolicy::from(&self.config.retention);
            info!("Retention policy: history={}d", policy.history_days);
            let cleanup = RetentionCleanup::new(self.history.clone(), policy);
            monitor_tasks.push(cleanup.start_periodic_cleanup(monitor_shutdown.clone()));

            let scheduler = SweepScheduler::new(
                self.coordinator(),
                Duration::from_secs(self.config.scheduler.interval_seconds),
                Duration::from_secs(self.config.scheduler.drain_timeout_seconds),
            );
            let token = monitor_shutdown.clone();
            monitor_tasks.push(tokio::spawn(async move { scheduler.run(token).await }));
        }

        info!("Orchestrator started successfully");
        stop.await;
        info!("Shutdown requested, draining...");

        monitor_shutdown.cancel();
        for task in monitor_tasks {
            if let Err(e) = task.await {
                error!("Monitor task failed during shutdown: {}", e);
            }
        }

        consumer_shutdown.cancel();
        for worker in consumer_workers {
            if let Err(e) = worker.await {
                error!("Consumer worker failed during shutdown: {}", e);
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    result = tokio::signal::ctrl_c() => log_ctrl_c(result),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    log_ctrl_c(tokio::signal::ctrl_c().await);
}

fn log_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {}", e),
    }
}
