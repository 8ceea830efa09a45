use std::sync::Arc;

use pingtower_service::config::Config;
use pingtower_service::database::{
    HistoryQueries, LibsqlHistory, LibsqlRegistry, Registry, Schema, open_store,
};

/// Shared by every worker of the HTTP server
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn Registry>,
    pub queries: HistoryQueries,
}

impl AppState {
    /// Open the registry and history stores. The event log is not needed here.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let registry_pool = open_store(&storage.registry_path, storage.pool_size, Schema::Registry).await?;
        let history_pool = open_store(&storage.history_path, storage.pool_size, Schema::History).await?;

        let registry: Arc<dyn Registry> = Arc::new(LibsqlRegistry::new_from_pool(registry_pool));
        let history = Arc::new(LibsqlHistory::new_from_pool(history_pool));
        Ok(Self { queries: HistoryQueries::new(registry.clone(), history), registry })
    }
}
