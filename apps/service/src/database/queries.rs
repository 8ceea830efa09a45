use std::collections::HashMap;
use std::sync::Arc;

use super::models::{EndpointId, ProbeResult, UserId};
use super::{History, Registry, StoreError};

/// Read paths that need both stores.
///
/// The registry and the history are never joined in SQL: the endpoint list is
/// read first, then the history is read and matched back by URL.
#[derive(Clone)]
pub struct HistoryQueries {
    registry: Arc<dyn Registry>,
    history: Arc<dyn History>,
}

impl HistoryQueries {
    pub fn new(registry: Arc<dyn Registry>, history: Arc<dyn History>) -> Self {
        Self { registry, history }
    }

    /// Latest observation per URL the owner has ever been probed for.
    ///
    /// Rows whose URL is no longer registered come back with `endpoint_id: None`.
    pub async fn latest_per_endpoint(&self, owner: UserId) -> Result<Vec<ProbeResult>, StoreError> {
        let endpoints = self.registry.list_endpoints(owner).await?;
        let ids: HashMap<String, EndpointId> =
            endpoints.into_iter().map(|endpoint| (endpoint.url, endpoint.id)).collect();

        let mut latest = self.history.latest_per_url(owner).await?;
        for row in &mut latest {
            row.endpoint_id = ids.get(&row.url).copied();
        }
        Ok(latest)
    }

    /// History of one of the owner's endpoints, newest first.
    pub async fn history(
        &self,
        owner: UserId,
        endpoint_id: EndpointId,
        limit: Option<usize>,
    ) -> Result<Vec<ProbeResult>, StoreError> {
        let endpoint = self
            .registry
            .get_endpoint(owner, endpoint_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        let mut rows = self.history.history_for_url(owner, &endpoint.url, limit).await?;
        for row in &mut rows {
            row.endpoint_id = Some(endpoint.id);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::SweepTarget;
    use crate::database::{LibsqlHistory, LibsqlRegistry, Schema};
    use crate::monitoring::types::ProbeOutcome;
    use crate::testing::temp_store;
    use chrono::Utc;

    #[tokio::test]
    async fn test_reads_resolve_endpoint_ids_through_registry() -> anyhow::Result<()> {
        let (_registry_dir, registry_pool) = temp_store(Schema::Registry).await?;
        let (_history_dir, history_pool) = temp_store(Schema::History).await?;
        let registry = Arc::new(LibsqlRegistry::new_from_pool(registry_pool));
        let history = Arc::new(LibsqlHistory::new_from_pool(history_pool));

        let user = registry.create_user("ops@example.com").await?;
        let endpoint = registry.add_endpoint(user.id, "https://up.example/", 60).await?;
        let stranger = registry.create_user("other@example.com").await?;

        let registered = SweepTarget::from(&endpoint);
        let orphan = SweepTarget { endpoint_id: 999, owner_user_id: user.id, url: "https://gone.example/".into() };
        history.append(&ProbeResult::from_probe(&registered, Utc::now(), &ProbeOutcome::responded(12, 200))).await?;
        history.append(&ProbeResult::from_probe(&orphan, Utc::now(), &ProbeOutcome::unreachable())).await?;

        let queries = HistoryQueries::new(registry, history);

        let latest = queries.latest_per_endpoint(user.id).await?;
        assert_eq!(latest.len(), 2);
        let up = latest.iter().find(|row| row.url == "https://up.example/").expect("registered row");
        assert_eq!(up.endpoint_id, Some(endpoint.id));
        let gone = latest.iter().find(|row| row.url == "https://gone.example/").expect("orphan row");
        assert_eq!(gone.endpoint_id, None);

        let rows = queries.history(user.id, endpoint.id, None).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].endpoint_id, Some(endpoint.id));

        assert!(matches!(queries.history(stranger.id, endpoint.id, None).await, Err(StoreError::NotFound)));
        Ok(())
    }
}
