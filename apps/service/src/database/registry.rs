use async_trait::async_trait;
use chrono::Utc;
use libsql::{Row, params};

use super::StoreError;
use super::models::{Endpoint, EndpointId, SweepTarget, User, UserEndpoints, UserId, i64_to_timestamp, timestamp_to_i64};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Users and the endpoints they asked us to watch
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create a user; `Conflict` if the email is already registered
    async fn create_user(&self, email: &str) -> Result<User, StoreError>;

    /// Contact address used for failure notifications
    async fn get_contact(&self, user_id: UserId) -> Result<String, StoreError>;

    /// Register an endpoint; registering the same (owner, url) again returns the existing row
    async fn add_endpoint(&self, owner: UserId, url: &str, check_interval: u64) -> Result<Endpoint, StoreError>;

    /// Get an endpoint only if it belongs to `owner`
    async fn get_endpoint(&self, owner: UserId, endpoint_id: EndpointId) -> Result<Option<Endpoint>, StoreError>;

    async fn list_endpoints(&self, owner: UserId) -> Result<Vec<Endpoint>, StoreError>;

    /// Every user with their endpoints; users without endpoints get an empty list
    async fn list_all(&self) -> Result<Vec<UserEndpoints>, StoreError>;

    /// Keyset page of sweep targets with `endpoint_id > after`, ascending
    async fn list_targets_page(&self, after: Option<EndpointId>, limit: usize) -> Result<Vec<SweepTarget>, StoreError>;
}

/// LibSQL registry implementation
pub struct LibsqlRegistry {
    pool: LibsqlPool,
}

impl LibsqlRegistry {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>, StoreError> {
        Ok(self.pool.get().await?)
    }
}

const ENDPOINT_COLUMNS: &str = "id, owner_user_id, url, check_interval, created_at";

fn endpoint_from_row(row: &Row) -> Result<Endpoint, StoreError> {
    Ok(Endpoint {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        url: row.get(2)?,
        check_interval: row.get::<i64>(3)?.max(0) as u64,
        created_at: i64_to_timestamp(row.get(4)?),
    })
}

#[async_trait]
impl Registry for LibsqlRegistry {
    async fn create_user(&self, email: &str) -> Result<User, StoreError> {
        let conn = self.get_conn().await?;
        let now = Utc::now();

        let mut rows = conn
            .query(
                "INSERT INTO users (email, created_at) VALUES (?, ?) ON CONFLICT(email) DO NOTHING RETURNING id",
                params![email.trim(), timestamp_to_i64(now)],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(User { id: row.get(0)?, email: email.trim().to_string(), created_at: now }),
            None => Err(StoreError::Conflict),
        }
    }

    async fn get_contact(&self, user_id: UserId) -> Result<String, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query("SELECT email FROM users WHERE id = ?", params![user_id]).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(StoreError::NotFound),
        }
    }

    async fn add_endpoint(&self, owner: UserId, url: &str, check_interval: u64) -> Result<Endpoint, StoreError> {
        let conn = self.get_conn().await?;

        let mut owner_rows = conn.query("SELECT 1 FROM users WHERE id = ?", params![owner]).await?;
        if owner_rows.next().await?.is_none() {
            return Err(StoreError::NotFound);
        }

        conn.execute(
            "INSERT INTO endpoints (owner_user_id, url, check_interval, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(owner_user_id, url) DO NOTHING",
            params![owner, url, check_interval as i64, timestamp_to_i64(Utc::now())],
        )
        .await?;

        let mut rows = conn
            .query(
                &format!("SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE owner_user_id = ? AND url = ?"),
                params![owner, url],
            )
            .await?;

        match rows.next().await? {
            Some(row) => endpoint_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn get_endpoint(&self, owner: UserId, endpoint_id: EndpointId) -> Result<Option<Endpoint>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE id = ? AND owner_user_id = ?"),
                params![endpoint_id, owner],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(endpoint_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_endpoints(&self, owner: UserId) -> Result<Vec<Endpoint>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE owner_user_id = ? ORDER BY id"),
                params![owner],
            )
            .await?;

        let mut endpoints = Vec::new();
        while let Some(row) = rows.next().await? {
            endpoints.push(endpoint_from_row(&row)?);
        }
        Ok(endpoints)
    }

    async fn list_all(&self) -> Result<Vec<UserEndpoints>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT u.id, e.id, e.owner_user_id, e.url, e.check_interval, e.created_at
                 FROM users u
                 LEFT JOIN endpoints e ON e.owner_user_id = u.id
                 ORDER BY u.id, e.id",
                (),
            )
            .await?;

        let mut users: Vec<UserEndpoints> = Vec::new();
        while let Some(row) = rows.next().await? {
            let user_id: UserId = row.get(0)?;
            if users.last().map(|user| user.user_id) != Some(user_id) {
                users.push(UserEndpoints { user_id, endpoints: Vec::new() });
            }

            let Some(endpoint_id) = row.get::<Option<i64>>(1)? else {
                continue;
            };
            let endpoint = Endpoint {
                id: endpoint_id,
                owner_user_id: row.get(2)?,
                url: row.get(3)?,
                check_interval: row.get::<i64>(4)?.max(0) as u64,
                created_at: i64_to_timestamp(row.get(5)?),
            };
            if let Some(user) = users.last_mut() {
                user.endpoints.push(endpoint);
            }
        }

        Ok(users)
    }

    async fn list_targets_page(&self, after: Option<EndpointId>, limit: usize) -> Result<Vec<SweepTarget>, StoreError> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, owner_user_id, url FROM endpoints WHERE id > ? ORDER BY id LIMIT ?",
                params![after.unwrap_or(0), limit as i64],
            )
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(SweepTarget { endpoint_id: row.get(0)?, owner_user_id: row.get(1)?, url: row.get(2)? });
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_store;
    use crate::database::Schema;

    #[tokio::test]
    async fn test_create_user_rejects_duplicate_email() -> anyhow::Result<()> {
        let (_dir, pool) = temp_store(Schema::Registry).await?;
        let registry = LibsqlRegistry::new_from_pool(pool);

        let user = registry.create_user("ops@example.com").await?;
        assert_eq!(registry.get_contact(user.id).await?, "ops@example.com");
        assert!(matches!(registry.create_user("ops@example.com").await, Err(StoreError::Conflict)));
        assert!(matches!(registry.get_contact(user.id + 100).await, Err(StoreError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn test_add_endpoint_is_unique_per_owner_and_url() -> anyhow::Result<()> {
        let (_dir, pool) = temp_store(Schema::Registry).await?;
        let registry = LibsqlRegistry::new_from_pool(pool);
        let alice = registry.create_user("alice@example.com").await?;
        let bob = registry.create_user("bob@example.com").await?;

        let first = registry.add_endpoint(alice.id, "https://example.com/", 60).await?;
        let again = registry.add_endpoint(alice.id, "https://example.com/", 120).await?;
        let other_owner = registry.add_endpoint(bob.id, "https://example.com/", 60).await?;

        assert_eq!(first.id, again.id);
        assert_eq!(again.check_interval, 60);
        assert_ne!(first.id, other_owner.id);
        assert_eq!(registry.list_endpoints(alice.id).await?.len(), 1);

        assert!(registry.get_endpoint(bob.id, first.id).await?.is_none());
        assert!(matches!(registry.add_endpoint(9_999, "https://x.io/", 60).await, Err(StoreError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_all_includes_users_without_endpoints() -> anyhow::Result<()> {
        let (_dir, pool) = temp_store(Schema::Registry).await?;
        let registry = LibsqlRegistry::new_from_pool(pool);
        let alice = registry.create_user("alice@example.com").await?;
        let bob = registry.create_user("bob@example.com").await?;
        registry.add_endpoint(alice.id, "https://a.example/", 60).await?;
        registry.add_endpoint(alice.id, "https://b.example/", 60).await?;

        let all = registry.list_all().await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user_id, alice.id);
        assert_eq!(all[0].endpoints.len(), 2);
        assert_eq!(all[1].user_id, bob.id);
        assert!(all[1].endpoints.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_target_pages_cover_every_endpoint_once() -> anyhow::Result<()> {
        let (_dir, pool) = temp_store(Schema::Registry).await?;
        let registry = LibsqlRegistry::new_from_pool(pool);
        let user = registry.create_user("ops@example.com").await?;
        for i in 0..7 {
            registry.add_endpoint(user.id, &format!("https://site{i}.example/"), 60).await?;
        }

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = registry.list_targets_page(after, 3).await?;
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 3);
            after = page.last().map(|target| target.endpoint_id);
            seen.extend(page.into_iter().map(|target| target.url));
        }

        assert_eq!(seen.len(), 7);
        seen.dedup();
        assert_eq!(seen.len(), 7);
        Ok(())
    }
}
