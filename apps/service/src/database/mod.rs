/// Database abstraction layer
///
/// Two stores with separate lifecycles:
/// - the registry (users and endpoints, transactional config)
/// - the history (append-only probe results)
///
/// They are never joined in one transaction; `queries` stitches them together
/// in two passes for the read paths that need both.

pub mod history;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod registry;

pub use history::{History, LibsqlHistory};
pub use migrations::Schema;
pub use queries::HistoryQueries;
pub use registry::{LibsqlRegistry, Registry};

use std::path::Path;

use anyhow::Context;
use thiserror::Error;

use crate::pool::{LibsqlPool, open_local};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    QueryFailure(#[from] libsql::Error),

    #[error("No database connection available: {0}")]
    Pool(#[from] deadpool::managed::PoolError<libsql::Error>),

    #[error("Record not found")]
    NotFound,

    #[error("Unique constraint violation")]
    Conflict,

    #[error("Stored row is malformed: {0}")]
    Corrupt(String),
}

/// Initialize a store's schema
pub async fn initialize_database(pool: &LibsqlPool, schema: Schema) -> anyhow::Result<()> {
    let conn = pool.get().await?;
    migrations::run_migrations(&conn, schema).await
}

/// Open a store's database file and bring its schema up to date
pub async fn open_store(path: &Path, pool_size: usize, schema: Schema) -> anyhow::Result<LibsqlPool> {
    let pool = open_local(path, pool_size)
        .await
        .with_context(|| format!("Failed to open {schema:?} store at {}", path.display()))?;
    initialize_database(&pool, schema)
        .await
        .with_context(|| format!("Failed to migrate {schema:?} store at {}", path.display()))?;
    Ok(pool)
}
