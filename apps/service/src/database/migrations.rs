use anyhow::Result;
use libsql::Connection;

/// Each store lives in its own database file and carries its own schema history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Registry,
    History,
    EventLog,
}

impl Schema {
    fn name(&self) -> &'static str {
        match self {
            Schema::Registry => "registry",
            Schema::History => "history",
            Schema::EventLog => "event log",
        }
    }

    /// Ordered list of (version, description, statements)
    fn migrations(&self) -> &'static [(i32, &'static str, &'static [&'static str])] {
        match self {
            Schema::Registry => REGISTRY_MIGRATIONS,
            Schema::History => HISTORY_MIGRATIONS,
            Schema::EventLog => EVENT_LOG_MIGRATIONS,
        }
    }
}

const REGISTRY_MIGRATIONS: &[(i32, &str, &[&str])] = &[(
    1,
    "Users and endpoints",
    &[
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS endpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_user_id INTEGER NOT NULL REFERENCES users(id),
            url TEXT NOT NULL,
            check_interval INTEGER NOT NULL DEFAULT 60,
            created_at INTEGER NOT NULL,
            UNIQUE (owner_user_id, url)
        )",
        "CREATE INDEX IF NOT EXISTS idx_endpoints_owner ON endpoints(owner_user_id)",
    ],
)];

const HISTORY_MIGRATIONS: &[(i32, &str, &[&str])] = &[(
    1,
    "Append-only probe results",
    &[
        "CREATE TABLE IF NOT EXISTS probe_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_user_id INTEGER NOT NULL,
            url TEXT NOT NULL,
            observed_at INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            outcome TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_probe_results_owner_url_time
            ON probe_results(owner_user_id, url, observed_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_probe_results_observed_at ON probe_results(observed_at)",
    ],
)];

const EVENT_LOG_MIGRATIONS: &[(i32, &str, &[&str])] = &[(
    1,
    "Partitioned log, consumer offsets and partition leases",
    &[
        "CREATE TABLE IF NOT EXISTS log_records (
            topic TEXT NOT NULL,
            partition_id INTEGER NOT NULL,
            log_offset INTEGER NOT NULL,
            record_key TEXT NOT NULL,
            payload BLOB NOT NULL,
            appended_at INTEGER NOT NULL,
            PRIMARY KEY (topic, partition_id, log_offset)
        )",
        "CREATE TABLE IF NOT EXISTS consumer_offsets (
            group_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            partition_id INTEGER NOT NULL,
            next_offset INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (group_id, topic, partition_id)
        )",
        "CREATE TABLE IF NOT EXISTS partition_leases (
            group_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            partition_id INTEGER NOT NULL,
            member_id TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (group_id, topic, partition_id)
        )",
        "CREATE TABLE IF NOT EXISTS redeliveries (
            group_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            partition_id INTEGER NOT NULL,
            log_offset INTEGER NOT NULL,
            count INTEGER NOT NULL,
            PRIMARY KEY (group_id, topic, partition_id, log_offset)
        )",
    ],
)];

/// Run database migrations for one store
pub async fn run_migrations(conn: &Connection, schema: Schema) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;
    let target_version = schema.migrations().last().map(|(version, _, _)| *version).unwrap_or(0);

    if current_version >= target_version {
        tracing::info!(
            "{} schema is up to date (version {})",
            schema.name(),
            current_version
        );
        return Ok(());
    }

    tracing::info!(
        "Running {} migrations from version {} to {}",
        schema.name(),
        current_version,
        target_version
    );

    for (version, description, statements) in schema.migrations() {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().await?;
        for statement in statements.iter() {
            tx.execute(statement, ()).await?;
        }
        record_migration(&tx, *version, description).await?;
        tx.commit().await?;

        tracing::info!("Applied {} migration v{}: {}", schema.name(), version, description);
    }

    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::open_local;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations_are_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let pool = open_local(dir.path().join("registry.db"), 2).await?;
        let conn = pool.get().await?;

        run_migrations(&conn, Schema::Registry).await?;
        run_migrations(&conn, Schema::Registry).await?;

        assert_eq!(get_current_version(&conn).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_each_schema_creates_its_tables() -> Result<()> {
        let dir = tempdir()?;

        for (schema, table) in [
            (Schema::Registry, "endpoints"),
            (Schema::History, "probe_results"),
            (Schema::EventLog, "log_records"),
        ] {
            let pool = open_local(dir.path().join(format!("{table}.db")), 1).await?;
            let conn = pool.get().await?;
            run_migrations(&conn, schema).await?;

            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    libsql::params![table],
                )
                .await?;
            let row = rows.next().await?.expect("count row");
            assert_eq!(row.get::<i64>(0)?, 1, "missing table {table}");
        }
        Ok(())
    }
}
