/// Database layer for Review Desk
///
/// Manages the SQLite connection pool, migrations, and the timestamp and
/// snapshot encodings shared by every store.

use crate::error::{DeskError, DeskResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> DeskResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await?;

    Ok(pool)
}

/// Create a migrated in-memory pool
///
/// Every connection to `sqlite::memory:` opens a fresh database, so the pool
/// is pinned to a single connection that is never recycled.
pub async fn create_memory_pool() -> DeskResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> DeskResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DeskError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> DeskResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Begin a transaction that holds the write lock from its first statement
///
/// A deferred transaction that reads before writing cannot wait for the lock
/// when another writer commits in between; SQLite fails it with
/// `SQLITE_BUSY` instead. `BEGIN IMMEDIATE` waits on the busy timeout.
pub async fn begin_immediate(pool: &SqlitePool) -> DeskResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Parse a stored RFC 3339 timestamp
pub(crate) fn parse_timestamp(value: &str) -> DeskResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DeskError::Internal(format!("Invalid timestamp: {}", e)))
}

/// Parse an optional stored timestamp
pub(crate) fn parse_optional_timestamp(value: Option<String>) -> DeskResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}
