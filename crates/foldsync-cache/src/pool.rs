//! SQLite pool for the foldsync state store
//!
//! File databases run in WAL mode with `synchronous = NORMAL`: the event log
//! and job records take a write for every handled event, and WAL lets the
//! paged reconciliation scans read while those writes land. Foreign keys are
//! enforced on every connection.
//!
//! ## Schema version
//!
//! The schema is applied on every open (it is written with `IF NOT EXISTS`
//! throughout) and stamped into `PRAGMA user_version`. A store stamped by a
//! newer build is refused instead of being written through an older schema.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::CacheError;

/// Version stamped into `user_version` by this build
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = include_str!("migrations/0001_initial.sql");

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Readers for scans plus the dispatcher's writers
const MAX_CONNECTIONS: u32 = 5;

/// Connection pool over the state database
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database file at `db_path`
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the file cannot be opened,
    /// `CacheError::SchemaTooNew` if a newer build stamped it, or
    /// `CacheError::MigrationFailed` if the schema cannot be applied.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to open state database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        let version = prepare_schema(&pool).await?;
        tracing::info!(
            path = %db_path.display(),
            schema_version = version,
            "State database ready"
        );

        Ok(Self { pool })
    }

    /// A private in-memory database, for tests
    ///
    /// Every connection to `:memory:` is its own database, so the pool keeps
    /// exactly one.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` or `CacheError::MigrationFailed`.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {}", e))
            })?;

        prepare_schema(&pool).await?;
        tracing::debug!("In-memory state database ready");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The `user_version` the database is stamped with
    ///
    /// # Errors
    ///
    /// Returns `CacheError::QueryFailed` if the pragma cannot be read.
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        read_user_version(&self.pool).await
    }

    /// Closes all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Apply the schema and stamp its version; returns the stamped version
async fn prepare_schema(pool: &SqlitePool) -> Result<i64, CacheError> {
    let found = read_user_version(pool).await?;
    if found > SCHEMA_VERSION {
        return Err(CacheError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    sqlx::raw_sql(SCHEMA).execute(pool).await.map_err(|e| {
        CacheError::MigrationFailed(format!("Failed to apply schema v{}: {}", SCHEMA_VERSION, e))
    })?;

    if found < SCHEMA_VERSION {
        let stamp = format!("PRAGMA user_version = {SCHEMA_VERSION}");
        sqlx::raw_sql(&stamp).execute(pool).await.map_err(|e| {
            CacheError::MigrationFailed(format!("Failed to stamp schema version: {}", e))
        })?;
        tracing::debug!(from = found, to = SCHEMA_VERSION, "Schema version stamped");
    }
    Ok(SCHEMA_VERSION)
}

async fn read_user_version(pool: &SqlitePool) -> Result<i64, CacheError> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}
