//! foldsync Cache - SQLite state store
//!
//! Persists everything the sync engine needs to survive a restart: root
//! folders, file records with their identity keys, sync flows, file sync
//! mappings, the handled-event log and collaborator job records.
//!
//! [`SqliteStateRepository`] implements the `IStateRepository` port from
//! `foldsync-core`; [`DatabasePool`] opens the database and keeps its schema
//! current.
//!
//! ```no_run
//! use std::path::Path;
//! use foldsync_cache::{DatabasePool, SqliteStateRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/foldsync/foldsync.db")).await?;
//! let repo = SqliteStateRepository::new(pool.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::{DatabasePool, SCHEMA_VERSION};
pub use repository::SqliteStateRepository;

/// Errors raised by the state store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The database could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// The schema could not be applied
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The database was written by a newer build
    #[error("Database schema v{found} is newer than supported v{supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// A stored value does not parse back into its domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
