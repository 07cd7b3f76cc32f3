//! SQLite implementation of IStateRepository
//!
//! This module provides the concrete SQLite-based implementation of the
//! state repository port defined in foldsync-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type                 | SQL Type | Strategy                                       |
//! |-----------------------------|----------|------------------------------------------------|
//! | RootFolderId, FileId, ...   | TEXT     | UUID string via `.to_string()` / `FromStr`     |
//! | EventId                     | INTEGER  | Auto-increment row id                          |
//! | FolderPath                  | TEXT     | Path string / `FolderPath::new()`              |
//! | Checksum, UniqueKey         | TEXT     | String via `.as_str()` / `::new()`             |
//! | FolderRole, FlowStatus, ... | TEXT     | `as_str()` / `FromStr`                         |
//! | FilterCriteria              | TEXT     | serde_json array                               |
//! | JobRecord stats             | TEXT     | serde_json value                               |
//! | DateTime<Utc>               | TEXT     | RFC 3339 via `to_rfc3339()` / `parse_from_rfc3339()` |
//! | bool                        | INTEGER  | 0 / 1                                          |
//!
//! ## Upserts
//!
//! All `save_*` methods use `INSERT ... ON CONFLICT(id) DO UPDATE` rather
//! than `INSERT OR REPLACE`, so a save never changes a row's identity.
//!
//! Mappings hold plain file ids. Purging a file record desyncs the mappings
//! it is the source of and leaves the ones it is the destination of for the
//! cross check to judge, which restores internal copies and desyncs the rest.
//!
//! A soft-deleted sync flow is final: later saves of the same id are
//! ignored, so a status write racing a delete cannot resurrect the flow.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use foldsync_core::domain::{
    newtypes::{
        Checksum, EventId, FileId, FolderPath, JobId, MappingId, RootFolderId, SyncFlowId,
        UniqueKey,
    },
    Auditable, FileRecord, FileSyncMapping, FilterCriteria, FlowStatus, JobKind, JobRecord,
    JobStatus, RootFolder, SyncEventEntry, SyncFlow,
};
use foldsync_core::ports::{IStateRepository, PageRequest};

use crate::CacheError;

/// SQLite-based implementation of the state repository port
///
/// Provides persistent storage for all domain entities using SQLite.
/// All operations are performed through a connection pool for concurrency.
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse a stored text column through the type's `FromStr`
fn parse_column<T>(column: &str, value: &str) -> Result<T, CacheError>
where
    T: FromStr,
    T::Err: Display,
{
    T::from_str(value).map_err(|e| {
        CacheError::SerializationError(format!("Invalid {} '{}': {}", column, value, e))
    })
}

/// Parse a DateTime<Utc> from an RFC 3339 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

/// Read the shared created_at / updated_at / deleted columns
fn audit_from_row(row: &SqliteRow, has_deleted: bool) -> Result<Auditable, CacheError> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let deleted = if has_deleted {
        row.get::<i64, _>("deleted") != 0
    } else {
        false
    };
    Ok(Auditable::restore(
        parse_datetime(&created_at)?,
        parse_datetime(&updated_at)?,
        deleted,
    ))
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn root_folder_from_row(row: &SqliteRow) -> Result<RootFolder, CacheError> {
    let id: String = row.get("id");
    let path: String = row.get("path");
    let role: String = row.get("role");

    let path = FolderPath::new(PathBuf::from(&path)).map_err(|e| {
        CacheError::SerializationError(format!("Invalid folder path '{}': {}", path, e))
    })?;

    Ok(RootFolder {
        id: parse_column("root folder id", &id)?,
        name: row.get("name"),
        path,
        role: parse_column("folder role", &role)?,
        audit: audit_from_row(row, true)?,
    })
}

fn file_record_from_row(row: &SqliteRow) -> Result<FileRecord, CacheError> {
    let id: String = row.get("id");
    let root_folder_id: String = row.get("root_folder_id");
    let checksum: String = row.get("checksum");
    let modified_at: String = row.get("modified_at");
    let unique_key: String = row.get("unique_key");

    let checksum = Checksum::new(checksum.clone()).map_err(|e| {
        CacheError::SerializationError(format!("Invalid checksum '{}': {}", checksum, e))
    })?;
    let unique_key = UniqueKey::new(unique_key.clone()).map_err(|e| {
        CacheError::SerializationError(format!("Invalid unique key '{}': {}", unique_key, e))
    })?;

    Ok(FileRecord {
        id: parse_column("file id", &id)?,
        root_folder_id: parse_column("root folder id", &root_folder_id)?,
        directory: row.get("directory"),
        name: row.get("name"),
        extension: row.get("extension"),
        checksum,
        modified_at: parse_datetime(&modified_at)?,
        unique_key,
        desynced: row.get::<i64, _>("desynced") != 0,
        audit: audit_from_row(row, true)?,
    })
}

fn sync_flow_from_row(row: &SqliteRow) -> Result<SyncFlow, CacheError> {
    let id: String = row.get("id");
    let source_id: String = row.get("source_id");
    let destination_id: String = row.get("destination_id");
    let flow_type: String = row.get("flow_type");
    let status: String = row.get("status");
    let last_sync: Option<String> = row.get("last_sync");
    let filters: String = row.get("filters");
    let layout: String = row.get("layout");

    let criteria: Vec<String> = serde_json::from_str(&filters).map_err(|e| {
        CacheError::SerializationError(format!("Invalid filters '{}': {}", filters, e))
    })?;

    Ok(SyncFlow {
        id: parse_column("flow id", &id)?,
        name: row.get("name"),
        source_id: parse_column("root folder id", &source_id)?,
        destination_id: parse_column("root folder id", &destination_id)?,
        flow_type: parse_column("flow type", &flow_type)?,
        status: parse_column("flow status", &status)?,
        last_sync: parse_optional_datetime(last_sync)?,
        filters: FilterCriteria::new(criteria),
        layout: parse_column("layout", &layout)?,
        audit: audit_from_row(row, true)?,
    })
}

fn mapping_from_row(row: &SqliteRow) -> Result<FileSyncMapping, CacheError> {
    let id: String = row.get("id");
    let flow_id: String = row.get("flow_id");
    let source_file_id: String = row.get("source_file_id");
    let destination_file_id: String = row.get("destination_file_id");

    Ok(FileSyncMapping {
        id: parse_column("mapping id", &id)?,
        flow_id: parse_column("flow id", &flow_id)?,
        source_file_id: parse_column("file id", &source_file_id)?,
        destination_file_id: parse_column("file id", &destination_file_id)?,
        desynced: row.get::<i64, _>("desynced") != 0,
        audit: audit_from_row(row, false)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<SyncEventEntry, CacheError> {
    let id: i64 = row.get("id");
    let timestamp: String = row.get("timestamp");
    let flow_id: String = row.get("flow_id");
    let file_id: String = row.get("file_id");
    let kind: String = row.get("kind");
    let outcome: String = row.get("outcome");
    let detail: Option<String> = row.get("detail");

    let mut entry = SyncEventEntry::new(
        parse_column::<SyncFlowId>("flow id", &flow_id)?,
        parse_column::<FileId>("file id", &file_id)?,
        parse_column("change kind", &kind)?,
        parse_column("event outcome", &outcome)?,
    )
    .with_id(EventId::new(id))
    .with_timestamp(parse_datetime(&timestamp)?);
    if let Some(detail) = detail {
        entry = entry.with_detail(detail);
    }
    Ok(entry)
}

fn job_from_row(row: &SqliteRow) -> Result<JobRecord, CacheError> {
    let id: String = row.get("id");
    let kind: String = row.get("kind");
    let flow_id: Option<String> = row.get("flow_id");
    let status: String = row.get("status");
    let stats: String = row.get("stats");
    let started_at: String = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");

    let flow_id = match flow_id {
        Some(ref value) => Some(parse_column::<SyncFlowId>("flow id", value)?),
        None => None,
    };
    let stats = serde_json::from_str(&stats)
        .map_err(|e| CacheError::SerializationError(format!("Invalid job stats: {}", e)))?;

    Ok(JobRecord {
        id: parse_column("job id", &id)?,
        kind: parse_column("job kind", &kind)?,
        flow_id,
        external_id: row.get("external_id"),
        status: parse_column("job status", &status)?,
        message: row.get("message"),
        stats,
        started_at: parse_datetime(&started_at)?,
        finished_at: parse_optional_datetime(finished_at)?,
    })
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    // --- RootFolder operations ---

    async fn save_root_folder(&self, folder: &RootFolder) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO root_folders (id, name, path, role, created_at, updated_at, deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, path = excluded.path, role = excluded.role, \
             updated_at = excluded.updated_at, deleted = excluded.deleted",
        )
        .bind(folder.id.to_string())
        .bind(&folder.name)
        .bind(folder.path.to_string())
        .bind(folder.role.as_str())
        .bind(folder.audit.created_at.to_rfc3339())
        .bind(folder.audit.updated_at.to_rfc3339())
        .bind(bool_to_int(folder.audit.deleted))
        .execute(&self.pool)
        .await?;

        tracing::trace!(folder_id = %folder.id, path = %folder.path, "Saved root folder");
        Ok(())
    }

    async fn get_root_folder(&self, id: &RootFolderId) -> anyhow::Result<Option<RootFolder>> {
        let row = sqlx::query("SELECT * FROM root_folders WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(root_folder_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_root_folder_by_path(&self, path: &Path) -> anyhow::Result<Option<RootFolder>> {
        let row = sqlx::query("SELECT * FROM root_folders WHERE path = ? AND deleted = 0")
            .bind(path.to_string_lossy().to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(root_folder_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_root_folders(&self) -> anyhow::Result<Vec<RootFolder>> {
        let rows = sqlx::query("SELECT * FROM root_folders WHERE deleted = 0 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        let mut folders = Vec::with_capacity(rows.len());
        for row in &rows {
            folders.push(root_folder_from_row(row)?);
        }
        Ok(folders)
    }

    // --- FileRecord operations ---

    async fn save_file(&self, file: &FileRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO files \
             (id, root_folder_id, directory, name, extension, checksum, modified_at, \
              unique_key, desynced, created_at, updated_at, deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             directory = excluded.directory, name = excluded.name, \
             extension = excluded.extension, checksum = excluded.checksum, \
             modified_at = excluded.modified_at, unique_key = excluded.unique_key, \
             desynced = excluded.desynced, updated_at = excluded.updated_at, \
             deleted = excluded.deleted",
        )
        .bind(file.id.to_string())
        .bind(file.root_folder_id.to_string())
        .bind(&file.directory)
        .bind(&file.name)
        .bind(&file.extension)
        .bind(file.checksum.as_str())
        .bind(file.modified_at.to_rfc3339())
        .bind(file.unique_key.as_str())
        .bind(bool_to_int(file.desynced))
        .bind(file.audit.created_at.to_rfc3339())
        .bind(file.audit.updated_at.to_rfc3339())
        .bind(bool_to_int(file.audit.deleted))
        .execute(&self.pool)
        .await?;

        tracing::trace!(file_id = %file.id, key = %file.unique_key, "Saved file record");
        Ok(())
    }

    async fn get_file(&self, id: &FileId) -> anyhow::Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(file_record_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_file_by_key(
        &self,
        folder: &RootFolderId,
        key: &UniqueKey,
    ) -> anyhow::Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT * FROM files WHERE root_folder_id = ? AND unique_key = ? AND deleted = 0",
        )
        .bind(folder.to_string())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(file_record_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_files_page(
        &self,
        folder: &RootFolderId,
        page: PageRequest,
    ) -> anyhow::Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE root_folder_id = ? AND deleted = 0 \
             ORDER BY unique_key LIMIT ? OFFSET ?",
        )
        .bind(folder.to_string())
        .bind(i64::from(page.limit))
        .bind(i64::try_from(page.offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in &rows {
            files.push(file_record_from_row(row)?);
        }
        Ok(files)
    }

    async fn purge_file(&self, id: &FileId) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let desynced = sqlx::query(
            "UPDATE file_sync_mappings SET desynced = 1, updated_at = ? \
             WHERE source_file_id = ? AND desynced = 0",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::trace!(file_id = %id, desynced, "Purged file record");
        Ok(())
    }

    // --- SyncFlow operations ---

    async fn save_flow(&self, flow: &SyncFlow) -> anyhow::Result<()> {
        let filters = serde_json::to_string(flow.filters.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to serialize filters: {}", e))?;

        sqlx::query(
            "INSERT INTO sync_flows \
             (id, name, source_id, destination_id, flow_type, status, last_sync, filters, \
              layout, created_at, updated_at, deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, status = excluded.status, last_sync = excluded.last_sync, \
             filters = excluded.filters, layout = excluded.layout, \
             updated_at = excluded.updated_at, deleted = excluded.deleted \
             WHERE sync_flows.deleted = 0",
        )
        .bind(flow.id.to_string())
        .bind(&flow.name)
        .bind(flow.source_id.to_string())
        .bind(flow.destination_id.to_string())
        .bind(flow.flow_type.as_str())
        .bind(flow.status.as_str())
        .bind(flow.last_sync.map(|dt| dt.to_rfc3339()))
        .bind(filters)
        .bind(flow.layout.as_str())
        .bind(flow.audit.created_at.to_rfc3339())
        .bind(flow.audit.updated_at.to_rfc3339())
        .bind(bool_to_int(flow.audit.deleted))
        .execute(&self.pool)
        .await?;

        tracing::trace!(flow_id = %flow.id, status = %flow.status, "Saved sync flow");
        Ok(())
    }

    async fn get_flow(&self, id: &SyncFlowId) -> anyhow::Result<Option<SyncFlow>> {
        let row = sqlx::query("SELECT * FROM sync_flows WHERE id = ? AND deleted = 0")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(sync_flow_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_flow_by_pair(
        &self,
        source: &RootFolderId,
        destination: &RootFolderId,
    ) -> anyhow::Result<Option<SyncFlow>> {
        let row = sqlx::query(
            "SELECT * FROM sync_flows WHERE source_id = ? AND destination_id = ? AND deleted = 0",
        )
        .bind(source.to_string())
        .bind(destination.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(sync_flow_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_flows_by_source(&self, source: &RootFolderId) -> anyhow::Result<Vec<SyncFlow>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_flows WHERE source_id = ? AND deleted = 0 ORDER BY created_at",
        )
        .bind(source.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in &rows {
            flows.push(sync_flow_from_row(row)?);
        }
        Ok(flows)
    }

    async fn get_flows_by_status(&self, status: FlowStatus) -> anyhow::Result<Vec<SyncFlow>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_flows WHERE status = ? AND deleted = 0 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in &rows {
            flows.push(sync_flow_from_row(row)?);
        }
        Ok(flows)
    }

    async fn list_flows(&self) -> anyhow::Result<Vec<SyncFlow>> {
        let rows = sqlx::query("SELECT * FROM sync_flows WHERE deleted = 0 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in &rows {
            flows.push(sync_flow_from_row(row)?);
        }
        Ok(flows)
    }

    // --- FileSyncMapping operations ---

    async fn save_mapping(&self, mapping: &FileSyncMapping) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO file_sync_mappings \
             (id, flow_id, source_file_id, destination_file_id, desynced, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             destination_file_id = excluded.destination_file_id, \
             desynced = excluded.desynced, updated_at = excluded.updated_at",
        )
        .bind(mapping.id.to_string())
        .bind(mapping.flow_id.to_string())
        .bind(mapping.source_file_id.to_string())
        .bind(mapping.destination_file_id.to_string())
        .bind(bool_to_int(mapping.desynced))
        .bind(mapping.audit.created_at.to_rfc3339())
        .bind(mapping.audit.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            mapping_id = %mapping.id,
            flow_id = %mapping.flow_id,
            desynced = mapping.desynced,
            "Saved mapping"
        );
        Ok(())
    }

    async fn get_mapping(
        &self,
        flow: &SyncFlowId,
        source_file: &FileId,
    ) -> anyhow::Result<Option<FileSyncMapping>> {
        let row = sqlx::query(
            "SELECT * FROM file_sync_mappings WHERE flow_id = ? AND source_file_id = ?",
        )
        .bind(flow.to_string())
        .bind(source_file.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(mapping_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_mappings_by_destination(
        &self,
        destination_file: &FileId,
    ) -> anyhow::Result<Vec<FileSyncMapping>> {
        let rows = sqlx::query("SELECT * FROM file_sync_mappings WHERE destination_file_id = ?")
            .bind(destination_file.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in &rows {
            mappings.push(mapping_from_row(row)?);
        }
        Ok(mappings)
    }

    async fn list_mappings(&self, flow: &SyncFlowId) -> anyhow::Result<Vec<FileSyncMapping>> {
        let rows =
            sqlx::query("SELECT * FROM file_sync_mappings WHERE flow_id = ? ORDER BY created_at")
                .bind(flow.to_string())
                .fetch_all(&self.pool)
                .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in &rows {
            mappings.push(mapping_from_row(row)?);
        }
        Ok(mappings)
    }

    async fn delete_mapping(&self, id: &MappingId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM file_sync_mappings WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        tracing::trace!(mapping_id = %id, "Deleted mapping");
        Ok(())
    }

    async fn desync_mapping(&self, id: &MappingId) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE file_sync_mappings SET desynced = 1, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // --- Event log operations ---

    async fn save_event(&self, entry: &SyncEventEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO sync_events (timestamp, flow_id, file_id, kind, outcome, detail) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.timestamp().to_rfc3339())
        .bind(entry.flow_id().to_string())
        .bind(entry.file_id().to_string())
        .bind(entry.kind().as_str())
        .bind(entry.outcome().as_str())
        .bind(entry.detail())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_events_for_flow(
        &self,
        flow: &SyncFlowId,
        limit: u32,
    ) -> anyhow::Result<Vec<SyncEventEntry>> {
        let rows =
            sqlx::query("SELECT * FROM sync_events WHERE flow_id = ? ORDER BY id DESC LIMIT ?")
                .bind(flow.to_string())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(event_from_row(row)?);
        }
        Ok(entries)
    }

    // --- Job operations ---

    async fn save_job(&self, job: &JobRecord) -> anyhow::Result<()> {
        let stats = serde_json::to_string(&job.stats)
            .map_err(|e| anyhow::anyhow!("Failed to serialize job stats: {}", e))?;

        sqlx::query(
            "INSERT INTO jobs \
             (id, kind, flow_id, external_id, status, message, stats, started_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             external_id = excluded.external_id, status = excluded.status, \
             message = excluded.message, stats = excluded.stats, \
             finished_at = excluded.finished_at",
        )
        .bind(job.id.to_string())
        .bind(job.kind.as_str())
        .bind(job.flow_id.map(|id| id.to_string()))
        .bind(&job.external_id)
        .bind(job.status.as_str())
        .bind(&job.message)
        .bind(stats)
        .bind(job.started_at.to_rfc3339())
        .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(job_id = %job.id, status = %job.status, "Saved job record");
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(job_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_jobs_by_status(
        &self,
        kind: JobKind,
        status: JobStatus,
    ) -> anyhow::Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE kind = ? AND status = ? ORDER BY started_at",
        )
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(job_from_row(row)?);
        }
        Ok(jobs)
    }
}
