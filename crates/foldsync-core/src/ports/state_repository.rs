//! State repository port (driven/secondary port)
//!
//! This module defines the interface for persisting and querying root
//! folders, file records, sync flows, file sync mappings, the event log and
//! collaborator job records.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - Lookups return `Ok(None)` for missing rows; the engine treats those as
//!   soft no-ops rather than failures.
//! - `save_*` operations are upserts keyed on the entity id. Implementations
//!   must back the uniqueness invariants (one live folder per path, one live
//!   record per (folder, identity key), one live flow per (source,
//!   destination), one mapping per (flow, source file)) with constraints, so
//!   a racing duplicate insert fails instead of silently forking state.

use std::path::Path;

use crate::domain::{
    newtypes::{FileId, JobId, MappingId, RootFolderId, SyncFlowId, UniqueKey},
    FileRecord, FileSyncMapping, FlowStatus, JobKind, JobRecord, JobStatus, RootFolder,
    SyncEventEntry, SyncFlow,
};

// ============================================================================
// PageRequest
// ============================================================================

/// Offset/limit window for paged scans
///
/// # Example
///
/// ```
/// use foldsync_core::ports::PageRequest;
///
/// let mut page = PageRequest::first(500);
/// assert_eq!(page.offset, 0);
/// page = page.next();
/// assert_eq!(page.offset, 500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Number of rows to skip
    pub offset: u64,
    /// Maximum number of rows to return
    pub limit: u32,
}

impl PageRequest {
    /// The first page of `limit` rows
    pub fn first(limit: u32) -> Self {
        Self { offset: 0, limit }
    }

    /// The page following this one
    pub fn next(self) -> Self {
        Self {
            offset: self.offset + u64::from(self.limit),
            limit: self.limit,
        }
    }
}

// ============================================================================
// IStateRepository trait
// ============================================================================

/// Port trait for persistent state storage
///
/// The backing store is the system of record: every in-memory cache in the
/// engine is written only after the corresponding call here succeeds.
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- RootFolder operations ---

    /// Insert or update a root folder
    async fn save_root_folder(&self, folder: &RootFolder) -> anyhow::Result<()>;

    /// Get a root folder by id (including soft-deleted ones)
    async fn get_root_folder(&self, id: &RootFolderId) -> anyhow::Result<Option<RootFolder>>;

    /// Get the non-deleted root folder registered at `path`
    async fn get_root_folder_by_path(&self, path: &Path) -> anyhow::Result<Option<RootFolder>>;

    /// List all non-deleted root folders
    async fn list_root_folders(&self) -> anyhow::Result<Vec<RootFolder>>;

    // --- FileRecord operations ---

    /// Insert or update a file record
    async fn save_file(&self, file: &FileRecord) -> anyhow::Result<()>;

    /// Get a file record by id (including soft-deleted ones)
    async fn get_file(&self, id: &FileId) -> anyhow::Result<Option<FileRecord>>;

    /// Get the non-deleted file record with this identity key in a folder
    async fn get_file_by_key(
        &self,
        folder: &RootFolderId,
        key: &UniqueKey,
    ) -> anyhow::Result<Option<FileRecord>>;

    /// Page through the non-deleted file records of a folder, ordered by key
    async fn list_files_page(
        &self,
        folder: &RootFolderId,
        page: PageRequest,
    ) -> anyhow::Result<Vec<FileRecord>>;

    /// Physically remove a file record (reconciliation of stale rows)
    ///
    /// Mappings that use the file as their source are desynced, never
    /// removed. Mappings that point at it as their destination are kept.
    async fn purge_file(&self, id: &FileId) -> anyhow::Result<()>;

    // --- SyncFlow operations ---

    /// Insert or update a sync flow
    async fn save_flow(&self, flow: &SyncFlow) -> anyhow::Result<()>;

    /// Get a non-deleted sync flow by id
    async fn get_flow(&self, id: &SyncFlowId) -> anyhow::Result<Option<SyncFlow>>;

    /// Get the non-deleted flow for a (source, destination) pair
    async fn get_flow_by_pair(
        &self,
        source: &RootFolderId,
        destination: &RootFolderId,
    ) -> anyhow::Result<Option<SyncFlow>>;

    /// All non-deleted flows whose source is `source`
    async fn get_flows_by_source(&self, source: &RootFolderId) -> anyhow::Result<Vec<SyncFlow>>;

    /// All non-deleted flows currently in `status`
    async fn get_flows_by_status(&self, status: FlowStatus) -> anyhow::Result<Vec<SyncFlow>>;

    /// All non-deleted flows
    async fn list_flows(&self) -> anyhow::Result<Vec<SyncFlow>>;

    // --- FileSyncMapping operations ---

    /// Insert or update a mapping
    async fn save_mapping(&self, mapping: &FileSyncMapping) -> anyhow::Result<()>;

    /// The mapping for a (flow, source file) pair, if any
    async fn get_mapping(
        &self,
        flow: &SyncFlowId,
        source_file: &FileId,
    ) -> anyhow::Result<Option<FileSyncMapping>>;

    /// All mappings that produced `destination_file`
    async fn get_mappings_by_destination(
        &self,
        destination_file: &FileId,
    ) -> anyhow::Result<Vec<FileSyncMapping>>;

    /// All mappings of a flow
    async fn list_mappings(&self, flow: &SyncFlowId) -> anyhow::Result<Vec<FileSyncMapping>>;

    /// Physically remove a mapping (idempotent re-create, filter exclusion)
    async fn delete_mapping(&self, id: &MappingId) -> anyhow::Result<()>;

    /// Flip a mapping to DESYNCED; returns false if it does not exist
    async fn desync_mapping(&self, id: &MappingId) -> anyhow::Result<bool>;

    // --- Event log operations ---

    /// Append a handled-event entry
    async fn save_event(&self, entry: &SyncEventEntry) -> anyhow::Result<()>;

    /// Most recent entries for a flow, newest first
    async fn get_events_for_flow(
        &self,
        flow: &SyncFlowId,
        limit: u32,
    ) -> anyhow::Result<Vec<SyncEventEntry>>;

    // --- Job operations ---

    /// Insert or update a collaborator job record
    async fn save_job(&self, job: &JobRecord) -> anyhow::Result<()>;

    /// Get a job record by id
    async fn get_job(&self, id: &JobId) -> anyhow::Result<Option<JobRecord>>;

    /// Jobs of one kind in one status, oldest first
    async fn get_jobs_by_status(
        &self,
        kind: JobKind,
        status: JobStatus,
    ) -> anyhow::Result<Vec<JobRecord>>;
}
