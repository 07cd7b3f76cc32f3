//! Ingress and propagation handlers
//!
//! The [`SyncEngine`] turns events into record mutations and filesystem
//! effects.
//!
//! ## Ingress (raw file events)
//!
//! A created or changed file is upserted from disk: a new identity key gets
//! a fresh record and a downstream `Created`, a new checksum updates the
//! record and emits `Changed`, an unchanged checksum only refreshes the
//! stored mtime. A content change on a file that some flow produced marks
//! those mappings DESYNCED. Removal soft-deletes the record and emits
//! `Deleted`.
//!
//! ## Downstream (per flow)
//!
//! ```text
//!   UNMAPPED ──created──► MAPPED ──deleted / independent edit──► DESYNCED
//! ```
//!
//! The destination record is written *before* the file is placed, so the
//! watcher event caused by our own write resolves to an already-current
//! record and stops there. Events for the same (flow, source file) pair are
//! applied one at a time, so a replayed `Created` racing the original sees
//! the mapping the first one wrote. Every handled event is logged to the
//! store and always releases its pending count, whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use foldsync_core::domain::identity::{key_for_location, truncate_to_second};
use foldsync_core::domain::newtypes::{FileId, RootFolderId, SyncFlowId};
use foldsync_core::domain::{
    ChangeKind, DownstreamEvent, EventOutcome, FileEvent, FileLocation, FileRecord,
    FileSyncMapping, RootFolder, SyncEventEntry, SyncFlow,
};
use foldsync_core::ports::{ILocalFileSystem, IStateRepository};
use tracing::{debug, error, info, instrument, warn};

use crate::bus::EventBus;
use crate::filesystem::is_staging_file;
use crate::folders::RootFolderRegistry;
use crate::locks::KeyedLocks;
use crate::registry::SyncFlowRegistry;
use crate::validator::AccessValidator;
use crate::SyncError;

// ============================================================================
// IngressOutcome
// ============================================================================

/// What handling one raw file event did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    /// A new record was created and a downstream `Created` emitted
    Created(FileId),
    /// The record's content changed and a downstream `Changed` emitted
    Changed(FileId),
    /// The record was soft-deleted and a downstream `Deleted` emitted
    Deleted(FileId),
    /// The record already matched the file on disk
    AlreadyCurrent(FileId),
    /// Nothing to record (vanished file, staging file, unknown record)
    Ignored,
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Event handlers shared by the dispatcher loops
pub struct SyncEngine {
    repo: Arc<dyn IStateRepository>,
    fs: Arc<dyn ILocalFileSystem>,
    validator: Arc<AccessValidator>,
    registry: Arc<SyncFlowRegistry>,
    folders: Arc<RootFolderRegistry>,
    bus: Arc<EventBus>,
    in_flight: KeyedLocks<(SyncFlowId, FileId)>,
}

impl SyncEngine {
    pub fn new(
        repo: Arc<dyn IStateRepository>,
        fs: Arc<dyn ILocalFileSystem>,
        registry: Arc<SyncFlowRegistry>,
        folders: Arc<RootFolderRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        let validator = Arc::clone(folders.validator());
        Self {
            repo,
            fs,
            validator,
            registry,
            folders,
            bus,
            in_flight: KeyedLocks::new(),
        }
    }

    async fn folder(&self, id: &RootFolderId) -> anyhow::Result<RootFolder> {
        Ok(self
            .folders
            .get(id)
            .await?
            .ok_or(SyncError::UnknownFolder(*id))?)
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------

    /// Apply one raw file event to the store
    ///
    /// # Errors
    /// Returns an error for unknown folders, paths outside their folder's
    /// root, and store or filesystem failures
    #[instrument(skip(self, event), fields(folder_id = %event.root_folder_id(), kind = %event.kind()))]
    pub async fn handle_ingress(&self, event: FileEvent) -> anyhow::Result<IngressOutcome> {
        let folder = self.folder(&event.root_folder_id()).await?;

        match event {
            FileEvent::Created { path, .. } | FileEvent::Changed { path, .. } => {
                self.upsert_from_disk(&folder, &path).await
            }
            FileEvent::Deleted {
                path, stale_record, ..
            } => self.remove(&folder, path, stale_record).await,
        }
    }

    async fn upsert_from_disk(&self, folder: &RootFolder, path: &Path) -> anyhow::Result<IngressOutcome> {
        self.validator.check(&folder.id, path)?;
        if is_staging_file(path) {
            return Ok(IngressOutcome::Ignored);
        }

        let state = self.fs.get_state(path).await?;
        if !state.is_regular_file() {
            debug!(path = %path.display(), "Path is not a regular file, ignoring");
            return Ok(IngressOutcome::Ignored);
        }

        let location = FileLocation::resolve(&folder.path, path)?;
        let key = key_for_location(folder.id, &location);
        let checksum = self.fs.compute_checksum(path).await?;
        let modified = truncate_to_second(state.modified.unwrap_or_else(Utc::now));

        let mut record = match self.repo.get_file_by_key(&folder.id, &key).await? {
            Some(record) => record,
            None => {
                let record = FileRecord::new(folder.id, location, checksum.clone(), modified);
                match self.repo.save_file(&record).await {
                    Ok(()) => {
                        info!(file_id = %record.id, key = %record.unique_key, "New file recorded");
                        self.emit(folder, record.id, ChangeKind::Created).await;
                        return Ok(IngressOutcome::Created(record.id));
                    }
                    // Another handler recorded the same key first
                    Err(e) => match self.repo.get_file_by_key(&folder.id, &key).await? {
                        Some(winner) => winner,
                        None => return Err(e),
                    },
                }
            }
        };

        if record.has_content(&checksum) {
            if record.mtime_differs(modified) {
                record.update_mtime(modified);
                self.repo.save_file(&record).await?;
            }
            debug!(file_id = %record.id, "File already current");
            return Ok(IngressOutcome::AlreadyCurrent(record.id));
        }

        record.update_content(checksum, modified);
        if self.desync_as_destination(&record.id).await? > 0 {
            record.mark_desynced();
        }
        self.repo.save_file(&record).await?;
        info!(file_id = %record.id, checksum = %record.checksum, "File content changed");
        self.emit(folder, record.id, ChangeKind::Changed).await;
        Ok(IngressOutcome::Changed(record.id))
    }

    async fn remove(
        &self,
        folder: &RootFolder,
        path: Option<PathBuf>,
        stale_record: Option<FileId>,
    ) -> anyhow::Result<IngressOutcome> {
        if let Some(ref path) = path {
            // Delete-then-recreate bursts collapse into the last event
            if self.fs.get_state(path).await?.is_regular_file() {
                return self.upsert_from_disk(folder, path).await;
            }
        }

        let record = match (stale_record, path) {
            (Some(id), _) => self
                .repo
                .get_file(&id)
                .await?
                .filter(|r| !r.is_deleted() && r.root_folder_id == folder.id),
            (None, Some(path)) => {
                let location = FileLocation::resolve(&folder.path, &path)?;
                let key = key_for_location(folder.id, &location);
                self.repo.get_file_by_key(&folder.id, &key).await?
            }
            (None, None) => None,
        };
        let Some(mut record) = record else {
            debug!(folder_id = %folder.id, "No live record for removed file");
            return Ok(IngressOutcome::Ignored);
        };

        record.mark_deleted();
        self.repo.save_file(&record).await?;
        self.desync_as_destination(&record.id).await?;
        info!(file_id = %record.id, key = %record.unique_key, "File removed");
        self.emit(folder, record.id, ChangeKind::Deleted).await;
        Ok(IngressOutcome::Deleted(record.id))
    }

    /// Desync every live mapping that produced `file`; returns how many moved
    async fn desync_as_destination(&self, file: &FileId) -> anyhow::Result<usize> {
        let mut desynced = 0;
        for mapping in self.repo.get_mappings_by_destination(file).await? {
            if !mapping.desynced && self.repo.desync_mapping(&mapping.id).await? {
                info!(
                    flow_id = %mapping.flow_id,
                    source_file_id = %mapping.source_file_id,
                    destination_file_id = %file,
                    "Destination diverged, mapping desynced"
                );
                desynced += 1;
            }
        }
        Ok(desynced)
    }

    async fn emit(&self, folder: &RootFolder, file: FileId, kind: ChangeKind) {
        if let Err(e) = self
            .bus
            .push_downstream(DownstreamEvent::new(folder.id, file, kind))
            .await
        {
            // The next cross-folder check re-derives the missing propagation
            warn!(folder_id = %folder.id, file_id = %file, error = %e, "Failed to queue downstream event");
        }
    }

    // ------------------------------------------------------------------
    // Downstream
    // ------------------------------------------------------------------

    /// Handle one flow-bound downstream event
    ///
    /// Never fails: errors (and panics) become a `Failed` outcome. The
    /// outcome is logged to the store and the flow's pending count released
    /// in every case.
    pub async fn handle_downstream(self: &Arc<Self>, event: DownstreamEvent) -> EventOutcome {
        let Some(flow_id) = event.flow_id else {
            warn!(file_id = %event.file_id, "Downstream event without a flow, dropping");
            return EventOutcome::Skipped;
        };

        let engine = Arc::clone(self);
        let applied = {
            let event = event.clone();
            tokio::spawn(async move { engine.apply(flow_id, &event).await }).await
        };

        let (outcome, detail) = match applied {
            Ok(Ok(outcome)) => (outcome, None),
            Ok(Err(e)) => {
                warn!(flow_id = %flow_id, file_id = %event.file_id, kind = %event.kind, error = %e, "Downstream event failed");
                (EventOutcome::Failed, Some(e.to_string()))
            }
            Err(join_error) => {
                error!(flow_id = %flow_id, file_id = %event.file_id, error = %join_error, "Downstream handler panicked");
                (EventOutcome::Failed, Some(format!("handler panicked: {join_error}")))
            }
        };

        let mut entry = SyncEventEntry::new(flow_id, event.file_id, event.kind, outcome);
        if let Some(detail) = detail {
            entry = entry.with_detail(detail);
        }
        if let Err(e) = self.repo.save_event(&entry).await {
            warn!(flow_id = %flow_id, error = %e, "Failed to record event outcome");
        }
        if let Err(e) = self.registry.decr_pending(&flow_id).await {
            warn!(flow_id = %flow_id, error = %e, "Failed to release pending event");
        }

        debug!(flow_id = %flow_id, file_id = %event.file_id, kind = %event.kind, outcome = %outcome, "Downstream event handled");
        outcome
    }

    #[instrument(skip(self, event), fields(flow_id = %flow_id, file_id = %event.file_id, kind = %event.kind))]
    async fn apply(&self, flow_id: SyncFlowId, event: &DownstreamEvent) -> anyhow::Result<EventOutcome> {
        let _pair = self.in_flight.lock((flow_id, event.file_id)).await;
        let Some(flow) = self.registry.get(&flow_id).await? else {
            debug!("Flow no longer exists");
            return Ok(EventOutcome::Skipped);
        };

        match event.kind {
            ChangeKind::Created => self.apply_created(&flow, &event.file_id).await,
            ChangeKind::Changed => self.apply_changed(&flow, &event.file_id).await,
            ChangeKind::Deleted => self.apply_deleted(&flow, &event.file_id).await,
        }
    }

    async fn live_source(&self, file: &FileId) -> anyhow::Result<Option<FileRecord>> {
        Ok(self.repo.get_file(file).await?.filter(|r| !r.is_deleted()))
    }

    async fn apply_created(&self, flow: &SyncFlow, file: &FileId) -> anyhow::Result<EventOutcome> {
        let Some(source) = self.live_source(file).await? else {
            return Ok(EventOutcome::Skipped);
        };
        let mapping = self.repo.get_mapping(&flow.id, file).await?;
        if mapping.as_ref().is_some_and(|m| m.desynced) {
            debug!("Mapping is desynced, create ignored");
            return Ok(EventOutcome::Skipped);
        }

        let location = source.location();
        if flow.excludes(&location) {
            if let Some(m) = mapping {
                self.repo.delete_mapping(&m.id).await?;
            }
            debug!(name = %location.name, "File excluded by flow filters");
            return Ok(EventOutcome::Filtered);
        }

        let source_root = self.folder(&flow.source_id).await?;
        let dest_root = self.folder(&flow.destination_id).await?;
        let source_path = source.absolute_path(source_root.path.as_path());
        let dest_path = flow
            .layout
            .destination_path(dest_root.path.as_path(), flow.source_id, &location);
        self.validator.check(&source_root.id, &source_path)?;
        self.validator.check(&dest_root.id, &dest_path)?;

        if !self.fs.get_state(&source_path).await?.is_regular_file() {
            debug!(path = %source_path.display(), "Source file vanished before propagation");
            return Ok(EventOutcome::Skipped);
        }

        // Replays start from scratch
        if let Some(m) = mapping {
            self.repo.delete_mapping(&m.id).await?;
        }

        let dest_location = FileLocation::resolve(&dest_root.path, &dest_path)?;
        let dest_key = key_for_location(dest_root.id, &dest_location);
        let previous = self.repo.get_file_by_key(&dest_root.id, &dest_key).await?;
        let mut dest = match previous.clone() {
            Some(mut record) => {
                record.update_content(source.checksum.clone(), source.modified_at);
                record.desynced = false;
                record
            }
            None => FileRecord::new(
                dest_root.id,
                dest_location,
                source.checksum.clone(),
                source.modified_at,
            ),
        };
        self.repo.save_file(&dest).await?;

        if let Err(e) = self.place_file(flow, &source_path, &dest_path).await {
            self.revert(&dest, previous).await;
            return Err(e);
        }
        self.refresh_mtime(&mut dest, &dest_path).await?;

        self.repo
            .save_mapping(&FileSyncMapping::new(flow.id, source.id, dest.id))
            .await?;
        info!(
            source = %source_path.display(),
            destination = %dest_path.display(),
            hardlink = flow.flow_type.uses_hardlink(),
            "File propagated"
        );

        self.emit(&dest_root, dest.id, ChangeKind::Created).await;
        Ok(EventOutcome::Propagated)
    }

    async fn apply_changed(&self, flow: &SyncFlow, file: &FileId) -> anyhow::Result<EventOutcome> {
        let Some(source) = self.live_source(file).await? else {
            return Ok(EventOutcome::Skipped);
        };
        let Some(mapping) = self.repo.get_mapping(&flow.id, file).await? else {
            debug!("No mapping, change ignored");
            return Ok(EventOutcome::Skipped);
        };
        if mapping.desynced {
            debug!("Mapping is desynced, change ignored");
            return Ok(EventOutcome::Skipped);
        }
        if flow.excludes(&source.location()) {
            self.repo.delete_mapping(&mapping.id).await?;
            info!(name = %source.name, "File now excluded by flow filters, mapping removed");
            return Ok(EventOutcome::Filtered);
        }

        let Some(mut dest) = self
            .repo
            .get_file(&mapping.destination_file_id)
            .await?
            .filter(|r| !r.is_deleted())
        else {
            return Ok(EventOutcome::Skipped);
        };
        if dest.has_content(&source.checksum) {
            return Ok(EventOutcome::AlreadyCurrent);
        }

        let source_root = self.folder(&flow.source_id).await?;
        let dest_root = self.folder(&flow.destination_id).await?;
        let source_path = source.absolute_path(source_root.path.as_path());
        let dest_path = dest.absolute_path(dest_root.path.as_path());
        self.validator.check(&source_root.id, &source_path)?;
        self.validator.check(&dest_root.id, &dest_path)?;

        let previous = dest.clone();
        dest.update_content(source.checksum.clone(), source.modified_at);
        self.repo.save_file(&dest).await?;

        if let Err(e) = self.place_file(flow, &source_path, &dest_path).await {
            self.revert(&dest, Some(previous)).await;
            return Err(e);
        }
        self.refresh_mtime(&mut dest, &dest_path).await?;
        info!(destination = %dest_path.display(), checksum = %dest.checksum, "Change propagated");

        self.emit(&dest_root, dest.id, ChangeKind::Changed).await;
        Ok(EventOutcome::Propagated)
    }

    async fn apply_deleted(&self, flow: &SyncFlow, file: &FileId) -> anyhow::Result<EventOutcome> {
        match self.repo.get_mapping(&flow.id, file).await? {
            Some(mapping) if !mapping.desynced => {
                self.repo.desync_mapping(&mapping.id).await?;
                info!(destination_file_id = %mapping.destination_file_id, "Source deleted, mapping desynced");
                Ok(EventOutcome::Desynced)
            }
            _ => Ok(EventOutcome::Skipped),
        }
    }

    /// Hardlink (first hop) or copy (later hops) `source` onto `destination`
    async fn place_file(&self, flow: &SyncFlow, source: &Path, destination: &Path) -> anyhow::Result<()> {
        if flow.flow_type.uses_hardlink() {
            if self.fs.is_same_file(source, destination).await? {
                return Ok(());
            }
            self.fs.hardlink(source, destination).await
        } else {
            self.fs.copy_file(source, destination).await
        }
    }

    /// Undo a destination record write after a failed placement
    async fn revert(&self, written: &FileRecord, previous: Option<FileRecord>) {
        let result = match previous {
            Some(previous) => self.repo.save_file(&previous).await,
            None => self.repo.purge_file(&written.id).await,
        };
        if let Err(e) = result {
            warn!(file_id = %written.id, error = %e, "Failed to revert destination record");
        }
    }

    /// Store the mtime the destination actually ended up with
    async fn refresh_mtime(&self, record: &mut FileRecord, path: &Path) -> anyhow::Result<()> {
        if let Some(modified) = self.fs.get_state(path).await?.modified {
            let modified = truncate_to_second(modified);
            if record.mtime_differs(modified) {
                record.update_mtime(modified);
                self.repo.save_file(record).await?;
            }
        }
        Ok(())
    }
}
