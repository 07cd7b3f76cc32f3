//! Full-scan and cross-folder reconciliation
//!
//! A full scan diffs one root folder's live records against the files on
//! disk, joined on the identity key, and feeds the differences into the
//! ingress queue as synthetic events, exactly as the watcher would. Records
//! whose file is gone are purged outright; nothing is propagated for them.
//!
//! The cross-folder check walks a flow's source records against their
//! mappings to find propagation gaps a per-folder scan cannot see, and
//! queues the missing downstream events on that flow.

use std::collections::HashMap;
use std::sync::Arc;

use foldsync_core::domain::identity::{key_for_location, truncate_to_second};
use foldsync_core::domain::newtypes::{FileId, RootFolderId, SyncFlowId, UniqueKey};
use foldsync_core::domain::{
    ChangeKind, DownstreamEvent, FileEvent, FileLocation, FileRecord, FlowStatus, FolderRole,
    RootFolder, SyncFlow,
};
use foldsync_core::ports::{ILocalFileSystem, IStateRepository, PageRequest};
use tracing::{debug, info, instrument, warn};

use crate::bus::EventBus;
use crate::folders::RootFolderRegistry;
use crate::SyncError;

// ============================================================================
// Reports
// ============================================================================

/// Result of one full scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub folder_id: Option<RootFolderId>,
    /// Synthetic `Created` events queued
    pub created: usize,
    /// Synthetic `Changed` events queued
    pub changed: usize,
    /// Stale records removed
    pub purged: usize,
    pub unchanged: usize,
}

impl ScanReport {
    /// True when the scan found nothing to correct
    pub fn in_sync(&self) -> bool {
        self.created == 0 && self.changed == 0 && self.purged == 0
    }
}

/// Result of one cross-folder check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossCheckReport {
    pub flow_id: Option<SyncFlowId>,
    /// Source files with no (or a lost) destination, re-queued as `Created`
    pub missing: usize,
    /// Destinations behind their source, re-queued as `Changed`
    pub changed: usize,
    /// Mappings desynced because their destination disappeared
    pub desynced: usize,
}

impl CrossCheckReport {
    pub fn in_sync(&self) -> bool {
        self.missing == 0 && self.changed == 0 && self.desynced == 0
    }
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler {
    repo: Arc<dyn IStateRepository>,
    fs: Arc<dyn ILocalFileSystem>,
    bus: Arc<EventBus>,
    folders: Arc<RootFolderRegistry>,
    page_size: u32,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn IStateRepository>,
        fs: Arc<dyn ILocalFileSystem>,
        bus: Arc<EventBus>,
        folders: Arc<RootFolderRegistry>,
        page_size: u32,
    ) -> Self {
        Self {
            repo,
            fs,
            bus,
            folders,
            page_size: page_size.max(1),
        }
    }

    /// Every live record of a folder, paged
    async fn load_records(&self, folder: &RootFolderId) -> anyhow::Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        let mut page = PageRequest::first(self.page_size);
        loop {
            let batch = self.repo.list_files_page(folder, page).await?;
            let done = batch.len() < self.page_size as usize;
            records.extend(batch);
            if done {
                return Ok(records);
            }
            page = page.next();
        }
    }

    /// Diff a folder against its records and queue the differences
    ///
    /// Internal folders are skipped and reported in sync.
    ///
    /// # Errors
    /// Returns an error if the folder cannot be listed or the store fails
    #[instrument(skip(self, folder), fields(folder_id = %folder.id, path = %folder.path))]
    pub async fn full_scan(&self, folder: &RootFolder) -> anyhow::Result<ScanReport> {
        let mut report = ScanReport {
            folder_id: Some(folder.id),
            ..ScanReport::default()
        };
        if folder.role == FolderRole::Internal {
            debug!("Internal folder, full scan skipped");
            return Ok(report);
        }

        let mut known: HashMap<UniqueKey, FileRecord> = self
            .load_records(&folder.id)
            .await?
            .into_iter()
            .map(|r| (r.unique_key.clone(), r))
            .collect();

        for path in self.fs.list_files(folder.path.as_path()).await? {
            let location = match FileLocation::resolve(&folder.path, &path) {
                Ok(location) => location,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unresolvable path");
                    continue;
                }
            };
            let key = key_for_location(folder.id, &location);

            let Some(record) = known.remove(&key) else {
                self.bus.push_ingress(FileEvent::created(folder.id, path));
                report.created += 1;
                continue;
            };

            let state = self.fs.get_state(&path).await?;
            let mtime_moved = state
                .modified
                .is_some_and(|m| record.mtime_differs(truncate_to_second(m)));
            let differs = mtime_moved || !record.has_content(&self.fs.compute_checksum(&path).await?);
            if differs {
                self.bus.push_ingress(FileEvent::changed(folder.id, path));
                report.changed += 1;
            } else {
                report.unchanged += 1;
            }
        }

        for (key, stale) in known {
            self.repo.purge_file(&stale.id).await?;
            debug!(key = %key, "Purged record of missing file");
            report.purged += 1;
        }

        if report.in_sync() {
            debug!(unchanged = report.unchanged, "Folder in sync");
        } else {
            info!(
                created = report.created,
                changed = report.changed,
                purged = report.purged,
                unchanged = report.unchanged,
                "Full scan found drift"
            );
        }
        Ok(report)
    }

    /// Compare a flow's source records against their destinations
    ///
    /// Flows running a bulk transfer are left alone.
    ///
    /// # Errors
    /// Returns an error if a folder is unknown or the store fails
    #[instrument(skip(self, flow), fields(flow_id = %flow.id))]
    pub async fn cross_check(&self, flow: &SyncFlow) -> anyhow::Result<CrossCheckReport> {
        let mut report = CrossCheckReport {
            flow_id: Some(flow.id),
            ..CrossCheckReport::default()
        };
        if flow.status == FlowStatus::Running {
            debug!("Bulk transfer running, cross check skipped");
            return Ok(report);
        }

        let source_root = self
            .folders
            .get(&flow.source_id)
            .await?
            .ok_or(SyncError::UnknownFolder(flow.source_id))?;
        let dest_root = self
            .folders
            .get(&flow.destination_id)
            .await?
            .ok_or(SyncError::UnknownFolder(flow.destination_id))?;

        for source in self.load_records(&source_root.id).await? {
            if flow.excludes(&source.location()) {
                continue;
            }
            let Some(mapping) = self.repo.get_mapping(&flow.id, &source.id).await? else {
                self.queue(flow, &source_root, source.id, ChangeKind::Created).await?;
                report.missing += 1;
                continue;
            };
            if mapping.desynced {
                continue;
            }

            let dest = self
                .repo
                .get_file(&mapping.destination_file_id)
                .await?
                .filter(|r| !r.is_deleted());
            let on_disk = match &dest {
                Some(d) => self
                    .fs
                    .get_state(&d.absolute_path(dest_root.path.as_path()))
                    .await?
                    .is_regular_file(),
                None => false,
            };

            match dest {
                Some(dest) if on_disk => {
                    if !dest.has_content(&source.checksum) {
                        self.queue(flow, &source_root, source.id, ChangeKind::Changed).await?;
                        report.changed += 1;
                    }
                }
                // Internal copies are ours alone; anything else lost there is restored
                _ if dest_root.role == FolderRole::Internal => {
                    self.queue(flow, &source_root, source.id, ChangeKind::Created).await?;
                    report.missing += 1;
                }
                _ => {
                    if self.repo.desync_mapping(&mapping.id).await? {
                        report.desynced += 1;
                    }
                }
            }
        }

        if !report.in_sync() {
            info!(
                missing = report.missing,
                changed = report.changed,
                desynced = report.desynced,
                "Cross check found propagation gaps"
            );
        }
        Ok(report)
    }

    async fn queue(
        &self,
        flow: &SyncFlow,
        source_root: &RootFolder,
        file: FileId,
        kind: ChangeKind,
    ) -> anyhow::Result<()> {
        self.bus
            .push_downstream(DownstreamEvent::new(source_root.id, file, kind).for_flow(flow.id))
            .await?;
        Ok(())
    }
}
