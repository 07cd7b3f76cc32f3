//! File record entity
//!
//! One record per file observed under a root folder. Records are created on
//! first observation, updated in place when content changes, and only ever
//! soft-deleted when the file disappears. Reconciliation is the one place a
//! record is physically removed (stale rows with no file behind them).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::{key_for_location, truncate_to_second, FileLocation};
use super::newtypes::{Checksum, FileId, RootFolderId, UniqueKey};
use super::record::Auditable;

/// Persisted state of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub root_folder_id: RootFolderId,
    /// Directory relative to the root folder, `/`-separated
    pub directory: String,
    /// File name including extension
    pub name: String,
    pub extension: Option<String>,
    pub checksum: Checksum,
    pub modified_at: DateTime<Utc>,
    pub unique_key: UniqueKey,
    /// Set when the file diverged from the source it was propagated from
    pub desynced: bool,
    pub audit: Auditable,
}

impl FileRecord {
    /// Create a record for a newly observed file
    #[must_use]
    pub fn new(
        root_folder_id: RootFolderId,
        location: FileLocation,
        checksum: Checksum,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let unique_key = key_for_location(root_folder_id, &location);
        Self {
            id: FileId::new(),
            root_folder_id,
            directory: location.directory,
            name: location.name,
            extension: location.extension,
            checksum,
            modified_at,
            unique_key,
            desynced: false,
            audit: Auditable::new(),
        }
    }

    /// Location of the file relative to its root folder
    #[must_use]
    pub fn location(&self) -> FileLocation {
        FileLocation {
            directory: self.directory.clone(),
            name: self.name.clone(),
            extension: self.extension.clone(),
        }
    }

    /// Absolute path of the file given its root folder's path
    #[must_use]
    pub fn absolute_path(&self, root: &Path) -> PathBuf {
        self.location().absolute_under(root)
    }

    pub fn is_deleted(&self) -> bool {
        self.audit.deleted
    }

    /// Whether the stored content fingerprint matches `checksum`
    #[must_use]
    pub fn has_content(&self, checksum: &Checksum) -> bool {
        &self.checksum == checksum
    }

    /// Whether the observed mtime differs at second granularity
    #[must_use]
    pub fn mtime_differs(&self, modified_at: DateTime<Utc>) -> bool {
        truncate_to_second(self.modified_at) != truncate_to_second(modified_at)
    }

    /// Record new content
    pub fn update_content(&mut self, checksum: Checksum, modified_at: DateTime<Utc>) {
        self.checksum = checksum;
        self.modified_at = modified_at;
        self.audit.touch();
    }

    /// Record a new mtime without touching content
    pub fn update_mtime(&mut self, modified_at: DateTime<Utc>) {
        self.modified_at = modified_at;
        self.audit.touch();
    }

    /// Soft-delete: the file is gone but the record stays for mappings
    pub fn mark_deleted(&mut self) {
        self.audit.mark_deleted();
    }

    pub fn mark_desynced(&mut self) {
        self.desynced = true;
        self.audit.touch();
    }
}
