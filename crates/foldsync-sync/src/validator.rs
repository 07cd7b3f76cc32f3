//! Root-folder access whitelist
//!
//! Every filesystem effect the engine performs is checked against the
//! registered root of the folder it targets. A wrongly computed destination
//! path becomes a rejected operation instead of a write outside the roots.

use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
use foldsync_core::domain::newtypes::RootFolderId;
use tracing::{debug, warn};

use crate::SyncError;

/// Maps root-folder ids to their absolute paths
#[derive(Debug, Default)]
pub struct AccessValidator {
    roots: DashMap<RootFolderId, PathBuf>,
}

impl AccessValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whitelist a folder's root path
    pub fn allow(&self, folder: RootFolderId, root: &Path) {
        debug!(folder_id = %folder, root = %root.display(), "Whitelisting root folder");
        self.roots.insert(folder, root.to_path_buf());
    }

    /// Remove a folder from the whitelist; returns whether it was present
    pub fn revoke(&self, folder: &RootFolderId) -> bool {
        self.roots.remove(folder).is_some()
    }

    /// The whitelisted root for a folder
    pub fn root_of(&self, folder: &RootFolderId) -> Option<PathBuf> {
        self.roots.get(folder).map(|root| root.value().clone())
    }

    /// Number of whitelisted folders
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// True only if `path` is non-blank, has no `..` components and lies
    /// under the registered root of `folder`
    pub fn is_path_valid(&self, folder: &RootFolderId, path: &Path) -> bool {
        if path.to_string_lossy().trim().is_empty() {
            return false;
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        match self.roots.get(folder) {
            Some(root) => path.starts_with(root.value()),
            None => false,
        }
    }

    /// Like [`is_path_valid`](Self::is_path_valid) but returns an error
    ///
    /// # Errors
    /// Returns `SyncError::AccessDenied` if the path is not acceptable
    pub fn check(&self, folder: &RootFolderId, path: &Path) -> Result<(), SyncError> {
        if self.is_path_valid(folder, path) {
            Ok(())
        } else {
            warn!(folder_id = %folder, path = %path.display(), "Rejected path outside whitelisted root");
            Err(SyncError::AccessDenied {
                folder: *folder,
                path: path.to_path_buf(),
            })
        }
    }
}
