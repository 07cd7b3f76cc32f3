//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface the engine uses to inspect files and
//! apply propagation effects (hardlink, copy) to the local filesystem.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - The port performs no access checks; callers validate every path
//!   against the whitelist of registered roots before calling a mutating
//!   operation.
//! - Change watching lives in the sync crate's watcher, not here.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::newtypes::Checksum;

// ============================================================================
// FileSystemState struct
// ============================================================================

/// Snapshot of a path's state on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSystemState {
    /// Whether the path exists on disk
    pub exists: bool,
    /// Whether this is a regular file
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent paths)
    pub size: u64,
    /// Last content modification time
    pub modified: Option<DateTime<Utc>>,
    /// Last status change time (ctime), where the platform reports one
    pub changed: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
            changed: None,
        }
    }

    /// Returns true if the path exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }
}

// ============================================================================
// ILocalFileSystem trait
// ============================================================================

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Gets the current state of a path
    ///
    /// Returns `FileSystemState::not_found()` for missing paths rather than
    /// an error.
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState>;

    /// Computes the MD5 checksum of a file's content
    async fn compute_checksum(&self, path: &Path) -> anyhow::Result<Checksum>;

    /// Lists every regular file below `root`, recursively
    async fn list_files(&self, root: &Path) -> anyhow::Result<Vec<PathBuf>>;

    /// Whether two paths refer to the same underlying file (same inode)
    async fn is_same_file(&self, a: &Path, b: &Path) -> anyhow::Result<bool>;

    /// Hardlinks `source` at `destination`, replacing any existing file there
    ///
    /// Parent directories of `destination` are created as needed.
    async fn hardlink(&self, source: &Path, destination: &Path) -> anyhow::Result<()>;

    /// Copies `source` onto `destination` atomically, replacing any existing
    /// file there
    ///
    /// Parent directories of `destination` are created as needed.
    async fn copy_file(&self, source: &Path, destination: &Path) -> anyhow::Result<()>;
}
