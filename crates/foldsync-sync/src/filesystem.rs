//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Atomic placement**: hardlinks and copies are first created under a
//!   staging name in the destination directory and then renamed over the
//!   target, so a watcher never observes a half-written file.
//! - **Staging names**: `.foldsync-<random>.tmp`. Watchers and scans skip
//!   them via [`is_staging_file`].
//! - **MD5**: streamed from a blocking thread in fixed-size chunks so large
//!   files are never read into memory at once.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use foldsync_core::{
    domain::newtypes::Checksum,
    ports::local_filesystem::{FileSystemState, ILocalFileSystem},
};
use rand::Rng;
use tracing::{debug, instrument, warn};

/// Prefix of staging files created while placing a destination file
const STAGING_PREFIX: &str = ".foldsync-";

/// Suffix of staging files
const STAGING_SUFFIX: &str = ".tmp";

/// Read buffer for checksum computation
const CHECKSUM_CHUNK: usize = 64 * 1024;

// ============================================================================
// LocalFileSystemAdapter struct
// ============================================================================

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// Zero-sized: every operation takes absolute paths. Access checks happen in
/// the engine before any mutating call reaches this adapter.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Whether `path` names one of our own staging files
pub fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(STAGING_PREFIX) && n.ends_with(STAGING_SUFFIX))
        .unwrap_or(false)
}

/// Staging path next to `target`, on the same filesystem so rename is atomic
fn staging_path(target: &Path) -> PathBuf {
    let token: u64 = rand::rng().random();
    let name = format!("{}{:016x}{}", STAGING_PREFIX, token, STAGING_SUFFIX);
    match target.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

fn system_time_to_utc(time: std::time::SystemTime) -> Option<DateTime<Utc>> {
    let dur = time.duration_since(std::time::UNIX_EPOCH).ok()?;
    DateTime::from_timestamp(i64::try_from(dur.as_secs()).ok()?, dur.subsec_nanos())
}

#[cfg(unix)]
fn status_change_time(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;
    let nanos = u32::try_from(metadata.ctime_nsec()).ok()?;
    DateTime::from_timestamp(metadata.ctime(), nanos)
}

#[cfg(not(unix))]
fn status_change_time(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.created().ok().and_then(system_time_to_utc)
}

async fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Rename `staged` over `target`, removing the staging file on failure
async fn commit_staged(staged: &Path, target: &Path) -> anyhow::Result<()> {
    if let Err(e) = tokio::fs::rename(staged, target).await {
        if let Err(cleanup) = tokio::fs::remove_file(staged).await {
            warn!(path = %staged.display(), error = %cleanup, "Failed to remove staging file");
        }
        return Err(e.into());
    }
    Ok(())
}

// ============================================================================
// ILocalFileSystem implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(FileSystemState {
            exists: true,
            is_file: metadata.is_file(),
            size: metadata.len(),
            modified: metadata.modified().ok().and_then(system_time_to_utc),
            changed: status_change_time(&metadata),
        })
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn compute_checksum(&self, path: &Path) -> anyhow::Result<Checksum> {
        let owned = path.to_path_buf();
        let digest = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut file = std::fs::File::open(&owned)?;
            let mut context = md5::Context::new();
            let mut buffer = vec![0u8; CHECKSUM_CHUNK];
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                context.consume(&buffer[..read]);
            }
            Ok(format!("{:x}", context.compute()))
        })
        .await??;

        debug!(checksum = %digest, "checksum computed");
        Ok(Checksum::new(digest)?)
    }

    async fn list_files(&self, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound && dir != root => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && !is_staging_file(&path) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn is_same_file(&self, a: &Path, b: &Path) -> anyhow::Result<bool> {
        let (meta_a, meta_b) = match (tokio::fs::metadata(a).await, tokio::fs::metadata(b).await) {
            (Ok(ma), Ok(mb)) => (ma, mb),
            (Err(e), _) | (_, Err(e)) if e.kind() == ErrorKind::NotFound => return Ok(false),
            (Err(e), _) | (_, Err(e)) => return Err(e.into()),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Ok(meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino())
        }

        #[cfg(not(unix))]
        {
            let _ = (meta_a, meta_b);
            Ok(false)
        }
    }

    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    async fn hardlink(&self, source: &Path, destination: &Path) -> anyhow::Result<()> {
        ensure_parent(destination).await?;

        let staged = staging_path(destination);
        tokio::fs::hard_link(source, &staged).await?;
        commit_staged(&staged, destination).await?;

        debug!("hardlink placed");
        Ok(())
    }

    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    async fn copy_file(&self, source: &Path, destination: &Path) -> anyhow::Result<()> {
        ensure_parent(destination).await?;

        let staged = staging_path(destination);
        if let Err(e) = tokio::fs::copy(source, &staged).await {
            // A partial staging file may have been left behind
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }
        commit_staged(&staged, destination).await?;

        debug!("copy placed");
        Ok(())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
