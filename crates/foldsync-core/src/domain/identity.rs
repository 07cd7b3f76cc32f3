//! File identity and path utilities
//!
//! Pure functions that turn an absolute file path under a root folder into
//! the pieces stored on a [`FileRecord`](super::FileRecord): relative
//! directory, name, extension, and the identity key used to match
//! filesystem entries with persisted records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sha2::{Digest, Sha256};

use super::errors::DomainError;
use super::newtypes::{normalize_path, FolderPath, RootFolderId, UniqueKey};

/// Number of hex digits of the path hash used in flattened names
pub const FLATTEN_TOKEN_LEN: usize = 16;

/// Where a file sits relative to its root folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    /// Directory relative to the root, `/`-separated, empty at the root
    pub directory: String,
    /// File name including extension
    pub name: String,
    /// Extension without the dot, if any
    pub extension: Option<String>,
}

impl FileLocation {
    /// Split an absolute file path into its location under `root`
    ///
    /// # Errors
    /// - `DomainError::InvalidPath` if the path is blank, relative, not UTF-8,
    ///   or is the root itself
    /// - `DomainError::PathNotInRoot` if the path is outside `root`
    pub fn resolve(root: &FolderPath, file: &Path) -> Result<Self, DomainError> {
        if file.as_os_str().is_empty() || !file.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "File path must be absolute: {}",
                file.display()
            )));
        }

        let normalized = normalize_path(file)?;
        let relative = normalized.strip_prefix(root.as_path()).map_err(|_| {
            DomainError::PathNotInRoot(format!("{} is not within {}", file.display(), root))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            let part = component.as_os_str().to_str().ok_or_else(|| {
                DomainError::InvalidPath(format!("Path is not valid UTF-8: {}", file.display()))
            })?;
            parts.push(part.to_string());
        }

        let name = parts.pop().ok_or_else(|| {
            DomainError::InvalidPath(format!("Path names the root folder itself: {}", file.display()))
        })?;
        let extension = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string);

        Ok(Self {
            directory: parts.join("/"),
            name,
            extension,
        })
    }

    /// Relative path of the file (directory plus name), `/`-separated
    #[must_use]
    pub fn relative_path(&self) -> String {
        if self.directory.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.directory, self.name)
        }
    }

    /// Absolute path of this location under `root`
    #[must_use]
    pub fn absolute_under(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for part in self.directory.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.push(&self.name);
        path
    }

    /// File name without the extension
    #[must_use]
    pub fn stem(&self) -> &str {
        match &self.extension {
            Some(ext) => self
                .name
                .strip_suffix(ext.as_str())
                .and_then(|s| s.strip_suffix('.'))
                .unwrap_or(&self.name),
            None => &self.name,
        }
    }
}

/// Derive the identity key of `file` under the root folder `(root_id, root_path)`
///
/// The key is `<root id>:<relative path>`: deterministic, stable across
/// restarts and unique per folder as long as relative paths are.
///
/// # Errors
/// Propagates path validation errors from [`FileLocation::resolve`]
pub fn unique_key(
    root_id: RootFolderId,
    root_path: &FolderPath,
    file: &Path,
) -> Result<UniqueKey, DomainError> {
    let location = FileLocation::resolve(root_path, file)?;
    Ok(key_for_location(root_id, &location))
}

/// Identity key for an already-resolved location
#[must_use]
pub fn key_for_location(root_id: RootFolderId, location: &FileLocation) -> UniqueKey {
    UniqueKey(format!("{}:{}", root_id, location.relative_path()))
}

/// Generate the flat destination name for a file from `source_root`
///
/// Format: `<stem>-<token>[.<ext>]`, where the token is the first
/// [`FLATTEN_TOKEN_LEN`] hex digits of SHA-256 over
/// `<source root id>/<relative path>`. The same source file always gets the
/// same name; two source files (even with identical names, or in different
/// source folders) differ unless their 64-bit tokens collide.
#[must_use]
pub fn flatten_name(source_root: RootFolderId, location: &FileLocation) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_root.to_string().as_bytes());
    hasher.update(b"/");
    hasher.update(location.relative_path().as_bytes());
    let digest = hasher.finalize();

    let token: String = digest
        .iter()
        .flat_map(|b| [b >> 4, b & 0x0f])
        .take(FLATTEN_TOKEN_LEN)
        .map(|nibble| char::from_digit(u32::from(nibble), 16).unwrap_or('0'))
        .collect();

    match &location.extension {
        Some(ext) => format!("{}-{}.{}", location.stem(), token, ext),
        None => format!("{}-{}", location.stem(), token),
    }
}

/// Truncate a timestamp to whole seconds
///
/// Filesystems differ in timestamp precision; comparisons between stored
/// and observed mtimes always happen at second granularity.
#[must_use]
pub fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::seconds(1)).unwrap_or(ts)
}
