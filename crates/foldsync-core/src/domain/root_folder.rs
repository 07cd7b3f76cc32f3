//! Root folder entity
//!
//! A root folder is a directory tree the daemon tracks. Its role decides how
//! it participates in flows: SOURCE folders are user-owned inputs, INTERNAL
//! folders are hardlinked staging copies, CONTENT folders are final outputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{FolderPath, RootFolderId};
use super::record::Auditable;

/// Role of a root folder in the propagation chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderRole {
    Source,
    Internal,
    Content,
}

impl FolderRole {
    /// Stable lowercase name used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderRole::Source => "source",
            FolderRole::Internal => "internal",
            FolderRole::Content => "content",
        }
    }

    /// Whether the folder is observed by a watcher and full scans
    ///
    /// INTERNAL folders are written only by the engine.
    pub fn is_observable(&self) -> bool {
        !matches!(self, FolderRole::Internal)
    }
}

impl fmt::Display for FolderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FolderRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(FolderRole::Source),
            "internal" => Ok(FolderRole::Internal),
            "content" => Ok(FolderRole::Content),
            _ => Err(DomainError::UnknownVariant {
                kind: "folder role",
                value: s.to_string(),
            }),
        }
    }
}

/// A registered root folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFolder {
    pub id: RootFolderId,
    pub name: String,
    pub path: FolderPath,
    pub role: FolderRole,
    pub audit: Auditable,
}

impl RootFolder {
    /// Create a new root folder record
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` if the name is blank
    pub fn new(name: impl Into<String>, path: FolderPath, role: FolderRole) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "Root folder name cannot be blank".to_string(),
            ));
        }
        Ok(Self {
            id: RootFolderId::new(),
            name,
            path,
            role,
            audit: Auditable::new(),
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.audit.deleted
    }
}
