//! File events flowing through the engine
//!
//! [`FileEvent`] is what watchers and full scans produce for a root folder.
//! [`DownstreamEvent`] is what the ingress handler produces once a file has a
//! record: it names the record and, once fanned out, the flow it applies to.

use std::fmt;
use std::str::FromStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{FileId, RootFolderId, SyncFlowId};

/// Kind of change, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Changed => "changed",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeKind::Created),
            "changed" => Ok(ChangeKind::Changed),
            "deleted" => Ok(ChangeKind::Deleted),
            _ => Err(DomainError::UnknownVariant {
                kind: "change kind",
                value: s.to_string(),
            }),
        }
    }
}

/// A raw change observed under a root folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created {
        root_folder_id: RootFolderId,
        path: PathBuf,
    },
    Changed {
        root_folder_id: RootFolderId,
        path: PathBuf,
    },
    Deleted {
        root_folder_id: RootFolderId,
        /// None when only the stale record is known
        path: Option<PathBuf>,
        stale_record: Option<FileId>,
    },
}

impl FileEvent {
    pub fn created(root_folder_id: RootFolderId, path: impl Into<PathBuf>) -> Self {
        FileEvent::Created {
            root_folder_id,
            path: path.into(),
        }
    }

    pub fn changed(root_folder_id: RootFolderId, path: impl Into<PathBuf>) -> Self {
        FileEvent::Changed {
            root_folder_id,
            path: path.into(),
        }
    }

    pub fn deleted(root_folder_id: RootFolderId, path: impl Into<PathBuf>) -> Self {
        FileEvent::Deleted {
            root_folder_id,
            path: Some(path.into()),
            stale_record: None,
        }
    }

    pub fn root_folder_id(&self) -> RootFolderId {
        match self {
            FileEvent::Created { root_folder_id, .. }
            | FileEvent::Changed { root_folder_id, .. }
            | FileEvent::Deleted { root_folder_id, .. } => *root_folder_id,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            FileEvent::Created { path, .. } | FileEvent::Changed { path, .. } => Some(path),
            FileEvent::Deleted { path, .. } => path.as_deref(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            FileEvent::Created { .. } => ChangeKind::Created,
            FileEvent::Changed { .. } => ChangeKind::Changed,
            FileEvent::Deleted { .. } => ChangeKind::Deleted,
        }
    }
}

/// A propagation request for one source file record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamEvent {
    /// Bound when the event is fanned out to a flow's queue
    pub flow_id: Option<SyncFlowId>,
    /// Folder the file record belongs to (the flow's source)
    pub source_folder_id: RootFolderId,
    pub file_id: FileId,
    pub kind: ChangeKind,
}

impl DownstreamEvent {
    /// An event not yet bound to a flow
    pub fn new(source_folder_id: RootFolderId, file_id: FileId, kind: ChangeKind) -> Self {
        Self {
            flow_id: None,
            source_folder_id,
            file_id,
            kind,
        }
    }

    /// Copy of this event bound to `flow_id`
    #[must_use]
    pub fn for_flow(&self, flow_id: SyncFlowId) -> Self {
        Self {
            flow_id: Some(flow_id),
            ..self.clone()
        }
    }
}
