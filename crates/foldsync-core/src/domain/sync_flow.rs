//! Sync flow entity and its value types
//!
//! A sync flow is a one-way propagation rule from a source root folder to a
//! destination root folder. Chains are built from two hops:
//!
//! ```text
//!   SOURCE ──(source_to_internal, hardlink)──► INTERNAL ──(internal_to_content, copy)──► CONTENT
//! ```
//!
//! ## Status machine
//!
//! ```text
//!                 pending 0 → 1
//!   ┌──────────┐ ─────────────► ┌──────────┐
//!   │   SYNC   │                │ NOT_SYNC │
//!   └──────────┘ ◄───────────── └──────────┘
//!        ▲   │    pending 1 → 0      │
//!        │   │ bulk job              │ pause / resume
//!        │   ▼                       ▼
//!   ┌──────────┐               ┌──────────┐
//!   │ RUNNING  │               │  PAUSE   │
//!   └──────────┘               └──────────┘
//! ```
//!
//! Counter edges never move a flow out of PAUSE; resuming recomputes the
//! status from the counter.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::identity::{flatten_name, FileLocation};
use super::newtypes::{RootFolderId, SyncFlowId};
use super::record::Auditable;
use super::root_folder::FolderRole;

// ============================================================================
// FlowType
// ============================================================================

/// Which hop of the chain a flow implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    SourceToInternal,
    InternalToContent,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::SourceToInternal => "source_to_internal",
            FlowType::InternalToContent => "internal_to_content",
        }
    }

    /// Role the flow's source folder must have
    pub fn source_role(&self) -> FolderRole {
        match self {
            FlowType::SourceToInternal => FolderRole::Source,
            FlowType::InternalToContent => FolderRole::Internal,
        }
    }

    /// Role the flow's destination folder must have
    pub fn destination_role(&self) -> FolderRole {
        match self {
            FlowType::SourceToInternal => FolderRole::Internal,
            FlowType::InternalToContent => FolderRole::Content,
        }
    }

    /// First hop files are hardlinked, later hops are copied
    pub fn uses_hardlink(&self) -> bool {
        matches!(self, FlowType::SourceToInternal)
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source_to_internal" => Ok(FlowType::SourceToInternal),
            "internal_to_content" => Ok(FlowType::InternalToContent),
            _ => Err(DomainError::UnknownVariant {
                kind: "flow type",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// FlowStatus
// ============================================================================

/// Reported synchronization status of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Work is queued or in flight
    NotSync,
    /// A bulk transfer job is running
    Running,
    /// No pending work
    Sync,
    /// Downstream queue is held until resumed
    Pause,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::NotSync => "not_sync",
            FlowStatus::Running => "running",
            FlowStatus::Sync => "sync",
            FlowStatus::Pause => "pause",
        }
    }

    /// Status implied by a pending-event count
    pub fn for_pending(pending: i64) -> Self {
        if pending > 0 {
            FlowStatus::NotSync
        } else {
            FlowStatus::Sync
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "not_sync" => Ok(FlowStatus::NotSync),
            "running" => Ok(FlowStatus::Running),
            "sync" => Ok(FlowStatus::Sync),
            "pause" => Ok(FlowStatus::Pause),
            _ => Err(DomainError::UnknownVariant {
                kind: "flow status",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// LayoutMode
// ============================================================================

/// How destination paths are derived from source paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Keep the relative directory structure
    #[default]
    Mirror,
    /// Put every file directly in the destination root under a generated name
    Flatten,
}

impl LayoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutMode::Mirror => "mirror",
            LayoutMode::Flatten => "flatten",
        }
    }

    /// Destination path for a source file
    #[must_use]
    pub fn destination_path(
        &self,
        destination_root: &Path,
        source_root: RootFolderId,
        location: &FileLocation,
    ) -> PathBuf {
        match self {
            LayoutMode::Mirror => location.absolute_under(destination_root),
            LayoutMode::Flatten => destination_root.join(flatten_name(source_root, location)),
        }
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mirror" => Ok(LayoutMode::Mirror),
            "flatten" => Ok(LayoutMode::Flatten),
            _ => Err(DomainError::UnknownVariant {
                kind: "layout mode",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// FilterCriteria
// ============================================================================

/// Exclusion filters: a file is excluded if its name or extension contains
/// any criterion (case-insensitive)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterCriteria(Vec<String>);

impl FilterCriteria {
    /// Build from raw criteria; blank entries are dropped
    #[must_use]
    pub fn new(criteria: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let criteria: Vec<String> = criteria.into_iter().map(Into::into).collect();
        Self(criteria.into_iter().filter(|c| !c.trim().is_empty()).collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a file with this name/extension is filtered out
    #[must_use]
    pub fn excludes(&self, name: &str, extension: Option<&str>) -> bool {
        let name = name.to_lowercase();
        let extension = extension.map(str::to_lowercase);
        self.0.iter().any(|criterion| {
            let criterion = criterion.to_lowercase();
            name.contains(&criterion)
                || extension.as_deref().is_some_and(|ext| ext.contains(&criterion))
        })
    }
}

// ============================================================================
// SyncFlow
// ============================================================================

/// A one-way propagation rule between two root folders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFlow {
    pub id: SyncFlowId,
    pub name: String,
    pub source_id: RootFolderId,
    pub destination_id: RootFolderId,
    pub flow_type: FlowType,
    pub status: FlowStatus,
    pub last_sync: Option<DateTime<Utc>>,
    pub filters: FilterCriteria,
    pub layout: LayoutMode,
    pub audit: Auditable,
}

impl SyncFlow {
    /// Create a new flow, initially `NOT_SYNC`
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` if the name is blank or source
    /// and destination are the same folder
    pub fn new(
        name: impl Into<String>,
        source_id: RootFolderId,
        destination_id: RootFolderId,
        flow_type: FlowType,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "Sync flow name cannot be blank".to_string(),
            ));
        }
        if source_id == destination_id {
            return Err(DomainError::ValidationFailed(
                "Sync flow source and destination must differ".to_string(),
            ));
        }
        Ok(Self {
            id: SyncFlowId::new(),
            name,
            source_id,
            destination_id,
            flow_type,
            status: FlowStatus::NotSync,
            last_sync: None,
            filters: FilterCriteria::default(),
            layout: LayoutMode::default(),
            audit: Auditable::new(),
        })
    }

    #[must_use]
    pub fn with_layout(mut self, layout: LayoutMode) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: FilterCriteria) -> Self {
        self.filters = filters;
        self
    }

    /// Apply a status; reaching `SYNC` stamps `last_sync`
    pub fn set_status(&mut self, status: FlowStatus) {
        self.status = status;
        if status == FlowStatus::Sync {
            self.last_sync = Some(Utc::now());
        }
        self.audit.touch();
    }

    pub fn is_paused(&self) -> bool {
        self.status == FlowStatus::Pause
    }

    pub fn is_deleted(&self) -> bool {
        self.audit.deleted
    }

    /// Whether a file location is filtered out by this flow
    #[must_use]
    pub fn excludes(&self, location: &FileLocation) -> bool {
        self.filters
            .excludes(&location.name, location.extension.as_deref())
    }
}
