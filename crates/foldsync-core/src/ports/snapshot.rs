//! Snapshot service port
//!
//! Backs up a folder to an external snapshot repository.

use std::path::Path;

use serde_json::Value;

/// Summary of a completed backup
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    /// Snapshot identifier assigned by the tool
    pub snapshot_id: Option<String>,
    /// Raw summary statistics reported by the tool
    pub stats: Value,
}

/// Port trait for the snapshot collaborator
#[async_trait::async_trait]
pub trait ISnapshotService: Send + Sync {
    /// Take a snapshot of `path`
    async fn backup(&self, path: &Path) -> anyhow::Result<SnapshotSummary>;
}
