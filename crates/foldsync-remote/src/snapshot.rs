//! Snapshot runner for a restic style backup CLI
//!
//! Runs `<binary> -r <repository> [--password-file <file>] backup --json <path>`
//! and reads the JSON-lines progress stream it prints. The last line with
//! `"message_type": "summary"` carries the snapshot id and statistics.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use foldsync_core::config::SnapshotConfig;
use foldsync_core::ports::{ISnapshotService, SnapshotSummary};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::RemoteError;

/// Backs up folders into one snapshot repository
#[derive(Debug, Clone)]
pub struct ResticSnapshot {
    binary: String,
    repository: String,
    password_file: Option<PathBuf>,
}

impl ResticSnapshot {
    pub fn new(binary: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            repository: repository.into(),
            password_file: None,
        }
    }

    #[must_use]
    pub fn with_password_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.password_file = Some(path.into());
        self
    }

    /// Build from the `snapshot` configuration section
    ///
    /// # Errors
    /// Returns `RemoteError::SnapshotFailed` if no repository is configured
    pub fn from_config(config: &SnapshotConfig) -> Result<Self, RemoteError> {
        let repository = config
            .repository
            .clone()
            .ok_or_else(|| RemoteError::SnapshotFailed("no snapshot repository configured".to_string()))?;
        let runner = Self::new(config.binary.clone(), repository);
        Ok(match &config.password_file {
            Some(file) => runner.with_password_file(file),
            None => runner,
        })
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-r").arg(&self.repository);
        if let Some(file) = &self.password_file {
            cmd.arg("--password-file").arg(file);
        }
        cmd.arg("backup").arg("--json").arg(path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run one backup of `path`
    ///
    /// # Errors
    /// Returns `RemoteError::SnapshotFailed` if the tool cannot be started or
    /// exits unsuccessfully, `RemoteError::InvalidResponse` if it printed no
    /// summary
    #[instrument(skip(self), fields(path = %path.display(), repository = %self.repository))]
    pub async fn run_backup(&self, path: &Path) -> Result<SnapshotSummary, RemoteError> {
        let output = self
            .command(path)
            .output()
            .await
            .map_err(|e| RemoteError::SnapshotFailed(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            warn!(status = %output.status, reason, "Snapshot tool failed");
            return Err(RemoteError::SnapshotFailed(format!(
                "{} exited with {}: {}",
                self.binary, output.status, reason
            )));
        }

        let summary = parse_summary(&String::from_utf8_lossy(&output.stdout))?;
        info!(snapshot_id = ?summary.snapshot_id, "Snapshot completed");
        Ok(summary)
    }
}

/// Extract the final summary message from a JSON-lines stream
fn parse_summary(stdout: &str) -> Result<SnapshotSummary, RemoteError> {
    for line in stdout.lines().rev() {
        let Ok(message) = serde_json::from_str::<Value>(line) else {
            debug!(line, "Skipping non-JSON output line");
            continue;
        };
        if message.get("message_type").and_then(Value::as_str) != Some("summary") {
            continue;
        }
        let snapshot_id = message
            .get("snapshot_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(SnapshotSummary {
            snapshot_id,
            stats: message,
        });
    }
    Err(RemoteError::InvalidResponse(
        "snapshot tool printed no summary".to_string(),
    ))
}

#[async_trait::async_trait]
impl ISnapshotService for ResticSnapshot {
    async fn backup(&self, path: &Path) -> anyhow::Result<SnapshotSummary> {
        self.run_backup(path)
            .await
            .with_context(|| format!("Failed to snapshot {}", path.display()))
    }
}
