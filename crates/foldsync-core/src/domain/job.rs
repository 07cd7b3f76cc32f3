//! Collaborator job records
//!
//! Bulk copies, one-way checks and snapshots run outside the engine. Their
//! progress and failures are captured here instead of being raised into the
//! event loop.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::DomainError;
use super::newtypes::{JobId, SyncFlowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    BulkCopy,
    Check,
    Snapshot,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::BulkCopy => "bulk_copy",
            JobKind::Check => "check",
            JobKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bulk_copy" => Ok(JobKind::BulkCopy),
            "check" => Ok(JobKind::Check),
            "snapshot" => Ok(JobKind::Snapshot),
            _ => Err(DomainError::UnknownVariant {
                kind: "job kind",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(DomainError::UnknownVariant {
                kind: "job status",
                value: s.to_string(),
            }),
        }
    }
}

/// Persisted state of one collaborator job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub flow_id: Option<SyncFlowId>,
    /// Identifier assigned by the external service, if any
    pub external_id: Option<String>,
    pub status: JobStatus,
    pub message: Option<String>,
    pub stats: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A job that has just been started
    pub fn started(kind: JobKind, flow_id: Option<SyncFlowId>) -> Self {
        Self {
            id: JobId::new(),
            kind,
            flow_id,
            external_id: None,
            status: JobStatus::Running,
            message: None,
            stats: Value::Null,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn succeed(&mut self, stats: Value) {
        self.status = JobStatus::Succeeded;
        self.stats = stats;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.message = Some(message.into());
        self.finished_at = Some(Utc::now());
    }
}
