//! Remote-copy service port
//!
//! An external service that performs bulk directory copies and one-way
//! consistency checks asynchronously. The engine uses it only to accelerate
//! initial transfers; per-file propagation never depends on it.

use std::path::Path;

use serde_json::Value;

/// Status of a remote job as reported by the service
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJobStatus {
    /// Whether the job has stopped running
    pub finished: bool,
    /// Whether the job completed without error (meaningful once finished)
    pub success: bool,
    /// Error text reported by the service, if any
    pub error: Option<String>,
    /// Transfer statistics as reported by the service
    pub stats: Value,
}

/// Port trait for the remote-copy collaborator
#[async_trait::async_trait]
pub trait IRemoteCopy: Send + Sync {
    /// Start an asynchronous copy of `source` into `destination`, excluding
    /// files that match any of `filters`; returns the service's job id
    async fn request_copy(
        &self,
        source: &Path,
        destination: &Path,
        filters: &[String],
    ) -> anyhow::Result<String>;

    /// Query a job's progress
    async fn poll_job_status(&self, job_id: &str) -> anyhow::Result<RemoteJobStatus>;

    /// Whether every file in `source` is present and identical in `destination`
    async fn check_one_way(&self, source: &Path, destination: &Path) -> anyhow::Result<bool>;
}
