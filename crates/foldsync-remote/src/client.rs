//! Remote-copy service client
//!
//! Speaks the rclone remote-control JSON API: every call is a `POST` of a
//! JSON object to `<base_url>/<command>`, answered by a JSON object. Errors
//! come back with a non-2xx status and an `{"error": "..."}` body.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use foldsync_remote::RemoteCopyClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = RemoteCopyClient::new("http://127.0.0.1:5572")?;
//! let job = client.start_copy("/srv/internal".as_ref(), "/srv/www".as_ref(), &[]).await?;
//! let status = client.job_status(job).await?;
//! println!("finished: {}", status.finished);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use foldsync_core::ports::{IRemoteCopy, RemoteJobStatus};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::RemoteError;

/// Timeout applied to every control request (jobs themselves run async)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CopyRequest<'a> {
    src_fs: &'a str,
    dst_fs: &'a str,
    #[serde(rename = "_async")]
    run_async: bool,
    #[serde(rename = "_filter", skip_serializing_if = "Option::is_none")]
    filter: Option<FilterRules>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FilterRules {
    exclude_rule: Vec<String>,
    ignore_case: bool,
}

#[derive(Debug, Deserialize)]
struct JobStarted {
    jobid: u64,
}

#[derive(Debug, Serialize)]
struct JobRequest {
    jobid: u64,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    finished: bool,
    success: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    output: Value,
}

#[derive(Debug, Serialize)]
struct StatsRequest {
    group: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckRequest<'a> {
    src_fs: &'a str,
    dst_fs: &'a str,
    one_way: bool,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    success: bool,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

// ============================================================================
// RemoteCopyClient
// ============================================================================

/// HTTP client for the remote-copy service
pub struct RemoteCopyClient {
    client: Client,
    base_url: String,
}

impl RemoteCopyClient {
    /// Create a client for the service at `base_url`
    ///
    /// # Errors
    /// Returns `RemoteError::Network` if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `command` and decode the JSON answer
    async fn call<Req, Resp>(&self, command: &str, body: &Req) -> Result<Resp, RemoteError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, command);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            warn!(command, status = status.as_u16(), %message, "Remote-copy call rejected");
            return Err(RemoteError::HttpStatus {
                status: status.as_u16(),
                path: command.to_string(),
                message,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::InvalidResponse(format!("{command}: {e}")))
    }

    /// Start an asynchronous copy; returns the service's job id
    ///
    /// Each filter criterion excludes files whose name contains it,
    /// ignoring case.
    ///
    /// # Errors
    /// Returns an error if the service rejects the request or is unreachable
    #[instrument(skip(self, filters), fields(source = %source.display(), destination = %destination.display()))]
    pub async fn start_copy(
        &self,
        source: &Path,
        destination: &Path,
        filters: &[String],
    ) -> Result<u64, RemoteError> {
        let src_fs = source.to_string_lossy();
        let dst_fs = destination.to_string_lossy();
        let filter = (!filters.is_empty()).then(|| FilterRules {
            exclude_rule: filters.iter().map(|c| exclude_rule(c)).collect(),
            ignore_case: true,
        });

        let started: JobStarted = self
            .call(
                "sync/copy",
                &CopyRequest {
                    src_fs: &src_fs,
                    dst_fs: &dst_fs,
                    run_async: true,
                    filter,
                },
            )
            .await?;
        info!(jobid = started.jobid, "Remote copy started");
        Ok(started.jobid)
    }

    /// Query a job; finished jobs carry the transfer statistics of their group
    ///
    /// # Errors
    /// Returns an error if the service rejects the request or is unreachable
    pub async fn job_status(&self, jobid: u64) -> Result<RemoteJobStatus, RemoteError> {
        let status: JobStatusResponse = self.call("job/status", &JobRequest { jobid }).await?;

        let mut stats = status.output;
        if status.finished {
            let group = StatsRequest {
                group: format!("job/{jobid}"),
            };
            match self.call::<_, Value>("core/stats", &group).await {
                Ok(group_stats) => stats = group_stats,
                Err(e) => debug!(jobid, error = %e, "No transfer statistics for job"),
            }
        }

        debug!(jobid, finished = status.finished, success = status.success, "Job status");
        Ok(RemoteJobStatus {
            finished: status.finished,
            success: status.success,
            error: (!status.error.is_empty()).then_some(status.error),
            stats,
        })
    }

    /// Whether every file in `source` is present and identical in `destination`
    ///
    /// # Errors
    /// Returns an error if the service rejects the request or is unreachable
    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    pub async fn check(&self, source: &Path, destination: &Path) -> Result<bool, RemoteError> {
        let src_fs = source.to_string_lossy();
        let dst_fs = destination.to_string_lossy();
        let request = CheckRequest {
            src_fs: &src_fs,
            dst_fs: &dst_fs,
            one_way: true,
        };
        let verdict: CheckResponse = match self.call("operations/check", &request).await {
            Ok(verdict) => verdict,
            // A check that ran but found mismatches is reported as a failed call
            Err(RemoteError::HttpStatus { message, .. }) if message.contains("differences found") => {
                info!(%message, "One-way check found differences");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !verdict.success {
            info!(status = %verdict.status, "One-way check found differences");
        }
        Ok(verdict.success)
    }
}

/// Glob rule excluding any name containing `criterion`
fn exclude_rule(criterion: &str) -> String {
    let mut rule = String::with_capacity(criterion.len() + 2);
    rule.push('*');
    for c in criterion.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            rule.push('\\');
        }
        rule.push(c);
    }
    rule.push('*');
    rule
}

fn parse_job_id(job_id: &str) -> Result<u64, RemoteError> {
    job_id
        .parse()
        .map_err(|_| RemoteError::InvalidResponse(format!("job id '{job_id}' is not numeric")))
}

#[async_trait::async_trait]
impl IRemoteCopy for RemoteCopyClient {
    async fn request_copy(
        &self,
        source: &Path,
        destination: &Path,
        filters: &[String],
    ) -> anyhow::Result<String> {
        let jobid = self
            .start_copy(source, destination, filters)
            .await
            .context("Failed to start remote copy")?;
        Ok(jobid.to_string())
    }

    async fn poll_job_status(&self, job_id: &str) -> anyhow::Result<RemoteJobStatus> {
        let jobid = parse_job_id(job_id)?;
        self.job_status(jobid)
            .await
            .context("Failed to poll remote job")
    }

    async fn check_one_way(&self, source: &Path, destination: &Path) -> anyhow::Result<bool> {
        self.check(source, destination)
            .await
            .context("Failed to run one-way check")
    }
}
