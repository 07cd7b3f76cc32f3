//! Bulk transfer through the remote-copy collaborator
//!
//! Starting a transfer requests an asynchronous copy from the service,
//! records a `bulk_copy` job and marks the flow RUNNING. A poll action then
//! re-schedules itself on a [`DebounceScheduler`] every poll interval until
//! the service reports the job finished or the poll limit is reached. A
//! successful copy is followed by a one-way check recorded as a `check`
//! job. However the poll ends, even on a store failure, the flow's status
//! is handed back to its pending counter.
//!
//! Collaborator failures end up in the job records; they never propagate
//! into the caller once the job exists. Jobs left open by a stopped process
//! are picked up again with [`BulkTransfer::resume`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use foldsync_core::domain::newtypes::{JobId, SyncFlowId};
use foldsync_core::domain::{FlowStatus, JobKind, JobRecord, SyncFlow};
use foldsync_core::ports::{IRemoteCopy, IStateRepository};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::debounce::DebounceScheduler;
use crate::folders::RootFolderRegistry;
use crate::registry::SyncFlowRegistry;
use crate::SyncError;

type PollFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

pub struct BulkTransfer {
    remote: Arc<dyn IRemoteCopy>,
    repo: Arc<dyn IStateRepository>,
    registry: Arc<SyncFlowRegistry>,
    folders: Arc<RootFolderRegistry>,
    poller: DebounceScheduler<JobId>,
    /// Jobs this process polls until they finish
    active: DashSet<JobId>,
    poll_interval: Duration,
    max_polls: u32,
}

impl BulkTransfer {
    pub fn new(
        remote: Arc<dyn IRemoteCopy>,
        repo: Arc<dyn IStateRepository>,
        registry: Arc<SyncFlowRegistry>,
        folders: Arc<RootFolderRegistry>,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Self {
        Self {
            remote,
            repo,
            registry,
            folders,
            poller: DebounceScheduler::new(),
            active: DashSet::new(),
            poll_interval,
            max_polls: max_polls.max(1),
        }
    }

    /// Request a bulk copy for `flow` and start polling it
    ///
    /// Returns the job as recorded. A rejected request yields a failed job
    /// and leaves the flow's status alone.
    ///
    /// # Errors
    /// Returns an error if a folder of the flow is unknown or the job cannot
    /// be recorded
    #[instrument(skip(self, flow), fields(flow_id = %flow.id))]
    pub async fn start(self: &Arc<Self>, flow: &SyncFlow) -> anyhow::Result<JobRecord> {
        let source = self
            .folders
            .get(&flow.source_id)
            .await?
            .ok_or(SyncError::UnknownFolder(flow.source_id))?;
        let destination = self
            .folders
            .get(&flow.destination_id)
            .await?
            .ok_or(SyncError::UnknownFolder(flow.destination_id))?;

        let mut job = JobRecord::started(JobKind::BulkCopy, Some(flow.id));
        match self
            .remote
            .request_copy(
                source.path.as_path(),
                destination.path.as_path(),
                flow.filters.as_slice(),
            )
            .await
        {
            Ok(external_id) => job.external_id = Some(external_id),
            Err(e) => {
                warn!(error = %e, "Bulk copy request rejected");
                job.fail(e.to_string());
                self.repo.save_job(&job).await?;
                return Ok(job);
            }
        }

        self.repo.save_job(&job).await?;
        if let Err(e) = self.registry.update_status(&flow.id, FlowStatus::Running).await {
            job.fail(format!("flow status not updated: {e}"));
            self.repo.save_job(&job).await?;
            return Err(e);
        }
        info!(
            job_id = %job.id,
            external_id = job.external_id.as_deref().unwrap_or_default(),
            "Bulk copy started"
        );

        self.active.insert(job.id);
        self.schedule_poll(job.clone(), 1);
        Ok(job)
    }

    /// Poll a job recorded by an earlier process until it finishes
    ///
    /// Returns false if this process is already polling the job.
    pub fn resume(self: &Arc<Self>, job: JobRecord) -> bool {
        if !self.active.insert(job.id) {
            return false;
        }
        info!(job_id = %job.id, flow_id = ?job.flow_id, "Resuming bulk copy polls");
        self.schedule_poll(job, 1);
        true
    }

    /// Jobs still waiting for their next poll
    pub fn pending_polls(&self) -> usize {
        self.poller.pending_count()
    }

    /// Drop pending polls and wait for running ones
    pub async fn shutdown(&self) {
        self.poller.shutdown().await;
    }

    fn schedule_poll(self: &Arc<Self>, job: JobRecord, attempt: u32) {
        let this = Arc::clone(self);
        self.poller
            .schedule(job.id, self.poll_interval, move || this.poll_once(job, attempt));
    }

    fn poll_once(self: Arc<Self>, mut job: JobRecord, attempt: u32) -> PollFuture {
        Box::pin(async move {
            match self.poll_step(&mut job, attempt).await {
                Ok(true) => {
                    self.schedule_poll(job, attempt + 1);
                    Ok(())
                }
                Ok(false) => {
                    self.active.remove(&job.id);
                    self.finish(job.flow_id).await;
                    Ok(())
                }
                Err(e) => {
                    // The job stays open in the store until the next resume
                    warn!(job_id = %job.id, error = %e, "Bulk copy poll aborted");
                    self.active.remove(&job.id);
                    self.finish(job.flow_id).await;
                    Err(e)
                }
            }
        })
    }

    /// Poll once and record a final outcome; true while the job runs on
    async fn poll_step(&self, job: &mut JobRecord, attempt: u32) -> anyhow::Result<bool> {
        let external_id = job.external_id.clone().unwrap_or_default();
        let last_error = match self.remote.poll_job_status(&external_id).await {
            Ok(status) if status.finished => {
                if status.success {
                    job.succeed(status.stats);
                    self.repo.save_job(job).await?;
                    info!(job_id = %job.id, "Bulk copy finished");
                    self.verify(job).await;
                } else {
                    let message = status
                        .error
                        .unwrap_or_else(|| "remote job reported failure".to_string());
                    warn!(job_id = %job.id, error = %message, "Bulk copy failed");
                    job.fail(message);
                    self.repo.save_job(job).await?;
                }
                return Ok(false);
            }
            Ok(_) => None,
            Err(e) => {
                warn!(job_id = %job.id, attempt, error = %e, "Job status poll failed");
                Some(e.to_string())
            }
        };

        if attempt < self.max_polls {
            debug!(job_id = %job.id, attempt, "Bulk copy still running");
            return Ok(true);
        }

        let message = match last_error {
            Some(e) => format!("gave up after {attempt} polls: {e}"),
            None => format!("timed out after {attempt} polls"),
        };
        warn!(job_id = %job.id, reason = %message, "Bulk copy abandoned");
        job.fail(message);
        self.repo.save_job(job).await?;
        Ok(false)
    }

    /// Record a one-way check of a finished copy
    async fn verify(&self, copy: &JobRecord) {
        let Some(flow_id) = copy.flow_id else {
            return;
        };
        let mut check = JobRecord::started(JobKind::Check, Some(flow_id));

        let verdict = async {
            let flow = self
                .registry
                .get(&flow_id)
                .await?
                .ok_or(SyncError::UnknownFlow(flow_id))?;
            let source = self
                .folders
                .get(&flow.source_id)
                .await?
                .ok_or(SyncError::UnknownFolder(flow.source_id))?;
            let destination = self
                .folders
                .get(&flow.destination_id)
                .await?
                .ok_or(SyncError::UnknownFolder(flow.destination_id))?;
            self.remote
                .check_one_way(source.path.as_path(), destination.path.as_path())
                .await
        }
        .await;

        match verdict {
            Ok(true) => check.succeed(json!({ "in_sync": true })),
            Ok(false) => check.fail("destination differs from source"),
            Err(e) => check.fail(e.to_string()),
        }
        info!(flow_id = %flow_id, status = %check.status, "One-way check recorded");
        if let Err(e) = self.repo.save_job(&check).await {
            warn!(flow_id = %flow_id, error = %e, "Failed to record check job");
        }
    }

    async fn finish(&self, flow_id: Option<SyncFlowId>) {
        let Some(flow_id) = flow_id else {
            return;
        };
        if let Err(e) = self.registry.recompute_status(&flow_id).await {
            warn!(flow_id = %flow_id, error = %e, "Failed to restore flow status after bulk copy");
        }
    }
}
