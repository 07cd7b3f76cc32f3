//! Process-lifetime wiring
//!
//! [`SyncContext`] owns every shared component (whitelist, watchers, flow
//! cache, queues, handlers) and the background tasks around them. It is
//! built once at startup from configuration and torn down on shutdown; no
//! component lives in a static.
//!
//! It also exposes the flow lifecycle operations a control surface needs:
//! define, delete, pause, resume and filter updates.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use foldsync_core::config::{Config, FlowDefinition, RemoteCopyConfig, SnapshotConfig, SyncConfig};
use foldsync_core::domain::newtypes::SyncFlowId;
use foldsync_core::domain::{
    FileEvent, FilterCriteria, FlowStatus, FlowType, JobKind, JobRecord, JobStatus, SyncFlow,
};
use foldsync_core::ports::{ILocalFileSystem, IRemoteCopy, ISnapshotService, IStateRepository};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::bus::EventBus;
use crate::debounce::DebounceScheduler;
use crate::dispatcher::Dispatcher;
use crate::engine::SyncEngine;
use crate::folders::RootFolderRegistry;
use crate::reconcile::{CrossCheckReport, Reconciler, ScanReport};
use crate::registry::SyncFlowRegistry;
use crate::transfer::BulkTransfer;
use crate::validator::AccessValidator;
use crate::watcher::{run_event_pump, FolderWatcher};
use crate::SyncError;

/// Owner of the engine's shared state and background tasks
pub struct SyncContext {
    sync: SyncConfig,
    remote_copy: RemoteCopyConfig,
    snapshot_config: SnapshotConfig,
    repo: Arc<dyn IStateRepository>,
    watcher: Arc<FolderWatcher>,
    watcher_rx: Mutex<Option<mpsc::UnboundedReceiver<FileEvent>>>,
    folders: Arc<RootFolderRegistry>,
    registry: Arc<SyncFlowRegistry>,
    bus: Arc<EventBus>,
    engine: Arc<SyncEngine>,
    reconciler: Arc<Reconciler>,
    debouncer: Arc<DebounceScheduler<PathBuf>>,
    dispatcher: Arc<Dispatcher>,
    transfer: Option<Arc<BulkTransfer>>,
    snapshot: Option<Arc<dyn ISnapshotService>>,
    token: CancellationToken,
    tasks: TaskTracker,
}

impl SyncContext {
    pub fn new(config: &Config, repo: Arc<dyn IStateRepository>, fs: Arc<dyn ILocalFileSystem>) -> Self {
        let sync = config.sync.clone();
        let (watcher, watcher_rx) = FolderWatcher::new(
            Duration::from_millis(sync.poll_interval_ms),
            Duration::from_millis(sync.poll_jitter_ms),
        );
        let watcher = Arc::new(watcher);
        let validator = Arc::new(AccessValidator::new());

        let folders = Arc::new(RootFolderRegistry::new(
            Arc::clone(&repo),
            validator,
            Arc::clone(&watcher),
        ));
        let registry = Arc::new(SyncFlowRegistry::new(Arc::clone(&repo)));
        let bus = Arc::new(EventBus::new(Arc::clone(&registry)));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&repo),
            Arc::clone(&fs),
            Arc::clone(&registry),
            Arc::clone(&folders),
            Arc::clone(&bus),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&repo),
            fs,
            Arc::clone(&bus),
            Arc::clone(&folders),
            sync.page_size,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&engine),
            Arc::clone(&bus),
            sync.workers,
            Duration::from_millis(sync.idle_backoff_ms),
        ));

        Self {
            sync,
            remote_copy: config.remote_copy.clone(),
            snapshot_config: config.snapshot.clone(),
            repo,
            watcher,
            watcher_rx: Mutex::new(Some(watcher_rx)),
            folders,
            registry,
            bus,
            engine,
            reconciler,
            debouncer: Arc::new(DebounceScheduler::new()),
            dispatcher,
            transfer: None,
            snapshot: None,
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Use a remote-copy service for initial bulk transfers
    #[must_use]
    pub fn with_remote_copy(mut self, remote: Arc<dyn IRemoteCopy>) -> Self {
        self.transfer = Some(Arc::new(BulkTransfer::new(
            remote,
            Arc::clone(&self.repo),
            Arc::clone(&self.registry),
            Arc::clone(&self.folders),
            Duration::from_secs(self.remote_copy.poll_interval_secs),
            self.remote_copy.max_polls,
        )));
        self
    }

    /// Use a snapshot service on the snapshot timer
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Arc<dyn ISnapshotService>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn repository(&self) -> &Arc<dyn IStateRepository> {
        &self.repo
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<SyncFlowRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn folders(&self) -> &Arc<RootFolderRegistry> {
        &self.folders
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn transfer(&self) -> Option<&Arc<BulkTransfer>> {
        self.transfer.as_ref()
    }

    // ------------------------------------------------------------------
    // Flow lifecycle
    // ------------------------------------------------------------------

    /// Ensure a flow and its folders exist and are active
    ///
    /// Idempotent per (source, destination). Changed filters on an existing
    /// flow are applied through [`SyncContext::update_filters`]. A newly
    /// created internal→content flow starts a bulk copy when configured.
    ///
    /// # Errors
    /// Returns an error for invalid folders or definitions and store failures
    #[instrument(skip(self, definition), fields(name = %definition.name))]
    pub async fn define_flow(&self, definition: &FlowDefinition) -> anyhow::Result<SyncFlow> {
        let flow_type = definition.flow_type;
        let source = self
            .folders
            .ensure(&folder_name(&definition.source), &definition.source, flow_type.source_role())
            .await?;
        let destination = self
            .folders
            .ensure(
                &folder_name(&definition.destination),
                &definition.destination,
                flow_type.destination_role(),
            )
            .await?;

        let existed = self
            .repo
            .get_flow_by_pair(&source.id, &destination.id)
            .await?
            .is_some();
        let filters = FilterCriteria::new(definition.filters.iter().cloned());
        let mut flow = self
            .registry
            .create(
                &definition.name,
                source.id,
                destination.id,
                flow_type,
                definition.layout,
                filters.clone(),
            )
            .await?;

        if existed {
            if flow.layout != definition.layout {
                warn!(
                    flow_id = %flow.id,
                    current = %flow.layout,
                    requested = %definition.layout,
                    "Layout of an existing flow cannot change; keeping the current one"
                );
            }
            if flow.filters != filters {
                flow = self.update_filters(&flow.id, filters).await?;
            }
        }

        self.folders.activate(&source).await?;
        self.folders.activate(&destination).await?;

        if !existed && flow_type == FlowType::InternalToContent && self.remote_copy.bulk_initial_copy {
            if let Some(transfer) = &self.transfer {
                if let Err(e) = transfer.start(&flow).await {
                    warn!(flow_id = %flow.id, error = %e, "Initial bulk copy not started");
                }
            }
        }
        Ok(flow)
    }

    /// Delete a flow; folders no other flow uses are retired
    ///
    /// Returns false if the flow did not exist.
    ///
    /// # Errors
    /// Returns an error if the store cannot be updated
    pub async fn delete_flow(&self, flow_id: &SyncFlowId) -> anyhow::Result<bool> {
        let Some(flow) = self.registry.delete(flow_id).await? else {
            return Ok(false);
        };
        let dropped = self.bus.clear(flow_id);

        let remaining = self.registry.list().await?;
        for folder_id in [flow.source_id, flow.destination_id] {
            let in_use = remaining
                .iter()
                .any(|f| f.source_id == folder_id || f.destination_id == folder_id);
            if in_use {
                continue;
            }
            if let Some(folder) = self.folders.get(&folder_id).await? {
                self.folders.retire(&folder).await?;
            }
        }

        info!(flow_id = %flow_id, dropped, "Flow deleted");
        Ok(true)
    }

    /// Hold a flow's queue
    ///
    /// # Errors
    /// Returns `SyncError::UnknownFlow` if the flow does not exist
    pub async fn pause_flow(&self, flow_id: &SyncFlowId) -> anyhow::Result<SyncFlow> {
        let flow = self.registry.pause(flow_id).await?;
        info!(flow_id = %flow_id, queued = self.bus.downstream_len(flow_id), "Flow paused");
        Ok(flow)
    }

    /// Release a paused flow's queue
    ///
    /// # Errors
    /// Returns `SyncError::UnknownFlow` if the flow does not exist
    pub async fn resume_flow(&self, flow_id: &SyncFlowId) -> anyhow::Result<SyncFlow> {
        let flow = self.registry.resume(flow_id).await?;
        self.bus.wake_downstream();
        info!(flow_id = %flow_id, status = %flow.status, "Flow resumed");
        Ok(flow)
    }

    /// Replace a flow's filters
    ///
    /// Queued work for the flow is dropped, mappings of sources the new
    /// filters exclude are deleted, and a cross check re-queues whatever the
    /// flow still owes its destination.
    ///
    /// # Errors
    /// Returns `SyncError::UnknownFlow` if the flow does not exist
    pub async fn update_filters(
        &self,
        flow_id: &SyncFlowId,
        filters: FilterCriteria,
    ) -> anyhow::Result<SyncFlow> {
        let flow = self.registry.update_filters(flow_id, filters).await?;

        let dropped = self.bus.clear(flow_id);
        self.registry
            .discard_pending(flow_id, i64::try_from(dropped).unwrap_or(i64::MAX))
            .await?;

        let mut removed = 0;
        for mapping in self.repo.list_mappings(flow_id).await? {
            let Some(source) = self.repo.get_file(&mapping.source_file_id).await? else {
                continue;
            };
            if flow.excludes(&source.location()) {
                self.repo.delete_mapping(&mapping.id).await?;
                removed += 1;
            }
        }
        info!(flow_id = %flow_id, dropped, removed, "Flow filters applied");

        self.reconciler.cross_check(&flow).await?;
        Ok(flow)
    }

    // ------------------------------------------------------------------
    // Reconciliation and timers
    // ------------------------------------------------------------------

    /// Full scan of every folder, then a cross check of every flow
    ///
    /// A failure on one folder or flow is logged and the pass continues.
    ///
    /// # Errors
    /// Returns an error only if folders or flows cannot be listed
    pub async fn reconcile_all(&self) -> anyhow::Result<(Vec<ScanReport>, Vec<CrossCheckReport>)> {
        let mut scans = Vec::new();
        for folder in self.folders.list().await? {
            match self.reconciler.full_scan(&folder).await {
                Ok(report) => scans.push(report),
                Err(e) => warn!(folder_id = %folder.id, error = %e, "Full scan failed"),
            }
        }

        let mut checks = Vec::new();
        for flow in self.registry.list().await? {
            match self.reconciler.cross_check(&flow).await {
                Ok(report) => checks.push(report),
                Err(e) => warn!(flow_id = %flow.id, error = %e, "Cross check failed"),
            }
        }
        Ok((scans, checks))
    }

    /// Realign flow statuses with their pending counters
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written
    pub async fn check_consistency(&self) -> anyhow::Result<usize> {
        self.registry.check_consistency().await
    }

    /// Snapshot every destination folder of a flow currently in SYNC
    ///
    /// Each run is recorded as a `snapshot` job. Returns the recorded jobs;
    /// empty when no snapshot service is configured.
    ///
    /// # Errors
    /// Returns an error if flows cannot be listed or a job cannot be recorded
    pub async fn snapshot_all(&self) -> anyhow::Result<Vec<JobRecord>> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for flow in self.repo.get_flows_by_status(FlowStatus::Sync).await? {
            if !seen.insert(flow.destination_id) {
                continue;
            }
            let Some(folder) = self.folders.get(&flow.destination_id).await? else {
                continue;
            };

            let mut job = JobRecord::started(JobKind::Snapshot, Some(flow.id));
            match snapshot.backup(folder.path.as_path()).await {
                Ok(summary) => {
                    job.external_id = summary.snapshot_id;
                    job.succeed(json!({ "path": folder.path.to_string(), "summary": summary.stats }));
                    info!(folder_id = %folder.id, snapshot_id = ?job.external_id, "Snapshot taken");
                }
                Err(e) => {
                    warn!(folder_id = %folder.id, error = %e, "Snapshot failed");
                    job.fail(e.to_string());
                }
            }
            self.repo.save_job(&job).await?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Handle queued events inline until both queues are idle
    ///
    /// Events of paused flows stay queued. Returns how many events were
    /// handled.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        loop {
            if let Some(event) = self.bus.poll_ingress() {
                if let Err(e) = self.engine.handle_ingress(event).await {
                    warn!(error = %e, "Ingress event failed");
                }
                handled += 1;
                continue;
            }
            if let Some(event) = self.bus.poll_downstream() {
                self.engine.handle_downstream(event).await;
                handled += 1;
                continue;
            }
            return handled;
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Activate every registered folder without starting any task
    ///
    /// # Errors
    /// Returns an error if folders cannot be listed
    pub async fn activate_all(&self) -> anyhow::Result<usize> {
        let folders = self.folders.list().await?;
        for folder in &folders {
            if let Err(e) = self.folders.activate(folder).await {
                warn!(folder_id = %folder.id, error = %e, "Failed to activate folder");
            }
        }
        Ok(folders.len())
    }

    /// Settle bulk copies a stopped process left open
    ///
    /// With a remote-copy service configured, open jobs that reached the
    /// service are polled again; every other open job is failed. Flows left
    /// RUNNING without a job being polled get their status back from the
    /// counter. Returns how many flows were handed back.
    ///
    /// # Errors
    /// Returns an error if jobs or flows cannot be read or written
    pub async fn recover_interrupted(&self) -> anyhow::Result<usize> {
        let mut polled = HashSet::new();
        let open = self
            .repo
            .get_jobs_by_status(JobKind::BulkCopy, JobStatus::Running)
            .await?;
        for mut job in open {
            let flow = match job.flow_id {
                Some(id) => self.registry.get(&id).await?,
                None => None,
            };
            match (&self.transfer, flow) {
                (Some(transfer), Some(flow)) if job.external_id.is_some() => {
                    transfer.resume(job);
                    polled.insert(flow.id);
                }
                _ => {
                    warn!(job_id = %job.id, flow_id = ?job.flow_id, "Failing bulk copy left open by shutdown");
                    job.fail("interrupted by shutdown");
                    self.repo.save_job(&job).await?;
                }
            }
        }

        let mut restored = 0;
        for flow in self.repo.get_flows_by_status(FlowStatus::Running).await? {
            if polled.contains(&flow.id) {
                continue;
            }
            let flow = self.registry.recompute_status(&flow.id).await?;
            info!(flow_id = %flow.id, status = %flow.status, "Flow handed back after interrupted bulk copy");
            restored += 1;
        }
        Ok(restored)
    }

    /// Start watchers, the dispatcher, the startup reconciliation and the
    /// periodic timers
    ///
    /// # Errors
    /// Returns an error if folders cannot be listed or the context was
    /// already started
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let events_rx = self
            .watcher_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| SyncError::InvalidFlow("sync context already started".to_string()))?;

        let active = self.activate_all().await?;
        let recovered = self.recover_interrupted().await?;
        info!(folders = active, recovered, "Starting sync context");

        self.tasks.spawn(run_event_pump(
            events_rx,
            Arc::clone(&self.debouncer),
            Arc::clone(&self.bus),
            Duration::from_millis(self.sync.debounce_ms),
            self.token.child_token(),
        ));
        self.dispatcher.start();

        let ctx = Arc::clone(self);
        self.tasks.spawn(async move {
            if let Err(e) = ctx.reconcile_all().await {
                warn!(error = %e, "Startup reconciliation failed");
            }
        });

        self.spawn_timer(
            "full_scan",
            Duration::from_secs(self.sync.full_scan_interval_secs),
            |ctx| async move {
                ctx.reconcile_all().await?;
                Ok(())
            },
        );
        self.spawn_timer(
            "consistency_check",
            Duration::from_secs(self.sync.consistency_check_interval_secs),
            |ctx| async move {
                ctx.check_consistency().await?;
                Ok(())
            },
        );
        if self.snapshot.is_some() {
            self.spawn_timer(
                "snapshot",
                Duration::from_secs(self.snapshot_config.interval_secs),
                |ctx| async move {
                    ctx.snapshot_all().await?;
                    Ok(())
                },
            );
        }
        Ok(())
    }

    fn spawn_timer<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let ctx = Arc::clone(self);
        let token = self.token.child_token();
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; startup work runs separately
            ticker.tick().await;
            debug!(timer = name, period_secs = period.as_secs(), "Timer running");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = tick(Arc::clone(&ctx)).await {
                            warn!(timer = name, error = %e, "Timer task failed");
                        }
                    }
                }
            }
        });
    }

    /// Stop every task and wait for in-flight work to finish
    pub async fn shutdown(&self) {
        info!("Shutting down sync context");
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.debouncer.shutdown().await;
        self.dispatcher.shutdown().await;
        if let Some(transfer) = &self.transfer {
            transfer.shutdown().await;
        }
        self.watcher.clear();
        info!("Sync context stopped");
    }
}

/// Display name for a folder registered through a flow definition
fn folder_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
