//! Sync-flow registry and cache
//!
//! The backing store is the system of record for flows. This registry keeps
//! a write-through cache of them keyed by id, an index from source folder
//! to flow ids, and one pending-event counter per flow.
//!
//! ## Status state machine
//!
//! A flow's status follows its pending counter: the 0→1 edge writes
//! `NOT_SYNC`, the 1→0 edge writes `SYNC`. Other increments and decrements
//! never touch storage. A `PAUSE`d flow (and one `RUNNING` a bulk transfer)
//! keeps its status across edges; resuming recomputes it from the counter.
//!
//! Every write to a flow (status, filters, deletion) is a read-modify-write
//! done under that flow's lock, so a counter edge can never overwrite a
//! concurrent pause or filter change with the copy it read earlier.
//!
//! ## Cache strategy
//!
//! Misses refresh only the flow or source folder being asked about. Filling
//! a miss never replaces an entry that is already cached: only writers,
//! holding the flow's lock, replace entries.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use foldsync_core::domain::newtypes::{RootFolderId, SyncFlowId};
use foldsync_core::domain::{FilterCriteria, FlowStatus, FlowType, LayoutMode, SyncFlow};
use foldsync_core::ports::IStateRepository;
use tracing::{debug, info, instrument, warn};

use crate::locks::KeyedLocks;
use crate::SyncError;

/// Write-through cache of sync flows plus pending counters
pub struct SyncFlowRegistry {
    repo: Arc<dyn IStateRepository>,
    flows: DashMap<SyncFlowId, SyncFlow>,
    by_source: DashMap<RootFolderId, Vec<SyncFlowId>>,
    pending: DashMap<SyncFlowId, Arc<AtomicI64>>,
    locks: KeyedLocks<SyncFlowId>,
}

impl SyncFlowRegistry {
    pub fn new(repo: Arc<dyn IStateRepository>) -> Self {
        Self {
            repo,
            flows: DashMap::new(),
            by_source: DashMap::new(),
            pending: DashMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    /// The backing store
    pub fn repository(&self) -> &Arc<dyn IStateRepository> {
        &self.repo
    }

    fn cache(&self, flow: SyncFlow) {
        if let Some(mut ids) = self.by_source.get_mut(&flow.source_id) {
            if !ids.contains(&flow.id) {
                ids.push(flow.id);
            }
        }
        self.flows.entry(flow.id).or_insert(flow);
    }

    fn counter(&self, flow: &SyncFlowId) -> Arc<AtomicI64> {
        Arc::clone(self.pending.entry(*flow).or_default().value())
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    /// Create the flow for (source, destination), or return the existing one
    ///
    /// # Errors
    /// Returns an error for an invalid definition (blank name, same folder
    /// on both ends) or if the store rejects the write
    #[instrument(skip(self, filters), fields(source = %source, destination = %destination))]
    pub async fn create(
        &self,
        name: &str,
        source: RootFolderId,
        destination: RootFolderId,
        flow_type: FlowType,
        layout: LayoutMode,
        filters: FilterCriteria,
    ) -> anyhow::Result<SyncFlow> {
        if let Some(existing) = self.repo.get_flow_by_pair(&source, &destination).await? {
            debug!(flow_id = %existing.id, "Flow already defined for pair");
            self.cache(existing.clone());
            return Ok(existing);
        }

        let flow = SyncFlow::new(name, source, destination, flow_type)?
            .with_layout(layout)
            .with_filters(filters);

        if let Err(e) = self.repo.save_flow(&flow).await {
            // A concurrent create for the same pair may have won the unique index
            if let Some(existing) = self.repo.get_flow_by_pair(&source, &destination).await? {
                self.cache(existing.clone());
                return Ok(existing);
            }
            return Err(e);
        }

        info!(flow_id = %flow.id, name = %flow.name, flow_type = %flow.flow_type, "Sync flow created");
        self.cache(flow.clone());
        Ok(flow)
    }

    /// All live flows whose source is `source`
    ///
    /// # Errors
    /// Returns an error if a cache miss cannot be filled from the store
    pub async fn get_by_source(&self, source: &RootFolderId) -> anyhow::Result<Vec<SyncFlow>> {
        let cached_ids = self.by_source.get(source).map(|ids| ids.value().clone());
        if let Some(ids) = cached_ids {
            let cached: Option<Vec<SyncFlow>> = ids
                .iter()
                .map(|id| self.flows.get(id).map(|f| f.value().clone()))
                .collect();
            if let Some(flows) = cached {
                return Ok(flows);
            }
        }

        let flows = self.repo.get_flows_by_source(source).await?;
        debug!(source = %source, count = flows.len(), "Refreshed flows for source folder");
        for flow in &flows {
            self.flows.entry(flow.id).or_insert_with(|| flow.clone());
        }
        self.by_source
            .insert(*source, flows.iter().map(|f| f.id).collect());
        Ok(flows)
    }

    /// A live flow by id
    ///
    /// # Errors
    /// Returns an error if a cache miss cannot be filled from the store
    pub async fn get(&self, flow: &SyncFlowId) -> anyhow::Result<Option<SyncFlow>> {
        if let Some(cached) = self.flows.get(flow) {
            return Ok(Some(cached.value().clone()));
        }
        let loaded = self.repo.get_flow(flow).await?;
        if let Some(ref f) = loaded {
            self.cache(f.clone());
        }
        Ok(loaded)
    }

    /// All live flows, caching any that were not cached yet
    ///
    /// # Errors
    /// Returns an error if the store cannot be read
    pub async fn list(&self) -> anyhow::Result<Vec<SyncFlow>> {
        let flows = self.repo.list_flows().await?;
        for flow in &flows {
            self.cache(flow.clone());
        }
        Ok(flows)
    }

    /// Whether a cached flow is paused; unknown flows are not
    pub fn is_paused(&self, flow: &SyncFlowId) -> bool {
        self.flows
            .get(flow)
            .map(|f| f.is_paused())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Read-modify-write one flow under its lock
    ///
    /// `change` returns false to leave the flow as it is. Returns `None` if
    /// the flow no longer exists.
    async fn mutate<F>(&self, flow_id: &SyncFlowId, change: F) -> anyhow::Result<Option<SyncFlow>>
    where
        F: FnOnce(&mut SyncFlow) -> bool,
    {
        let _guard = self.locks.lock(*flow_id).await;
        let Some(mut flow) = self.get(flow_id).await? else {
            return Ok(None);
        };
        if !change(&mut flow) {
            return Ok(Some(flow));
        }
        self.repo.save_flow(&flow).await?;
        self.flows.insert(*flow_id, flow.clone());
        Ok(Some(flow))
    }

    /// Move a flow to the status `decide` picks from its current state
    ///
    /// `decide` returns `None` to keep the current status.
    async fn transition<F>(&self, flow_id: &SyncFlowId, decide: F) -> anyhow::Result<Option<SyncFlow>>
    where
        F: FnOnce(&SyncFlow) -> Option<FlowStatus>,
    {
        let mut previous = None;
        let flow = self
            .mutate(flow_id, |flow| match decide(flow) {
                Some(status) if status != flow.status => {
                    previous = Some(flow.status);
                    flow.set_status(status);
                    true
                }
                _ => false,
            })
            .await?;

        match (previous, &flow) {
            (Some(from), Some(flow)) => {
                info!(flow_id = %flow_id, from = %from, to = %flow.status, "Flow status changed");
            }
            (_, None) => debug!(flow_id = %flow_id, "Status update for unknown flow ignored"),
            _ => {}
        }
        Ok(flow)
    }

    /// Write a status to the store, then to the cache
    ///
    /// Returns `None` if the flow no longer exists.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write
    pub async fn update_status(
        &self,
        flow_id: &SyncFlowId,
        status: FlowStatus,
    ) -> anyhow::Result<Option<SyncFlow>> {
        self.transition(flow_id, |_| Some(status)).await
    }

    /// The status the counter asks for, unless paused or bulk-copying
    fn counter_status(&self, flow: &SyncFlow) -> Option<FlowStatus> {
        if flow.is_paused() || flow.status == FlowStatus::Running {
            return None;
        }
        Some(FlowStatus::for_pending(self.pending_count(&flow.id)))
    }

    /// Realign a flow's stored status with its counter after an edge
    ///
    /// The counter is read under the flow's lock, and every edge runs this
    /// after moving the counter, so the last one to run sees the final count.
    async fn follow_counter(&self, flow_id: &SyncFlowId) -> anyhow::Result<()> {
        self.transition(flow_id, |flow| self.counter_status(flow)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pending counters
    // ------------------------------------------------------------------

    /// Count one more queued event for a flow
    ///
    /// # Errors
    /// Returns an error if the 0→1 status write fails (the count itself is
    /// always recorded)
    pub async fn add_pending(&self, flow_id: &SyncFlowId) -> anyhow::Result<()> {
        let counter = self.counter(flow_id);
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            self.follow_counter(flow_id).await?;
        }
        Ok(())
    }

    /// Count one handled event for a flow; never goes below zero
    ///
    /// # Errors
    /// Returns an error if the 1→0 status write fails
    pub async fn decr_pending(&self, flow_id: &SyncFlowId) -> anyhow::Result<()> {
        self.discard_pending(flow_id, 1).await
    }

    /// Release `count` pending events at once (events dropped from a queue)
    ///
    /// # Errors
    /// Returns an error if the resulting status write fails
    pub async fn discard_pending(&self, flow_id: &SyncFlowId, count: i64) -> anyhow::Result<()> {
        if count <= 0 {
            return Ok(());
        }
        let Some(counter) = self.pending.get(flow_id).map(|c| Arc::clone(c.value())) else {
            debug!(flow_id = %flow_id, "No pending counter for flow");
            return Ok(());
        };

        let update = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            (v > 0).then(|| (v - count).max(0))
        });
        match update {
            Ok(previous) if previous <= count => self.follow_counter(flow_id).await?,
            Ok(_) => {}
            Err(_) => warn!(flow_id = %flow_id, "Pending counter already at zero"),
        }
        Ok(())
    }

    /// Current pending count for a flow
    pub fn pending_count(&self, flow: &SyncFlowId) -> i64 {
        self.pending
            .get(flow)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Pause a flow: its queue stops draining until resumed
    ///
    /// # Errors
    /// Returns `SyncError::UnknownFlow` if the flow does not exist
    pub async fn pause(&self, flow_id: &SyncFlowId) -> anyhow::Result<SyncFlow> {
        self.update_status(flow_id, FlowStatus::Pause)
            .await?
            .ok_or_else(|| SyncError::UnknownFlow(*flow_id).into())
    }

    /// Resume a paused flow, recomputing its status from the counter
    ///
    /// # Errors
    /// Returns `SyncError::UnknownFlow` if the flow does not exist
    pub async fn resume(&self, flow_id: &SyncFlowId) -> anyhow::Result<SyncFlow> {
        self.transition(flow_id, |flow| {
            flow.is_paused()
                .then(|| FlowStatus::for_pending(self.pending_count(flow_id)))
        })
        .await?
        .ok_or_else(|| SyncError::UnknownFlow(*flow_id).into())
    }

    /// Set a flow's status from its counter, unless it is paused
    ///
    /// Used when a bulk transfer finishes and hands the status back to the
    /// counter.
    ///
    /// # Errors
    /// Returns `SyncError::UnknownFlow` if the flow does not exist
    pub async fn recompute_status(&self, flow_id: &SyncFlowId) -> anyhow::Result<SyncFlow> {
        self.transition(flow_id, |flow| {
            (!flow.is_paused()).then(|| FlowStatus::for_pending(self.pending_count(flow_id)))
        })
        .await?
        .ok_or_else(|| SyncError::UnknownFlow(*flow_id).into())
    }

    /// Replace a flow's filter criteria
    ///
    /// # Errors
    /// Returns `SyncError::UnknownFlow` if the flow does not exist
    pub async fn update_filters(
        &self,
        flow_id: &SyncFlowId,
        filters: FilterCriteria,
    ) -> anyhow::Result<SyncFlow> {
        let flow = self
            .mutate(flow_id, |flow| {
                flow.filters = filters;
                flow.audit.touch();
                true
            })
            .await?
            .ok_or(SyncError::UnknownFlow(*flow_id))?;
        info!(flow_id = %flow_id, filters = ?flow.filters.as_slice(), "Flow filters updated");
        Ok(flow)
    }

    /// Soft-delete a flow and evict it with its counter
    ///
    /// Returns the deleted flow, or `None` if it did not exist.
    ///
    /// # Errors
    /// Returns an error if the store rejects the write
    pub async fn delete(&self, flow_id: &SyncFlowId) -> anyhow::Result<Option<SyncFlow>> {
        let _guard = self.locks.lock(*flow_id).await;
        let Some(mut flow) = self.get(flow_id).await? else {
            return Ok(None);
        };
        flow.audit.mark_deleted();
        self.repo.save_flow(&flow).await?;

        self.flows.remove(flow_id);
        if let Some(mut ids) = self.by_source.get_mut(&flow.source_id) {
            ids.retain(|id| id != flow_id);
        }
        self.pending.remove(flow_id);
        info!(flow_id = %flow_id, "Sync flow deleted");
        Ok(Some(flow))
    }

    /// Realign every live, non-paused flow's status with its counter
    ///
    /// Returns how many flows were corrected.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written
    pub async fn check_consistency(&self) -> anyhow::Result<usize> {
        let mut corrected = 0;
        for flow in self.list().await? {
            let mut drifted = false;
            self.transition(&flow.id, |current| {
                let desired = self.counter_status(current)?;
                drifted = desired != current.status;
                Some(desired)
            })
            .await?;
            if drifted {
                corrected += 1;
            }
        }
        if corrected > 0 {
            info!(corrected, "Consistency check realigned flow statuses");
        }
        Ok(corrected)
    }
}
