//! In-memory event bus
//!
//! One FIFO ingress queue receives raw [`FileEvent`]s from watchers and
//! scans. Downstream (propagation) events are fanned out into one FIFO
//! queue per sync flow. Dequeueing round-robins over the flow queues and
//! skips flows that are paused, so their events stay queued in order until
//! the flow is resumed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use foldsync_core::domain::newtypes::SyncFlowId;
use foldsync_core::domain::{DownstreamEvent, FileEvent};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::registry::SyncFlowRegistry;

/// Ingress queue plus per-flow downstream queues
pub struct EventBus {
    registry: Arc<SyncFlowRegistry>,
    ingress: Mutex<VecDeque<FileEvent>>,
    downstream: DashMap<SyncFlowId, VecDeque<DownstreamEvent>>,
    cursor: AtomicUsize,
    ingress_ready: Notify,
    downstream_ready: Notify,
}

impl EventBus {
    pub fn new(registry: Arc<SyncFlowRegistry>) -> Self {
        Self {
            registry,
            ingress: Mutex::new(VecDeque::new()),
            downstream: DashMap::new(),
            cursor: AtomicUsize::new(0),
            ingress_ready: Notify::new(),
            downstream_ready: Notify::new(),
        }
    }

    fn ingress_queue(&self) -> MutexGuard<'_, VecDeque<FileEvent>> {
        self.ingress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------

    /// Append a raw file event to the ingress queue
    pub fn push_ingress(&self, event: FileEvent) {
        trace!(folder_id = %event.root_folder_id(), kind = %event.kind(), "Ingress event queued");
        self.ingress_queue().push_back(event);
        self.ingress_ready.notify_one();
    }

    /// Pop the oldest ingress event; `None` when idle
    pub fn poll_ingress(&self) -> Option<FileEvent> {
        self.ingress_queue().pop_front()
    }

    pub fn ingress_len(&self) -> usize {
        self.ingress_queue().len()
    }

    /// Resolves when an ingress event may be available
    pub async fn ingress_notified(&self) {
        self.ingress_ready.notified().await;
    }

    // ------------------------------------------------------------------
    // Downstream
    // ------------------------------------------------------------------

    /// Queue a downstream event on every flow it applies to
    ///
    /// An event already bound to a flow goes to that flow only; otherwise it
    /// is copied onto each flow whose source is the event's folder. Each copy
    /// bumps the flow's pending counter before it becomes visible to
    /// consumers. Returns the number of flows the event was queued on.
    ///
    /// # Errors
    /// Returns an error if the flows for the source folder cannot be loaded
    pub async fn push_downstream(&self, event: DownstreamEvent) -> anyhow::Result<usize> {
        let targets: Vec<SyncFlowId> = match event.flow_id {
            Some(flow_id) => vec![flow_id],
            None => self
                .registry
                .get_by_source(&event.source_folder_id)
                .await?
                .into_iter()
                .map(|flow| flow.id)
                .collect(),
        };

        for flow_id in &targets {
            if let Err(e) = self.registry.add_pending(flow_id).await {
                // Counter was still incremented; the consistency check heals the status
                warn!(flow_id = %flow_id, error = %e, "Failed to record pending event");
            }
            self.downstream
                .entry(*flow_id)
                .or_default()
                .push_back(event.for_flow(*flow_id));
            self.downstream_ready.notify_one();
        }

        if !targets.is_empty() {
            debug!(
                file_id = %event.file_id,
                kind = %event.kind,
                flows = targets.len(),
                "Downstream event queued"
            );
        }
        Ok(targets.len())
    }

    /// Pop the next eligible downstream event, round-robin across flows
    ///
    /// Paused flows and empty queues are skipped. `None` when nothing is
    /// eligible.
    pub fn poll_downstream(&self) -> Option<DownstreamEvent> {
        let mut flows: Vec<SyncFlowId> = self.downstream.iter().map(|e| *e.key()).collect();
        if flows.is_empty() {
            return None;
        }
        flows.sort();

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % flows.len();
        for offset in 0..flows.len() {
            let flow_id = flows[(start + offset) % flows.len()];
            if self.registry.is_paused(&flow_id) {
                continue;
            }
            if let Some(mut queue) = self.downstream.get_mut(&flow_id) {
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }
        }
        None
    }

    /// Queued events for a flow
    pub fn downstream_len(&self, flow: &SyncFlowId) -> usize {
        self.downstream.get(flow).map(|q| q.len()).unwrap_or(0)
    }

    /// Total queued downstream events across all flows
    pub fn downstream_total(&self) -> usize {
        self.downstream.iter().map(|q| q.len()).sum()
    }

    /// Drop every queued event for a flow; returns how many were dropped
    ///
    /// The caller is responsible for releasing the matching pending counts.
    pub fn clear(&self, flow: &SyncFlowId) -> usize {
        let dropped = self
            .downstream
            .remove(flow)
            .map(|(_, queue)| queue.len())
            .unwrap_or(0);
        if dropped > 0 {
            debug!(flow_id = %flow, dropped, "Cleared downstream queue");
        }
        dropped
    }

    /// Wake a downstream consumer (after a flow is resumed)
    pub fn wake_downstream(&self) {
        self.downstream_ready.notify_one();
    }

    /// Resolves when a downstream event may be available
    pub async fn downstream_notified(&self) {
        self.downstream_ready.notified().await;
    }
}
