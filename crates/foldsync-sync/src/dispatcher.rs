//! Queue loops feeding a bounded worker pool
//!
//! One loop per queue (ingress, downstream) dequeues events in order and
//! spawns a handler per event. A shared semaphore bounds how many handlers
//! run at once; a loop takes its permit before dequeueing, so it never pops
//! an event it cannot start. Handler failures are logged and never stop a
//! loop.
//!
//! ```text
//!  EventBus::poll_ingress    ──→ ingress loop    ─┐
//!                                                 ├─→ Semaphore(workers) ─→ TaskTracker
//!  EventBus::poll_downstream ──→ downstream loop ─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::engine::SyncEngine;

/// Dequeue loops plus the handler pool they feed
pub struct Dispatcher {
    engine: Arc<SyncEngine>,
    bus: Arc<EventBus>,
    workers: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    token: CancellationToken,
    idle_backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<SyncEngine>,
        bus: Arc<EventBus>,
        workers: usize,
        idle_backoff: Duration,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            engine,
            bus,
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            idle_backoff,
        }
    }

    /// Spawn both dequeue loops
    pub fn start(self: &Arc<Self>) {
        info!(workers = self.workers, "Starting event dispatcher");
        self.tracker.spawn(Arc::clone(self).run_ingress());
        self.tracker.spawn(Arc::clone(self).run_downstream());
    }

    /// Handlers currently running
    pub fn in_flight(&self) -> usize {
        self.workers - self.permits.available_permits()
    }

    /// Stop both loops and wait for every running handler to finish
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Event dispatcher stopped");
    }

    /// Wait out an idle period; returns false once cancelled
    async fn idle(&self, woken: impl std::future::Future<Output = ()>) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = woken => true,
            _ = tokio::time::sleep(self.idle_backoff) => true,
        }
    }

    async fn run_ingress(self: Arc<Self>) {
        debug!("Ingress loop running");
        loop {
            let permit = tokio::select! {
                _ = self.token.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(event) = self.bus.poll_ingress() else {
                drop(permit);
                if !self.idle(self.bus.ingress_notified()).await {
                    break;
                }
                continue;
            };

            let engine = Arc::clone(&self.engine);
            self.tracker.spawn(async move {
                let _permit = permit;
                let folder_id = event.root_folder_id();
                let kind = event.kind();
                if let Err(e) = engine.handle_ingress(event).await {
                    warn!(folder_id = %folder_id, kind = %kind, error = %e, "Ingress event failed");
                }
            });
        }
        debug!("Ingress loop stopped");
    }

    async fn run_downstream(self: Arc<Self>) {
        debug!("Downstream loop running");
        loop {
            let permit = tokio::select! {
                _ = self.token.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(event) = self.bus.poll_downstream() else {
                drop(permit);
                if !self.idle(self.bus.downstream_notified()).await {
                    break;
                }
                continue;
            };

            let engine = Arc::clone(&self.engine);
            self.tracker.spawn(async move {
                let _permit = permit;
                engine.handle_downstream(event).await;
            });
        }
        debug!("Downstream loop stopped");
    }
}
