//! Keyed debounce scheduler
//!
//! [`DebounceScheduler::schedule`] runs an action `delay` after the call,
//! unless another `schedule` for the same key arrives first, in which case
//! the earlier action is dropped. Cancellation only affects actions still
//! waiting out their delay; an action that has started runs to completion.
//!
//! Used to coalesce bursts of watcher notifications per path and to drive
//! bounded polling loops (an action re-scheduling itself).

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{trace, warn};

struct Pending {
    generation: u64,
    token: CancellationToken,
}

/// Cancel-and-reschedule delayed task runner
pub struct DebounceScheduler<K> {
    pending: Arc<DashMap<K, Pending>>,
    next_generation: AtomicU64,
    tracker: TaskTracker,
}

impl<K> DebounceScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            tracker: TaskTracker::new(),
        }
    }

    /// Schedule `action` to run `delay` from now, replacing any action still
    /// waiting for `key`
    ///
    /// Errors returned by the action are logged and otherwise ignored.
    pub fn schedule<F, Fut>(&self, key: K, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(previous) = self.pending.insert(
            key.clone(),
            Pending {
                generation,
                token: token.clone(),
            },
        ) {
            trace!(key = ?key, "Replacing pending debounced action");
            previous.token.cancel();
        }

        let pending = Arc::clone(&self.pending);
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            // From here on the action is no longer cancellable
            pending.remove_if(&key, |_, p| p.generation == generation);

            if let Err(e) = action().await {
                warn!(key = ?key, error = %e, "Debounced action failed");
            }
        });
    }

    /// Drop the action waiting for `key`, if any
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some((_, p)) => {
                p.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every waiting action
    pub fn cancel_all(&self) {
        self.pending.retain(|_, p| {
            p.token.cancel();
            false
        });
    }

    /// Number of actions still waiting out their delay
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cancel everything still waiting and wait for running actions to finish
    pub async fn shutdown(&self) {
        self.cancel_all();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl<K> Default for DebounceScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
