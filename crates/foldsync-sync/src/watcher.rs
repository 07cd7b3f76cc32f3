//! Per-folder poll watchers
//!
//! A [`FolderWatcher`] owns one `notify` [`PollWatcher`] per observed root
//! folder. Each watcher polls at the configured base interval plus a random
//! jitter so many folders do not all scan at the same instant. Raw `notify`
//! events are converted into [`FileEvent`] values tagged with the folder id.
//!
//! ## Architecture
//!
//! ```text
//! PollWatcher (per folder)
//!       │
//!       ▼
//!  mpsc::unbounded  ──→  run_event_pump  ──→  DebounceScheduler (per path)
//!                                                   │
//!                                                   ▼
//!                                           EventBus::push_ingress
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use foldsync_core::domain::newtypes::RootFolderId;
use foldsync_core::domain::{FileEvent, RootFolder};
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::debounce::DebounceScheduler;
use crate::filesystem::is_staging_file;

// ============================================================================
// FolderWatcher struct
// ============================================================================

/// Polling watchers keyed by root path
pub struct FolderWatcher {
    watchers: Mutex<HashMap<PathBuf, PollWatcher>>,
    events_tx: mpsc::UnboundedSender<FileEvent>,
    poll_interval: Duration,
    poll_jitter: Duration,
}

impl FolderWatcher {
    /// Creates a watcher set and the receiver its events arrive on
    pub fn new(
        poll_interval: Duration,
        poll_jitter: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<FileEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            watchers: Mutex::new(HashMap::new()),
            events_tx,
            poll_interval,
            poll_jitter,
        };
        (watcher, events_rx)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, PollWatcher>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Interval for the next watcher: base plus a random jitter
    fn jittered_interval(&self) -> Duration {
        let jitter_ms = u64::try_from(self.poll_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.poll_interval;
        }
        self.poll_interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    /// Start polling a folder; a folder already being watched is left as is
    ///
    /// Blocking: `watch` walks the whole tree once to seed the poller. The
    /// map lock is not held during that walk.
    ///
    /// # Errors
    /// Returns an error if the underlying watcher cannot be created or the
    /// folder cannot be watched
    pub fn add_watcher(&self, folder: &RootFolder) -> anyhow::Result<()> {
        let root = folder.path.as_path().to_path_buf();
        if self.is_watching(&root) {
            debug!(path = %root.display(), "Folder already watched");
            return Ok(());
        }

        let interval = self.jittered_interval();
        let folder_id = folder.id;
        let tx = self.events_tx.clone();

        let mut watcher = PollWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for change in map_notify_event(folder_id, &event) {
                        if tx.send(change).is_err() {
                            warn!("Failed to send file event (receiver dropped)");
                        }
                    }
                }
                Err(err) => {
                    error!(folder_id = %folder_id, error = %err, "Folder watcher error");
                }
            },
            notify::Config::default().with_poll_interval(interval),
        )
        .context("Failed to create poll watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", root.display()))?;

        let mut watchers = self.lock();
        if watchers.contains_key(&root) {
            // Another caller finished first; ours is dropped
            debug!(path = %root.display(), "Folder already watched");
            return Ok(());
        }
        info!(
            folder_id = %folder.id,
            path = %root.display(),
            interval_ms = interval.as_millis() as u64,
            "Started polling folder"
        );
        watchers.insert(root, watcher);
        Ok(())
    }

    /// Stop polling the folder rooted at `path`; returns whether one was
    /// running. Calling it again is a no-op.
    pub fn remove_watcher(&self, path: &Path) -> bool {
        let removed = self.lock().remove(path);
        match removed {
            Some(_) => {
                info!(path = %path.display(), "Stopped polling folder");
                true
            }
            None => false,
        }
    }

    /// Whether a folder rooted at `path` is being polled
    pub fn is_watching(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    /// Number of folders being polled
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stop every watcher
    pub fn clear(&self) {
        let mut watchers = self.lock();
        let count = watchers.len();
        watchers.clear();
        debug!(count, "Stopped all folder watchers");
    }
}

// ============================================================================
// Event mapping - notify::Event → FileEvent
// ============================================================================

/// Converts a `notify::Event` into file events for `folder`
///
/// - `Create(*)` -> `FileEvent::Created`
/// - `Modify(*)` -> `FileEvent::Changed`
/// - `Remove(*)` -> `FileEvent::Deleted`
///
/// Access and other event kinds, and our own staging files, are dropped.
fn map_notify_event(folder: RootFolderId, event: &notify::Event) -> Vec<FileEvent> {
    let make: fn(RootFolderId, PathBuf) -> FileEvent = match event.kind {
        EventKind::Create(_) => FileEvent::created,
        EventKind::Modify(_) => FileEvent::changed,
        EventKind::Remove(_) => FileEvent::deleted,
        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            return Vec::new();
        }
    };

    event
        .paths
        .iter()
        .filter(|p| !is_staging_file(p))
        .map(|p| make(folder, p.clone()))
        .collect()
}

// ============================================================================
// Event pump
// ============================================================================

/// Moves watcher events into the ingress queue, debounced per path
///
/// Runs until `token` is cancelled or every sender is dropped.
pub async fn run_event_pump(
    mut events_rx: mpsc::UnboundedReceiver<FileEvent>,
    debouncer: Arc<DebounceScheduler<PathBuf>>,
    bus: Arc<EventBus>,
    delay: Duration,
    token: CancellationToken,
) {
    info!(debounce_ms = delay.as_millis() as u64, "Watcher event pump starting");

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = events_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(path) = event.path().map(Path::to_path_buf) else {
            bus.push_ingress(event);
            continue;
        };

        let bus = Arc::clone(&bus);
        debouncer.schedule(path, delay, move || async move {
            bus.push_ingress(event);
            Ok(())
        });
    }

    info!("Watcher event pump stopped");
}
