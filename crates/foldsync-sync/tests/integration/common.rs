//! Shared helpers: a context over temp dirs and an in-memory store

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use foldsync_cache::{DatabasePool, SqliteStateRepository};
use foldsync_core::config::{Config, FlowDefinition};
use foldsync_core::domain::{EventOutcome, FlowType, LayoutMode, SyncEventEntry, SyncFlow};
use foldsync_core::ports::{IRemoteCopy, IStateRepository, RemoteJobStatus};
use foldsync_sync::filesystem::LocalFileSystemAdapter;
use foldsync_sync::SyncContext;
use tempfile::TempDir;

/// Settings that keep background activity out of the way of inline tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sync.debounce_ms = 20;
    config.sync.poll_interval_ms = 60_000;
    config.sync.poll_jitter_ms = 0;
    config.sync.idle_backoff_ms = 10;
    config.sync.page_size = 3;
    config.remote_copy.poll_interval_secs = 1;
    config.remote_copy.max_polls = 5;
    config
}

pub struct TestEnv {
    pub ctx: Arc<SyncContext>,
    pub repo: Arc<dyn IStateRepository>,
    dirs: Vec<TempDir>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(test_config(), |ctx| ctx).await
    }

    pub async fn with_config(config: Config, customize: impl FnOnce(SyncContext) -> SyncContext) -> Self {
        let pool = DatabasePool::in_memory().await.expect("in-memory database");
        let repo: Arc<dyn IStateRepository> =
            Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        let ctx = SyncContext::new(&config, Arc::clone(&repo), Arc::new(LocalFileSystemAdapter::new()));
        Self {
            ctx: Arc::new(customize(ctx)),
            repo,
            dirs: Vec::new(),
        }
    }

    /// A second context over the same store, as after a restart
    pub fn reopen(
        &self,
        config: Config,
        customize: impl FnOnce(SyncContext) -> SyncContext,
    ) -> Arc<SyncContext> {
        let ctx = SyncContext::new(&config, Arc::clone(&self.repo), Arc::new(LocalFileSystemAdapter::new()));
        Arc::new(customize(ctx))
    }

    /// A fresh empty directory that lives as long as the environment
    pub fn dir(&mut self) -> PathBuf {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().to_path_buf();
        self.dirs.push(dir);
        path
    }

    pub async fn define(
        &self,
        source: &Path,
        destination: &Path,
        flow_type: FlowType,
        layout: LayoutMode,
        filters: &[&str],
    ) -> SyncFlow {
        self.ctx
            .define_flow(&FlowDefinition {
                name: format!("{flow_type}"),
                source: source.to_path_buf(),
                destination: destination.to_path_buf(),
                flow_type,
                layout,
                filters: filters.iter().map(|f| f.to_string()).collect(),
            })
            .await
            .expect("define flow")
    }

    pub async fn events(&self, flow: &SyncFlow) -> Vec<SyncEventEntry> {
        self.repo.get_events_for_flow(&flow.id, 100).await.expect("event log")
    }

    pub async fn outcomes(&self, flow: &SyncFlow) -> Vec<EventOutcome> {
        let mut outcomes: Vec<EventOutcome> =
            self.events(flow).await.iter().map(|e| e.outcome()).collect();
        // Log is newest first
        outcomes.reverse();
        outcomes
    }
}

pub fn write(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    std::fs::write(path, content).expect("write file");
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).expect("read file")
}

#[cfg(unix)]
pub fn same_inode(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let (a, b) = (std::fs::metadata(a).expect("meta"), std::fs::metadata(b).expect("meta"));
    a.dev() == b.dev() && a.ino() == b.ino()
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let path = path.to_path_buf();
    wait_until(timeout, || {
        let path = path.clone();
        async move { path.exists() }
    })
    .await
}

// ============================================================================
// Remote-copy stand-in
// ============================================================================

/// Finishes every job on its second poll
#[derive(Default)]
pub struct InstantRemote {
    pub requests: AtomicU32,
    polls: AtomicU32,
}

#[async_trait::async_trait]
impl IRemoteCopy for InstantRemote {
    async fn request_copy(&self, _: &Path, _: &Path, _: &[String]) -> anyhow::Result<String> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{n}"))
    }

    async fn poll_job_status(&self, _: &str) -> anyhow::Result<RemoteJobStatus> {
        let finished = self.polls.fetch_add(1, Ordering::SeqCst) >= 1;
        Ok(RemoteJobStatus {
            finished,
            success: finished,
            error: None,
            stats: serde_json::json!({ "transfers": 0 }),
        })
    }

    async fn check_one_way(&self, _: &Path, _: &Path) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Accepts every request and never finishes
#[derive(Default)]
pub struct StuckRemote;

#[async_trait::async_trait]
impl IRemoteCopy for StuckRemote {
    async fn request_copy(&self, _: &Path, _: &Path, _: &[String]) -> anyhow::Result<String> {
        Ok("stuck".to_string())
    }

    async fn poll_job_status(&self, _: &str) -> anyhow::Result<RemoteJobStatus> {
        Ok(RemoteJobStatus {
            finished: false,
            success: false,
            error: None,
            stats: serde_json::Value::Null,
        })
    }

    async fn check_one_way(&self, _: &Path, _: &Path) -> anyhow::Result<bool> {
        Ok(false)
    }
}
