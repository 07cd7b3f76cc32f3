//! Background operation: watchers, event pump, dispatcher and bulk copies

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use foldsync_core::config::Config;
use foldsync_core::domain::newtypes::SyncFlowId;
use foldsync_core::domain::{FlowStatus, FlowType, JobKind, JobStatus, LayoutMode};
use foldsync_sync::SyncContext;

use crate::common::{
    read, test_config, wait_for_file, wait_until, write, InstantRemote, StuckRemote, TestEnv,
};

#[tokio::test]
async fn test_started_context_propagates_watched_changes() {
    let mut config = test_config();
    config.sync.poll_interval_ms = 100;
    let mut env = TestEnv::with_config(config, |ctx| ctx).await;
    let (source, internal, content) = (env.dir(), env.dir(), env.dir());
    write(&source.join("before.txt"), b"present at startup");
    env.define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    env.define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;

    env.ctx.start().await.unwrap();

    // Picked up by the startup reconciliation
    let before = content.join("before.txt");
    assert!(wait_for_file(&before, Duration::from_secs(10)).await);

    // Picked up by the watcher
    write(&source.join("live/after.txt"), b"written while running");
    let after = content.join("live/after.txt");
    assert!(wait_for_file(&after, Duration::from_secs(10)).await);
    assert_eq!(read(&after), b"written while running");
    assert_eq!(read(&internal.join("live/after.txt")), b"written while running");

    env.ctx.shutdown().await;
}

#[tokio::test]
async fn test_context_starts_once() {
    let env = TestEnv::new().await;
    env.ctx.start().await.unwrap();
    assert!(env.ctx.start().await.is_err());
    env.ctx.shutdown().await;
}

#[tokio::test]
async fn test_new_publish_flow_runs_bulk_copy() {
    let mut config = test_config();
    config.remote_copy.enabled = true;
    config.remote_copy.bulk_initial_copy = true;
    let remote = Arc::new(InstantRemote::default());
    let handle = Arc::clone(&remote);
    let mut env = TestEnv::with_config(config, move |ctx| ctx.with_remote_copy(handle)).await;
    let (internal, content) = (env.dir(), env.dir());

    let flow = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    assert_eq!(flow.status, FlowStatus::NotSync);
    let running = env.ctx.registry().get(&flow.id).await.unwrap().unwrap();
    assert_eq!(running.status, FlowStatus::Running);

    let registry = Arc::clone(env.ctx.registry());
    let id = flow.id;
    let settled = wait_until(Duration::from_secs(10), || {
        let registry = Arc::clone(&registry);
        async move {
            registry
                .get(&id)
                .await
                .ok()
                .flatten()
                .is_some_and(|f| f.status == FlowStatus::Sync)
        }
    })
    .await;
    assert!(settled, "bulk copy never handed the flow back");

    // Redefinition never repeats the bulk copy
    env.define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    assert_eq!(remote.requests.load(Ordering::SeqCst), 1);

    env.ctx.shutdown().await;
}

async fn wait_for_status(ctx: &Arc<SyncContext>, id: SyncFlowId, status: FlowStatus) -> bool {
    let registry = Arc::clone(ctx.registry());
    wait_until(Duration::from_secs(10), || {
        let registry = Arc::clone(&registry);
        async move {
            registry
                .get(&id)
                .await
                .ok()
                .flatten()
                .is_some_and(|f| f.status == status)
        }
    })
    .await
}

fn bulk_copy_config() -> Config {
    let mut config = test_config();
    config.remote_copy.enabled = true;
    config.remote_copy.bulk_initial_copy = true;
    config
}

#[tokio::test]
async fn test_restart_without_remote_fails_open_bulk_copy() {
    let mut env =
        TestEnv::with_config(bulk_copy_config(), |ctx| ctx.with_remote_copy(Arc::new(StuckRemote))).await;
    let (internal, content) = (env.dir(), env.dir());
    let flow = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    env.ctx.start().await.unwrap();
    let stored = env.repo.get_flow(&flow.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FlowStatus::Running);

    // Pending polls die with the process
    env.ctx.shutdown().await;
    let stored = env.repo.get_flow(&flow.id).await.unwrap().unwrap();
    assert_eq!(stored.status, FlowStatus::Running);

    let restarted = env.reopen(test_config(), |ctx| ctx);
    restarted.start().await.unwrap();

    let stored = env.repo.get_flow(&flow.id).await.unwrap().unwrap();
    assert_ne!(stored.status, FlowStatus::Running);
    assert!(wait_for_status(&restarted, flow.id, FlowStatus::Sync).await);

    let open = env
        .repo
        .get_jobs_by_status(JobKind::BulkCopy, JobStatus::Running)
        .await
        .unwrap();
    assert!(open.is_empty());
    let failed = env
        .repo
        .get_jobs_by_status(JobKind::BulkCopy, JobStatus::Failed)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].flow_id, Some(flow.id));
    assert_eq!(failed[0].message.as_deref(), Some("interrupted by shutdown"));

    restarted.shutdown().await;
}

#[tokio::test]
async fn test_restart_with_remote_resumes_open_bulk_copy() {
    let mut env =
        TestEnv::with_config(bulk_copy_config(), |ctx| ctx.with_remote_copy(Arc::new(StuckRemote))).await;
    let (internal, content) = (env.dir(), env.dir());
    let flow = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    env.ctx.shutdown().await;

    let remote = Arc::new(InstantRemote::default());
    let handle = Arc::clone(&remote);
    let restarted = env.reopen(bulk_copy_config(), move |ctx| ctx.with_remote_copy(handle));
    restarted.start().await.unwrap();

    assert!(
        wait_for_status(&restarted, flow.id, FlowStatus::Sync).await,
        "resumed bulk copy never handed the flow back"
    );
    let done = env
        .repo
        .get_jobs_by_status(JobKind::BulkCopy, JobStatus::Succeeded)
        .await
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].flow_id, Some(flow.id));
    // Polled again, never requested again
    assert_eq!(remote.requests.load(Ordering::SeqCst), 0);

    restarted.shutdown().await;
}
