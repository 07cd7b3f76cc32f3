//! Flow definition, pause/resume isolation and deletion

use foldsync_core::config::FlowDefinition;
use foldsync_core::domain::{FileEvent, FlowStatus, FlowType, LayoutMode, SyncFlowId};
use foldsync_sync::SyncError;

use crate::common::{write, TestEnv};

#[tokio::test]
async fn test_define_flow_is_idempotent() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());

    let first = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let second = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;

    assert_eq!(first.id, second.id);
    assert_eq!(env.ctx.registry().list().await.unwrap().len(), 1);
    assert_eq!(env.ctx.folders().list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_redefinition_applies_new_filters() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    env.define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;

    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &["tmp"])
        .await;

    assert_eq!(flow.filters.as_slice(), ["tmp".to_string()]);
    let stored = env.repo.get_flow(&flow.id).await.unwrap().unwrap();
    assert_eq!(stored.filters, flow.filters);
}

#[tokio::test]
async fn test_define_flow_rejects_role_conflicts() {
    let mut env = TestEnv::new().await;
    let (source, internal, content) = (env.dir(), env.dir(), env.dir());
    env.define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;

    // `source` is already a source folder; it cannot also be an internal one
    let result = env
        .ctx
        .define_flow(&FlowDefinition {
            name: "bad".to_string(),
            source: source.clone(),
            destination: content,
            flow_type: FlowType::InternalToContent,
            layout: LayoutMode::Mirror,
            filters: Vec::new(),
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_paused_flow_does_not_block_siblings() {
    let mut env = TestEnv::new().await;
    let (source, held, open) = (env.dir(), env.dir(), env.dir());
    let paused = env
        .define(&source, &held, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let running = env
        .define(&source, &open, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    env.ctx.pause_flow(&paused.id).await.unwrap();

    let file = source.join("shared.txt");
    write(&file, b"fan out");
    env.ctx.bus().push_ingress(FileEvent::created(paused.source_id, &file));
    env.ctx.drain().await;

    assert!(open.join("shared.txt").exists());
    assert!(!held.join("shared.txt").exists());
    assert_eq!(env.ctx.bus().downstream_len(&paused.id), 1);
    assert_eq!(status_of(&env, paused.id).await, FlowStatus::Pause);
    assert_eq!(status_of(&env, running.id).await, FlowStatus::Sync);

    let resumed = env.ctx.resume_flow(&paused.id).await.unwrap();
    assert_eq!(resumed.status, FlowStatus::NotSync);
    env.ctx.drain().await;

    assert!(held.join("shared.txt").exists());
    assert_eq!(status_of(&env, paused.id).await, FlowStatus::Sync);
}

async fn status_of(env: &TestEnv, id: SyncFlowId) -> FlowStatus {
    env.ctx.registry().get(&id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_pause_unknown_flow_fails() {
    let env = TestEnv::new().await;
    let err = env
        .ctx
        .pause_flow(&SyncFlowId::new())
        .await
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::UnknownFlow(_))));
}

#[tokio::test]
async fn test_delete_flow_retires_unused_folders_and_keeps_files() {
    let mut env = TestEnv::new().await;
    let (source, internal, content) = (env.dir(), env.dir(), env.dir());
    let ingest = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let publish = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;

    let file = source.join("x.txt");
    write(&file, b"x");
    env.ctx.bus().push_ingress(FileEvent::created(ingest.source_id, &file));
    env.ctx.drain().await;

    env.ctx.pause_flow(&publish.id).await.unwrap();
    write(&file, b"xx");
    env.ctx.bus().push_ingress(FileEvent::changed(ingest.source_id, &file));
    env.ctx.drain().await;
    assert_eq!(env.ctx.bus().downstream_len(&publish.id), 1);

    assert!(env.ctx.delete_flow(&publish.id).await.unwrap());

    assert_eq!(env.ctx.bus().downstream_len(&publish.id), 0);
    assert!(env.ctx.registry().get(&publish.id).await.unwrap().is_none());
    // Content had no other flow; internal is still the ingest destination
    assert!(env.ctx.folders().get(&publish.destination_id).await.unwrap().is_none());
    assert!(env.ctx.folders().get(&publish.source_id).await.unwrap().is_some());
    assert!(content.join("x.txt").exists());

    assert!(!env.ctx.delete_flow(&publish.id).await.unwrap());
}

#[tokio::test]
async fn test_snapshot_without_service_is_a_no_op() {
    let env = TestEnv::new().await;
    assert!(env.ctx.snapshot_all().await.unwrap().is_empty());
}
