//! Propagation along a source → internal → content chain

use std::path::Path;

use foldsync_core::domain::{
    ChangeKind, DownstreamEvent, EventOutcome, FileEvent, FlowStatus, FlowType, LayoutMode,
    SyncFlow,
};

use crate::common::{read, same_inode, write, TestEnv};

struct Chain {
    env: TestEnv,
    source: std::path::PathBuf,
    internal: std::path::PathBuf,
    content: std::path::PathBuf,
    ingest: SyncFlow,
    publish: SyncFlow,
}

async fn chain() -> Chain {
    let mut env = TestEnv::new().await;
    let source = env.dir();
    let internal = env.dir();
    let content = env.dir();
    let ingest = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let publish = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    Chain {
        env,
        source,
        internal,
        content,
        ingest,
        publish,
    }
}

impl Chain {
    fn push(&self, event: FileEvent) {
        self.env.ctx.bus().push_ingress(event);
    }
}

#[tokio::test]
async fn test_new_file_reaches_both_hops() {
    let c = chain().await;
    let file = c.source.join("albums/2024/cover.jpg");
    write(&file, b"jpeg bytes");

    c.push(FileEvent::created(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    let internal_copy = c.internal.join("albums/2024/cover.jpg");
    let content_copy = c.content.join("albums/2024/cover.jpg");
    assert_eq!(read(&internal_copy), b"jpeg bytes");
    assert_eq!(read(&content_copy), b"jpeg bytes");
    assert!(same_inode(&file, &internal_copy), "first hop must hardlink");
    assert!(!same_inode(&internal_copy, &content_copy), "later hops must copy");

    assert_eq!(c.env.outcomes(&c.ingest).await, vec![EventOutcome::Propagated]);
    assert_eq!(c.env.outcomes(&c.publish).await, vec![EventOutcome::Propagated]);

    for flow in [&c.ingest, &c.publish] {
        let flow = c.env.ctx.registry().get(&flow.id).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::Sync);
        assert!(flow.last_sync.is_some());
        assert_eq!(c.env.repo.list_mappings(&flow.id).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_content_change_propagates() {
    let c = chain().await;
    let file = c.source.join("notes.txt");
    write(&file, b"v1");
    c.push(FileEvent::created(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    write(&file, b"version two");
    c.push(FileEvent::changed(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    assert_eq!(read(&c.internal.join("notes.txt")), b"version two");
    assert_eq!(read(&c.content.join("notes.txt")), b"version two");
    assert_eq!(
        c.env.outcomes(&c.publish).await,
        vec![EventOutcome::Propagated, EventOutcome::Propagated]
    );
}

#[tokio::test]
async fn test_replayed_create_is_idempotent() {
    let c = chain().await;
    let file = c.source.join("a.txt");
    write(&file, b"same");

    c.push(FileEvent::created(c.ingest.source_id, &file));
    c.env.ctx.drain().await;
    c.push(FileEvent::created(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    // Second ingress sees unchanged content and emits nothing
    assert_eq!(c.env.outcomes(&c.ingest).await.len(), 1);
    assert_eq!(c.env.repo.list_mappings(&c.ingest.id).await.unwrap().len(), 1);
    assert_eq!(read(&c.content.join("a.txt")), b"same");
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
        .sum()
}

async fn publish_one(layout: LayoutMode) -> (TestEnv, SyncFlow, std::path::PathBuf) {
    let mut env = TestEnv::new().await;
    let (internal, content) = (env.dir(), env.dir());
    let flow = env
        .define(&internal, &content, FlowType::InternalToContent, layout, &[])
        .await;
    write(&internal.join("docs/page.html"), b"<html>");
    (env, flow, content)
}

#[tokio::test]
async fn test_replayed_downstream_create_is_idempotent() {
    for layout in [LayoutMode::Mirror, LayoutMode::Flatten] {
        let (env, flow, content) = publish_one(layout).await;
        let source_root = env.ctx.folders().get(&flow.source_id).await.unwrap().unwrap();
        let file = source_root.path.as_path().join("docs/page.html");
        env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &file));
        env.ctx.drain().await;
        let first = env.repo.list_mappings(&flow.id).await.unwrap().remove(0);

        env.ctx
            .bus()
            .push_downstream(
                DownstreamEvent::new(flow.source_id, first.source_file_id, ChangeKind::Created)
                    .for_flow(flow.id),
            )
            .await
            .unwrap();
        env.ctx.drain().await;

        let mappings = env.repo.list_mappings(&flow.id).await.unwrap();
        assert_eq!(mappings.len(), 1, "{layout}");
        assert_eq!(mappings[0].destination_file_id, first.destination_file_id, "{layout}");
        assert!(!mappings[0].desynced, "{layout}");
        assert_eq!(count_files(&content), 1, "{layout}");
        assert_eq!(
            env.outcomes(&flow).await,
            vec![EventOutcome::Propagated, EventOutcome::Propagated],
            "{layout}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_for_same_file_converge() {
    for layout in [LayoutMode::Mirror, LayoutMode::Flatten] {
        let (env, flow, content) = publish_one(layout).await;
        let source_root = env.ctx.folders().get(&flow.source_id).await.unwrap().unwrap();
        let file = source_root.path.as_path().join("docs/page.html");
        let engine = env.ctx.engine();
        engine
            .handle_ingress(FileEvent::created(flow.source_id, &file))
            .await
            .unwrap();

        // The queued create and a duplicate of it, handled side by side
        let original = env.ctx.bus().poll_downstream().unwrap();
        env.ctx.bus().push_downstream(original.clone()).await.unwrap();
        let duplicate = env.ctx.bus().poll_downstream().unwrap();
        let (a, b) = tokio::join!(
            engine.handle_downstream(original),
            engine.handle_downstream(duplicate)
        );

        assert_ne!(a, EventOutcome::Failed, "{layout}");
        assert_ne!(b, EventOutcome::Failed, "{layout}");
        assert_eq!(env.repo.list_mappings(&flow.id).await.unwrap().len(), 1, "{layout}");
        assert_eq!(count_files(&content), 1, "{layout}");
        assert_eq!(env.ctx.registry().pending_count(&flow.id), 0);
        let flow = env.ctx.registry().get(&flow.id).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::Sync);
    }
}

#[tokio::test]
async fn test_source_deletion_never_removes_destinations() {
    let c = chain().await;
    let file = c.source.join("keep.txt");
    write(&file, b"keep me");
    c.push(FileEvent::created(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    std::fs::remove_file(&file).unwrap();
    c.push(FileEvent::deleted(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    assert_eq!(read(&c.internal.join("keep.txt")), b"keep me");
    assert_eq!(read(&c.content.join("keep.txt")), b"keep me");
    assert_eq!(
        c.env.outcomes(&c.ingest).await,
        vec![EventOutcome::Propagated, EventOutcome::Desynced]
    );
    let mappings = c.env.repo.list_mappings(&c.ingest.id).await.unwrap();
    assert!(mappings.iter().all(|m| m.desynced));

    // The downstream pair is untouched
    let mappings = c.env.repo.list_mappings(&c.publish.id).await.unwrap();
    assert!(mappings.iter().all(|m| !m.desynced));
}

#[tokio::test]
async fn test_deleted_event_for_present_file_is_treated_as_update() {
    let c = chain().await;
    let file = c.source.join("flaky.txt");
    write(&file, b"still here");

    c.push(FileEvent::deleted(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    assert_eq!(read(&c.internal.join("flaky.txt")), b"still here");
}

#[tokio::test]
async fn test_user_edit_at_destination_is_never_overwritten() {
    let c = chain().await;
    let file = c.source.join("doc.txt");
    write(&file, b"original");
    c.push(FileEvent::created(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    let published = c.content.join("doc.txt");
    write(&published, b"edited by hand");
    c.push(FileEvent::changed(c.publish.destination_id, &published));
    c.env.ctx.drain().await;

    let mapping = &c.env.repo.list_mappings(&c.publish.id).await.unwrap()[0];
    assert!(mapping.desynced);

    write(&file, b"newer upstream");
    c.push(FileEvent::changed(c.ingest.source_id, &file));
    c.env.ctx.drain().await;

    assert_eq!(read(&c.internal.join("doc.txt")), b"newer upstream");
    assert_eq!(read(&published), b"edited by hand");
    assert_eq!(
        c.env.outcomes(&c.publish).await,
        vec![EventOutcome::Propagated, EventOutcome::Skipped]
    );
}

#[tokio::test]
async fn test_pending_counter_drives_status() {
    let c = chain().await;
    let file = c.source.join("count.txt");
    write(&file, b"1");

    c.env
        .ctx
        .engine()
        .handle_ingress(FileEvent::created(c.ingest.source_id, &file))
        .await
        .unwrap();

    let registry = c.env.ctx.registry();
    assert_eq!(registry.pending_count(&c.ingest.id), 1);
    let flow = registry.get(&c.ingest.id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::NotSync);

    c.env.ctx.drain().await;

    assert_eq!(registry.pending_count(&c.ingest.id), 0);
    let flow = registry.get(&c.ingest.id).await.unwrap().unwrap();
    assert_eq!(flow.status, FlowStatus::Sync);
}
