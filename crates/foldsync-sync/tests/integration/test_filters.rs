//! Exclusion filters, at definition time and applied retroactively

use foldsync_core::domain::{EventOutcome, FileEvent, FilterCriteria, FlowType, LayoutMode};

use crate::common::{read, write, TestEnv};

#[tokio::test]
async fn test_filtered_files_are_not_propagated() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[".TMP"])
        .await;

    let kept = source.join("data.csv");
    let dropped = source.join("upload.tmp");
    write(&kept, b"a,b");
    write(&dropped, b"partial");
    env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &kept));
    env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &dropped));
    env.ctx.drain().await;

    assert_eq!(read(&internal.join("data.csv")), b"a,b");
    assert!(!internal.join("upload.tmp").exists());
    assert_eq!(
        env.outcomes(&flow).await,
        vec![EventOutcome::Propagated, EventOutcome::Filtered]
    );
    assert_eq!(env.repo.list_mappings(&flow.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_new_filters_drop_mappings_but_keep_files() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;

    let log = source.join("server.log");
    let csv = source.join("data.csv");
    write(&log, b"boot");
    write(&csv, b"1,2");
    env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &log));
    env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &csv));
    env.ctx.drain().await;
    assert_eq!(env.repo.list_mappings(&flow.id).await.unwrap().len(), 2);

    let updated = env
        .ctx
        .update_filters(&flow.id, FilterCriteria::new(["log"]))
        .await
        .unwrap();
    assert_eq!(updated.filters.as_slice(), ["log".to_string()]);

    let mappings = env.repo.list_mappings(&flow.id).await.unwrap();
    assert_eq!(mappings.len(), 1);
    // No deletion ever reaches the destination
    assert_eq!(read(&internal.join("server.log")), b"boot");

    write(&log, b"boot\nready");
    env.ctx.bus().push_ingress(FileEvent::changed(flow.source_id, &log));
    env.ctx.drain().await;
    // The pair is gone, so the change has nothing to follow
    assert_eq!(env.outcomes(&flow).await.last(), Some(&EventOutcome::Skipped));
    assert_eq!(env.repo.list_mappings(&flow.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_filter_update_drops_queued_work() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    env.ctx.pause_flow(&flow.id).await.unwrap();

    for name in ["a.bak", "b.bak", "c.txt"] {
        let path = source.join(name);
        write(&path, name.as_bytes());
        env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, path));
    }
    env.ctx.drain().await;
    assert_eq!(env.ctx.bus().downstream_len(&flow.id), 3);
    assert_eq!(env.ctx.registry().pending_count(&flow.id), 3);

    env.ctx
        .update_filters(&flow.id, FilterCriteria::new(["bak"]))
        .await
        .unwrap();

    // Cleared, then the cross check re-queues only what the filters allow
    assert_eq!(env.ctx.bus().downstream_len(&flow.id), 1);
    assert_eq!(env.ctx.registry().pending_count(&flow.id), 1);

    env.ctx.resume_flow(&flow.id).await.unwrap();
    env.ctx.drain().await;
    assert!(internal.join("c.txt").exists());
    assert!(!internal.join("a.bak").exists());
}
