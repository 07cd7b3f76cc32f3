//! Full-scan and cross-folder reconciliation

use foldsync_core::domain::{FlowType, LayoutMode};

use crate::common::{read, same_inode, write, TestEnv};

#[tokio::test]
async fn test_full_scan_converges_after_offline_drift() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;

    for i in 0..10 {
        write(&source.join(format!("f{i:02}.txt")), format!("file {i}").as_bytes());
    }
    let (scans, _) = env.ctx.reconcile_all().await.unwrap();
    let source_scan = scans.iter().find(|s| s.folder_id == Some(flow.source_id)).unwrap();
    assert_eq!(source_scan.created, 10);
    env.ctx.drain().await;
    assert_eq!(env.repo.list_mappings(&flow.id).await.unwrap().len(), 10);

    // Drift while nothing was watching
    write(&source.join("f00.txt"), b"edited zero");
    write(&source.join("f01.txt"), b"edited one");
    std::fs::remove_file(source.join("f02.txt")).unwrap();
    write(&source.join("new.txt"), b"brand new");

    let folder = env.ctx.folders().get(&flow.source_id).await.unwrap().unwrap();
    let report = env.ctx.reconciler().full_scan(&folder).await.unwrap();
    assert_eq!(report.changed, 2);
    assert_eq!(report.created, 1);
    assert_eq!(report.purged, 1);
    assert_eq!(report.unchanged, 7);

    env.ctx.drain().await;
    assert_eq!(read(&internal.join("new.txt")), b"brand new");
    assert_eq!(read(&internal.join("f00.txt")), b"edited zero");
    // Purged records are never propagated as deletions
    assert_eq!(read(&internal.join("f02.txt")), b"file 2");

    let again = env.ctx.reconciler().full_scan(&folder).await.unwrap();
    assert!(again.in_sync(), "second pass must be quiet: {again:?}");
    assert_eq!(again.unchanged, 10);
}

#[tokio::test]
async fn test_cross_check_restores_lost_internal_copy() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let file = source.join("precious.raw");
    write(&file, b"raw");
    env.ctx.reconcile_all().await.unwrap();
    env.ctx.drain().await;

    std::fs::remove_file(internal.join("precious.raw")).unwrap();
    let flow = env.ctx.registry().get(&flow.id).await.unwrap().unwrap();
    let report = env.ctx.reconciler().cross_check(&flow).await.unwrap();
    assert_eq!(report.missing, 1);

    env.ctx.drain().await;
    assert!(same_inode(&file, &internal.join("precious.raw")));
    assert!(env.ctx.reconciler().cross_check(&flow).await.unwrap().in_sync());
}

#[tokio::test]
async fn test_cross_check_desyncs_lost_content_copy() {
    let mut env = TestEnv::new().await;
    let (source, internal, content) = (env.dir(), env.dir(), env.dir());
    env.define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let publish = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    write(&source.join("page.html"), b"<html>");
    env.ctx.reconcile_all().await.unwrap();
    env.ctx.drain().await;
    assert!(content.join("page.html").exists());

    // Removed from a user-facing folder: respected, not restored
    std::fs::remove_file(content.join("page.html")).unwrap();
    let report = env.ctx.reconciler().cross_check(&publish).await.unwrap();
    assert_eq!(report.desynced, 1);
    assert_eq!(report.missing, 0);

    let mappings = env.repo.list_mappings(&publish.id).await.unwrap();
    assert!(mappings[0].desynced);
    env.ctx.drain().await;
    assert!(!content.join("page.html").exists());
}

#[tokio::test]
async fn test_full_pass_keeps_removed_content_copy_removed() {
    let mut env = TestEnv::new().await;
    let (source, internal, content) = (env.dir(), env.dir(), env.dir());
    env.define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let publish = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    write(&source.join("page.html"), b"<html>");
    env.ctx.reconcile_all().await.unwrap();
    env.ctx.drain().await;
    assert!(content.join("page.html").exists());

    // The content scan purges the record before the cross check runs
    std::fs::remove_file(content.join("page.html")).unwrap();
    let (scans, checks) = env.ctx.reconcile_all().await.unwrap();
    let content_scan = scans
        .iter()
        .find(|s| s.folder_id == Some(publish.destination_id))
        .unwrap();
    assert_eq!(content_scan.purged, 1);
    let publish_check = checks.iter().find(|c| c.flow_id == Some(publish.id)).unwrap();
    assert_eq!(publish_check.missing, 0);
    assert_eq!(publish_check.desynced, 1);

    env.ctx.drain().await;
    assert!(!content.join("page.html").exists());
    let mappings = env.repo.list_mappings(&publish.id).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(mappings[0].desynced);

    // Later passes stay quiet
    env.ctx.reconcile_all().await.unwrap();
    env.ctx.drain().await;
    assert!(!content.join("page.html").exists());
}

#[tokio::test]
async fn test_full_pass_restores_purged_internal_copy() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let file = source.join("precious.raw");
    write(&file, b"raw");
    env.ctx.reconcile_all().await.unwrap();
    env.ctx.drain().await;

    std::fs::remove_file(internal.join("precious.raw")).unwrap();
    let (scans, checks) = env.ctx.reconcile_all().await.unwrap();
    let internal_scan = scans
        .iter()
        .find(|s| s.folder_id == Some(flow.destination_id))
        .unwrap();
    assert_eq!(internal_scan.purged, 1);
    let check = checks.iter().find(|c| c.flow_id == Some(flow.id)).unwrap();
    assert_eq!(check.missing, 1);

    env.ctx.drain().await;
    assert!(same_inode(&file, &internal.join("precious.raw")));
    let mappings = env.repo.list_mappings(&flow.id).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert!(!mappings[0].desynced);
}

#[tokio::test]
async fn test_cross_check_requeues_stale_destination() {
    let mut env = TestEnv::new().await;
    let (source, internal, content) = (env.dir(), env.dir(), env.dir());
    let ingest = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;
    let publish = env
        .define(&internal, &content, FlowType::InternalToContent, LayoutMode::Mirror, &[])
        .await;
    write(&source.join("a.txt"), b"one");
    env.ctx.reconcile_all().await.unwrap();
    env.ctx.drain().await;

    // Source and internal share an inode; pause publishing so only the first hop moves
    env.ctx.pause_flow(&publish.id).await.unwrap();
    write(&source.join("a.txt"), b"two");
    let folder = env.ctx.folders().get(&ingest.source_id).await.unwrap().unwrap();
    env.ctx.reconciler().full_scan(&folder).await.unwrap();
    env.ctx.drain().await;
    assert_eq!(env.ctx.bus().downstream_len(&publish.id), 1);

    // Lose the queued event; the cross check must find the gap again
    let dropped = env.ctx.bus().clear(&publish.id);
    env.ctx
        .registry()
        .discard_pending(&publish.id, dropped as i64)
        .await
        .unwrap();
    env.ctx.resume_flow(&publish.id).await.unwrap();
    let publish = env.ctx.registry().get(&publish.id).await.unwrap().unwrap();
    let report = env.ctx.reconciler().cross_check(&publish).await.unwrap();
    assert_eq!(report.changed, 1);

    env.ctx.drain().await;
    assert_eq!(read(&content.join("a.txt")), b"two");
}
