//! Destination layout: mirror keeps the tree, flatten names by identity

use foldsync_core::domain::identity::flatten_name;
use foldsync_core::domain::{FileEvent, FileLocation, FlowType, LayoutMode};

use crate::common::{read, write, TestEnv};

#[tokio::test]
async fn test_mirror_preserves_relative_paths() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Mirror, &[])
        .await;

    for rel in ["top.txt", "a/b/deep.txt", "no_extension"] {
        let path = source.join(rel);
        write(&path, rel.as_bytes());
        env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, path));
    }
    env.ctx.drain().await;

    for rel in ["top.txt", "a/b/deep.txt", "no_extension"] {
        assert_eq!(read(&internal.join(rel)), rel.as_bytes());
    }
}

#[tokio::test]
async fn test_flatten_keeps_same_named_files_apart() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Flatten, &[])
        .await;

    let first = source.join("trip/day1/photo.jpg");
    let second = source.join("trip/day2/photo.jpg");
    write(&first, b"day one");
    write(&second, b"day two");
    env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &first));
    env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &second));
    env.ctx.drain().await;

    let mut names: Vec<String> = std::fs::read_dir(&internal)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2, "flatten must not nest or collide: {names:?}");
    assert!(names.iter().all(|n| n.starts_with("photo-") && n.ends_with(".jpg")));
    assert_ne!(names[0], names[1]);

    // Names are a pure function of source folder and relative path
    let folder = env.ctx.folders().get(&flow.source_id).await.unwrap().unwrap();
    let location = FileLocation::resolve(&folder.path, &first).unwrap();
    let expected = internal.join(flatten_name(flow.source_id, &location));
    assert_eq!(read(&expected), b"day one");
}

#[tokio::test]
async fn test_flatten_name_is_stable_across_changes() {
    let mut env = TestEnv::new().await;
    let (source, internal) = (env.dir(), env.dir());
    let flow = env
        .define(&source, &internal, FlowType::SourceToInternal, LayoutMode::Flatten, &[])
        .await;

    let file = source.join("x/report.pdf");
    write(&file, b"draft");
    env.ctx.bus().push_ingress(FileEvent::created(flow.source_id, &file));
    env.ctx.drain().await;

    // A fresh inode so the first hop is re-linked rather than shared
    std::fs::remove_file(&file).unwrap();
    write(&file, b"final");
    env.ctx.bus().push_ingress(FileEvent::changed(flow.source_id, &file));
    env.ctx.drain().await;

    let entries: Vec<_> = std::fs::read_dir(&internal).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let only = entries.into_iter().next().unwrap().unwrap().path();
    assert_eq!(read(&only), b"final");
}
