//! Snapshot runner against a scripted stand-in for the backup tool

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use foldsync_core::ports::ISnapshotService;
use foldsync_remote::{RemoteError, ResticSnapshot};

/// Write an executable shell script into `dir`
fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-restic");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_backup_reads_summary() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args");
    let tool = script(
        dir.path(),
        &format!(
            "echo \"$@\" > {}\n\
             echo '{{\"message_type\":\"status\",\"percent_done\":1}}'\n\
             echo '{{\"message_type\":\"summary\",\"files_new\":2,\"snapshot_id\":\"5f3a\"}}'",
            args_file.display()
        ),
    );
    let runner = ResticSnapshot::new(tool.to_string_lossy(), "/srv/backups");

    let summary = runner.backup(Path::new("/srv/www")).await.unwrap();

    assert_eq!(summary.snapshot_id.as_deref(), Some("5f3a"));
    assert_eq!(summary.stats["files_new"], 2);
    let args = std::fs::read_to_string(args_file).unwrap();
    assert_eq!(args.trim(), "-r /srv/backups backup --json /srv/www");
}

#[tokio::test]
async fn test_failing_tool_reports_last_stderr_line() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(
        dir.path(),
        "echo 'opening repository' >&2\necho 'Fatal: wrong password' >&2\nexit 1",
    );
    let runner = ResticSnapshot::new(tool.to_string_lossy(), "/srv/backups");

    let err = runner.run_backup(Path::new("/srv/www")).await.unwrap_err();

    match err {
        RemoteError::SnapshotFailed(message) => assert!(message.contains("Fatal: wrong password")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_silent_tool_is_invalid_response() {
    let dir = tempfile::tempdir().unwrap();
    let tool = script(dir.path(), "exit 0");
    let runner = ResticSnapshot::new(tool.to_string_lossy(), "/srv/backups");

    let err = runner.run_backup(Path::new("/srv/www")).await.unwrap_err();

    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}
