//! Remote-copy client against a mocked rc API

use std::path::Path;

use foldsync_core::ports::IRemoteCopy;
use foldsync_remote::RemoteError;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{mount_command, setup_remote_mock};

#[tokio::test]
async fn test_request_copy_sends_async_copy_with_filters() {
    let (server, client) = setup_remote_mock().await;
    mount_command(
        &server,
        "sync/copy",
        json!({
            "srcFs": "/srv/internal",
            "dstFs": "/srv/www",
            "_async": true,
            "_filter": { "ExcludeRule": ["*.tmp*"], "IgnoreCase": true }
        }),
        200,
        json!({ "jobid": 42 }),
    )
    .await;

    let job = client
        .request_copy(
            Path::new("/srv/internal"),
            Path::new("/srv/www"),
            &[".tmp".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(job, "42");
}

#[tokio::test]
async fn test_unfiltered_copy_omits_filter() {
    let (server, client) = setup_remote_mock().await;
    Mock::given(method("POST"))
        .and(path("/sync/copy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobid": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    client
        .start_copy(Path::new("/a"), Path::new("/b"), &[])
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("_filter").is_none());
}

#[tokio::test]
async fn test_running_job_status() {
    let (server, client) = setup_remote_mock().await;
    mount_command(
        &server,
        "job/status",
        json!({ "jobid": 42 }),
        200,
        json!({ "finished": false, "success": false, "error": "", "output": {} }),
    )
    .await;

    let status = client.poll_job_status("42").await.unwrap();

    assert!(!status.finished);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_finished_job_carries_group_stats() {
    let (server, client) = setup_remote_mock().await;
    mount_command(
        &server,
        "job/status",
        json!({ "jobid": 42 }),
        200,
        json!({ "finished": true, "success": true, "error": "" }),
    )
    .await;
    mount_command(
        &server,
        "core/stats",
        json!({ "group": "job/42" }),
        200,
        json!({ "transfers": 12, "bytes": 4096 }),
    )
    .await;

    let status = client.job_status(42).await.unwrap();

    assert!(status.finished && status.success);
    assert_eq!(status.stats["transfers"], 12);
}

#[tokio::test]
async fn test_failed_job_reports_error_text() {
    let (server, client) = setup_remote_mock().await;
    mount_command(
        &server,
        "job/status",
        json!({ "jobid": 9 }),
        200,
        json!({ "finished": true, "success": false, "error": "directory not found" }),
    )
    .await;

    let status = client.job_status(9).await.unwrap();

    assert!(status.finished);
    assert!(!status.success);
    assert_eq!(status.error.as_deref(), Some("directory not found"));
}

#[tokio::test]
async fn test_service_error_maps_to_http_status() {
    let (server, client) = setup_remote_mock().await;
    mount_command(
        &server,
        "sync/copy",
        json!({}),
        500,
        json!({ "error": "source not found", "status": 500 }),
    )
    .await;

    let err = client
        .start_copy(Path::new("/missing"), Path::new("/b"), &[])
        .await
        .unwrap_err();

    match err {
        RemoteError::HttpStatus { status, path, message } => {
            assert_eq!(status, 500);
            assert_eq!(path, "sync/copy");
            assert_eq!(message, "source not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_answer_is_invalid_response() {
    let (server, client) = setup_remote_mock().await;
    mount_command(&server, "sync/copy", json!({}), 200, json!({ "job": "nope" })).await;

    let err = client
        .start_copy(Path::new("/a"), Path::new("/b"), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_one_way_check_verdicts() {
    let (server, client) = setup_remote_mock().await;
    mount_command(
        &server,
        "operations/check",
        json!({ "srcFs": "/same", "oneWay": true }),
        200,
        json!({ "success": true, "status": "OK" }),
    )
    .await;
    mount_command(
        &server,
        "operations/check",
        json!({ "srcFs": "/drifted", "oneWay": true }),
        500,
        json!({ "error": "2 differences found", "status": 500 }),
    )
    .await;

    assert!(client
        .check_one_way(Path::new("/same"), Path::new("/dst"))
        .await
        .unwrap());
    assert!(!client
        .check_one_way(Path::new("/drifted"), Path::new("/dst"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unreachable_service_is_network_error() {
    let client = foldsync_remote::RemoteCopyClient::new("http://127.0.0.1:9").unwrap();

    let err = client.job_status(1).await.unwrap_err();

    assert!(matches!(err, RemoteError::Network(_)));
}
