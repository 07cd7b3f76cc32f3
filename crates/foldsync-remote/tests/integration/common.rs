//! Shared helpers: mounted remote-copy endpoints

use serde_json::Value;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use foldsync_remote::RemoteCopyClient;

/// A mock service plus a client pointed at it
pub async fn setup_remote_mock() -> (MockServer, RemoteCopyClient) {
    let server = MockServer::start().await;
    let client = RemoteCopyClient::new(server.uri()).expect("client");
    (server, client)
}

/// Mount `POST /<command>` answering `status` with `body`, for requests whose
/// JSON contains `expected`
pub async fn mount_command(server: &MockServer, command: &str, expected: Value, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path(format!("/{command}")))
        .and(body_partial_json(expected))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}
