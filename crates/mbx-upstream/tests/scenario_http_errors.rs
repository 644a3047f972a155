//! HTTP status and transport classification against a mock upstream.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use mbx_schemas::Workspace;
use mbx_upstream::{
    CredentialSession, HttpClientConfig, HttpUpstreamClient, RetryPolicy, SessionSettings,
    UpstreamClient, UpstreamError,
};

fn client_with_timeout(server: &MockServer, timeout: Duration) -> HttpUpstreamClient {
    HttpUpstreamClient::new(HttpClientConfig {
        instance_id: "longrun".into(),
        base_url: server.base_url(),
        api_key: "test-key".into(),
        page_size: 100,
        timeout,
    })
    .unwrap()
}

fn client(server: &MockServer) -> HttpUpstreamClient {
    client_with_timeout(server, Duration::from_secs(5))
}

fn session_with_retry(server: &MockServer, attempts: u32) -> CredentialSession {
    CredentialSession::new(
        Arc::new(client(server)),
        SessionSettings {
            retry: RetryPolicy::new(attempts, Duration::from_millis(1)),
            max_pages_per_workspace: 10,
            page_delay: Duration::ZERO,
        },
    )
}

fn ws(id: i64) -> Workspace {
    Workspace {
        instance_id: "longrun".into(),
        external_workspace_id: id,
        name: format!("ws-{id}"),
    }
}

#[tokio::test]
async fn unauthorized_list_is_fatal() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/workspaces");
            then.status(401).body("Unauthenticated.");
        })
        .await;

    let err = client(&server).list_workspaces().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(
        err,
        UpstreamError::Auth {
            status: 401,
            message: "Unauthenticated.".into()
        }
    );
}

#[tokio::test]
async fn server_errors_are_retried_up_to_the_budget() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/workspaces");
            then.status(503);
        })
        .await;

    let err = session_with_retry(&server, 3)
        .list_workspaces()
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(m.hits_async().await, 3);
}

#[tokio::test]
async fn rate_limit_is_network_class() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/sender-emails");
            then.status(429);
        })
        .await;

    let err = client(&server).fetch_accounts_page(None).await.unwrap_err();
    assert_eq!(err.code(), "NETWORK");
}

#[tokio::test]
async fn refused_switch_is_workspace_scoped_and_not_retried() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(POST).path("/workspaces/switch");
            then.status(422).json_body(json!({"message": "team not found"}));
        })
        .await;

    let s = session_with_retry(&server, 3);
    let w = ws(99);
    let err = s.enter(&w).await.err().unwrap();
    match err {
        UpstreamError::WorkspaceSwitch {
            workspace_id,
            status,
            ..
        } => {
            assert_eq!(workspace_id, 99);
            assert_eq!(status, 422);
        }
        other => panic!("expected WorkspaceSwitch, got {other:?}"),
    }
    assert_eq!(m.hits_async().await, 1);
}

#[tokio::test]
async fn forbidden_switch_is_fatal() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/workspaces/switch");
            then.status(403);
        })
        .await;

    let err = client(&server).switch_workspace(1).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn not_found_fetch_is_api_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/sender-emails");
            then.status(404);
        })
        .await;

    let err = client(&server).fetch_accounts_page(None).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Api { status: 404, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/sender-emails");
            then.status(200).body("<html>maintenance</html>");
        })
        .await;

    let err = client(&server).fetch_accounts_page(None).await.unwrap_err();
    assert_eq!(err.code(), "DECODE");
}

#[tokio::test]
async fn slow_response_times_out_as_network() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/workspaces");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!({"data": []}));
        })
        .await;

    let err = client_with_timeout(&server, Duration::from_millis(50))
        .list_workspaces()
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "{err}");
}
