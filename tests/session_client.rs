mod common;

use common::MockProxy;
use meshprov::{
    error::ErrorKind,
    http_client::http_client,
    session_client::{Credentials, SessionClient},
};
use serde_json::json;
use std::time::Duration;

fn session_client() -> SessionClient {
    SessionClient::new(http_client(Duration::from_secs(5)).expect("failed to create client"))
}

#[tokio::test]
async fn session_token_is_returned() {
    let proxy = MockProxy::start(|_| (200, r#"{"sessionID":"abc123"}"#.to_string())).await;

    let session = session_client()
        .authenticate(&proxy.url, &Credentials::new("admin", "admin"))
        .await
        .unwrap();

    assert_eq!(session.token, "abc123");
    assert_eq!(session.authorization(), "bearer abc123");

    let request = &proxy.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/session");
    assert_eq!(request.json(), json!({"username": "admin", "password": "admin"}));
}

#[tokio::test]
async fn missing_session_id_is_auth_error() {
    let proxy = MockProxy::start(|_| (200, r#"{"status":"ok"}"#.to_string())).await;

    let err = session_client()
        .authenticate(&proxy.url, &Credentials::new("admin", "admin"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthError);
}

#[tokio::test]
async fn rejected_credentials_are_auth_error() {
    let proxy = MockProxy::start(|_| (401, String::new())).await;

    let err = session_client()
        .authenticate(&proxy.url, &Credentials::new("admin", "wrong"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthError);
    assert!(!err.is_retriable());
}
