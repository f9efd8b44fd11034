//! Router against stub downstream services.

use std::sync::Arc;

use serde_json::json;

use relay_gateway::gateway::RpcLogDelivery;
use relay_gateway::transport::{MemoryLogSink, RpcClient, RpcServer};
use relay_gateway::{LogPayload, ResponseEnvelope};

use crate::support::{router, unreachable_log, Stub};

async fn silent() -> Stub {
    Stub::start(202, json!({ "error": false, "message": "ok" })).await
}

const AUTH: &[u8] = br#"{"action":"auth","auth":{"email":"admin@example.com","password":"verysecret"}}"#;

#[tokio::test]
async fn auth_401_is_invalid_credentials() {
    let auth = Stub::start(401, json!({ "error": true, "message": "nope" })).await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router.handle_json(AUTH).await;
    assert_eq!(status, 400);
    assert_eq!(response, ResponseEnvelope::failure("invalid credentials"));
    assert_eq!(auth.calls(), 1);
}

#[tokio::test]
async fn auth_202_with_error_flag_is_invalid_credentials() {
    let auth = Stub::start(202, json!({ "error": true, "message": "bad password" })).await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router.handle_json(AUTH).await;
    assert_eq!(status, 400);
    assert!(response.error);
    assert_eq!(response.message, "invalid credentials");
}

#[tokio::test]
async fn auth_202_ok_passes_data_through() {
    let user = json!({ "id": 1, "email": "admin@example.com", "first_name": "Admin" });
    let auth = Stub::start(
        202,
        json!({ "error": false, "message": "Logged in", "data": user }),
    )
    .await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router.handle_json(AUTH).await;
    assert_eq!(status, 202);
    assert!(!response.error);
    assert_eq!(response.message, "authenticated");
    assert_eq!(response.data, Some(user));

    assert_eq!(
        auth.requests(),
        vec![json!({ "email": "admin@example.com", "password": "verysecret" })]
    );
}

#[tokio::test]
async fn auth_unexpected_status_is_upstream_failure() {
    let auth = Stub::start(500, json!({})).await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router.handle_json(AUTH).await;
    assert_eq!(status, 400);
    assert!(response.message.starts_with("upstream call failed"));
}

#[tokio::test]
async fn auth_202_with_unreadable_body_is_upstream_failure() {
    let auth = Stub::start_raw(202, "<html>proxy error</html>").await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router.handle_json(AUTH).await;
    assert_eq!(status, 400);
    assert!(response.error);
    assert!(
        response.message.starts_with("upstream call failed"),
        "{}",
        response.message
    );
    assert_eq!(auth.calls(), 1);
}

#[tokio::test]
async fn mail_is_forwarded_verbatim() {
    let auth = silent().await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let envelope = json!({
        "action": "mail",
        "mail": {
            "from": "me@example.com",
            "to": "you@example.com",
            "subject": "Test",
            "message": "Hello world"
        }
    });
    let (status, response) = router.handle_json(envelope.to_string().as_bytes()).await;
    assert_eq!(status, 202);
    assert_eq!(response, ResponseEnvelope::ok("message sent to you@example.com"));
    assert_eq!(mail.requests(), vec![envelope["mail"].clone()]);
    assert_eq!(auth.calls(), 0);
}

#[tokio::test]
async fn mail_rejection_is_delivery_failure() {
    let auth = silent().await;
    let mail = Stub::start(500, json!({ "error": true })).await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router
        .handle_json(br#"{"action":"mail","mail":{"to":"you@example.com"}}"#)
        .await;
    assert_eq!(status, 400);
    assert!(response.message.starts_with("mail delivery failed"));
}

#[tokio::test]
async fn unknown_action_reaches_no_downstream() {
    let auth = silent().await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router
        .handle_json(br#"{"action":"refund","auth":{"email":"a"},"mail":{"to":"b"}}"#)
        .await;
    assert_eq!(status, 400);
    assert_eq!(response, ResponseEnvelope::failure("unknown action"));
    assert_eq!(auth.calls() + mail.calls(), 0);
}

#[tokio::test]
async fn log_over_rpc_returns_server_result() {
    let sink = MemoryLogSink::new();
    let server = Arc::new(RpcServer::new(Arc::new(sink.clone())));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(listener, std::future::pending()));

    let auth = silent().await;
    let mail = silent().await;
    let log = Arc::new(RpcLogDelivery::new(RpcClient::new(addr)));
    let router = router(&auth, &mail, log);

    let (status, response) = router
        .handle_json(br#"{"action":"log","log":{"name":"event","data":"Some kind of data"}}"#)
        .await;
    assert_eq!(status, 202);
    assert_eq!(response, ResponseEnvelope::ok("Processed payload via RPC: event!"));
    assert_eq!(sink.entries(), vec![LogPayload::new("event", "Some kind of data")]);
}

#[tokio::test]
async fn log_delivery_failure_is_reported() {
    let auth = silent().await;
    let mail = silent().await;
    let router = router(&auth, &mail, unreachable_log());

    let (status, response) = router
        .handle_json(br#"{"action":"log","log":{"name":"event","data":"x"}}"#)
        .await;
    assert_eq!(status, 400);
    assert!(response.message.starts_with("log delivery failed"));
}
