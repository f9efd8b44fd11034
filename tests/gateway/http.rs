//! Gateway HTTP surface, exercised with reqwest.

use std::sync::Arc;

use serde_json::{json, Value};

use relay_gateway::gateway::{self, GatewayState, HttpLogDelivery, LogDelivery};
use relay_gateway::transport::{log_router, HttpClient, HttpLogClient, MemoryLogSink};
use relay_gateway::LogPayload;

use crate::support::{router, Stub};

async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Logger endpoint over HTTP, returning the delivery and its sink.
async fn http_logger() -> (Arc<dyn LogDelivery>, MemoryLogSink) {
    let sink = MemoryLogSink::new();
    let base = serve(log_router(Arc::new(sink.clone()))).await;
    let client = HttpLogClient::new(HttpClient::new(), format!("{base}/log"));
    (Arc::new(HttpLogDelivery::new(client)), sink)
}

async fn gateway(log: Arc<dyn LogDelivery>) -> (String, Stub) {
    let auth = Stub::start(202, json!({ "error": false, "message": "ok" })).await;
    let mail = Stub::start(202, json!({ "error": false })).await;
    let state = GatewayState::new(router(&auth, &mail, log));
    (serve(gateway::http::router(state)).await, mail)
}

#[tokio::test]
async fn root_hits_the_broker() {
    let (log, _) = http_logger().await;
    let (base, _) = gateway(log).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": false, "message": "hit the broker" }));
}

#[tokio::test]
async fn ping_is_a_heartbeat() {
    let (log, _) = http_logger().await;
    let (base, _) = gateway(log).await;

    let resp = reqwest::get(format!("{base}/ping")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), ".");
}

#[tokio::test]
async fn handle_logs_over_http() {
    let (log, sink) = http_logger().await;
    let (base, _) = gateway(log).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/handle"))
        .json(&json!({ "action": "log", "log": { "name": "event", "data": "hello" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": false, "message": "logged" }));
    assert_eq!(sink.entries(), vec![LogPayload::new("event", "hello")]);
}

#[tokio::test]
async fn handle_rejects_unknown_action_and_bad_json() {
    let (log, sink) = http_logger().await;
    let (base, mail) = gateway(log).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/handle"))
        .json(&json!({ "action": "delete" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": true, "message": "unknown action" }));

    let resp = client
        .post(format!("{base}/handle"))
        .body("{\"action\":")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], true);

    assert!(sink.is_empty());
    assert_eq!(mail.calls(), 0);
}

#[tokio::test]
async fn log_grpc_route_absent_without_direct_delivery() {
    let (log, _) = http_logger().await;
    let (base, _) = gateway(log).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/log-grpc"))
        .json(&json!({ "action": "log", "log": { "name": "x", "data": "y" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[cfg(feature = "grpc")]
#[tokio::test]
async fn log_grpc_route_writes_over_grpc() {
    use relay_gateway::gateway::GrpcLogDelivery;
    use relay_gateway::transport::grpc::serve_grpc;
    use relay_gateway::transport::GrpcLogClient;

    let grpc_sink = MemoryLogSink::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let grpc_addr = listener.local_addr().unwrap();
    tokio::spawn(serve_grpc(
        Arc::new(grpc_sink.clone()),
        listener,
        std::future::pending(),
    ));

    let (log, http_sink) = http_logger().await;
    let auth = Stub::start(202, json!({})).await;
    let mail = Stub::start(202, json!({})).await;
    let direct = GrpcLogDelivery::new(GrpcLogClient::new(format!("http://{grpc_addr}")));
    let state = GatewayState::new(router(&auth, &mail, log)).with_direct_log(Arc::new(direct));
    let base = serve(gateway::http::router(state)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/log-grpc"))
        .json(&json!({ "action": "log", "log": { "name": "event", "data": "via grpc" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "error": false, "message": "logged via grpc" }));
    assert_eq!(grpc_sink.entries(), vec![LogPayload::new("event", "via grpc")]);
    assert!(http_sink.is_empty());
}
