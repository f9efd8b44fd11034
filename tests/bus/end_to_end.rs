//! Gateway → bus → listener → logger, all in-process.

use std::sync::Arc;

use relay_gateway::bus::{ConsumerOptions, ConsumerState, EventConsumer, InMemoryBroker};
use relay_gateway::gateway::{
    ActionRouter, BusLogDelivery, HttpAuthClient, HttpMailClient,
};
use relay_gateway::transport::{log_router, HttpClient, HttpLogClient, MemoryLogSink};
use relay_gateway::{ForwardingHandler, LogPayload, ResponseEnvelope};

use crate::support::eventually;

async fn logger() -> (String, MemoryLogSink) {
    let sink = MemoryLogSink::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = log_router(Arc::new(sink.clone()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/log"), sink)
}

#[tokio::test]
async fn log_action_is_forwarded_exactly_once() {
    let broker = Arc::new(InMemoryBroker::new());
    let (logger_url, sink) = logger().await;
    let http = HttpClient::new();

    let handler = ForwardingHandler::new(HttpLogClient::new(http.clone(), logger_url));
    let consumer = Arc::new(
        EventConsumer::new(broker.clone(), Arc::new(handler), ConsumerOptions::default())
            .await
            .unwrap(),
    );
    let mut listener = consumer.spawn(vec![
        "log.INFO".into(),
        "log.WARNING".into(),
        "log.ERROR".into(),
    ]);
    assert_eq!(
        listener.wait_for(ConsumerState::Consuming).await,
        ConsumerState::Consuming
    );

    let router = ActionRouter::new(
        Arc::new(HttpAuthClient::new(http.clone(), "http://127.0.0.1:1/authenticate")),
        Arc::new(HttpMailClient::new(http, "http://127.0.0.1:1/send")),
        Arc::new(BusLogDelivery::connect(broker.clone()).await.unwrap()),
    );

    let (status, response) = router
        .handle_json(br#"{"action":"log","log":{"name":"test","data":"hello"}}"#)
        .await;
    assert_eq!(status, 202);
    assert_eq!(response, ResponseEnvelope::ok("logged via rabbitmq"));

    eventually(|| sink.len() == 1).await;
    let stats = listener.stop().await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.handled, 1);
    assert_eq!(sink.entries(), vec![LogPayload::new("test", "hello")]);
}

#[tokio::test]
async fn auth_events_are_not_forwarded() {
    let broker = Arc::new(InMemoryBroker::new());
    let (logger_url, sink) = logger().await;

    let handler = ForwardingHandler::new(HttpLogClient::new(HttpClient::new(), logger_url));
    let consumer = Arc::new(
        EventConsumer::new(broker.clone(), Arc::new(handler), ConsumerOptions::default())
            .await
            .unwrap(),
    );
    let mut listener = consumer.spawn(vec!["log.*".into()]);
    listener.wait_for(ConsumerState::Consuming).await;

    let delivery = BusLogDelivery::connect(broker.clone()).await.unwrap();
    let router = ActionRouter::new(
        Arc::new(HttpAuthClient::new(HttpClient::new(), "http://127.0.0.1:1/")),
        Arc::new(HttpMailClient::new(HttpClient::new(), "http://127.0.0.1:1/")),
        Arc::new(delivery),
    );
    for name in ["auth", "event"] {
        let body = format!(r#"{{"action":"log","log":{{"name":"{name}","data":"d"}}}}"#);
        let (status, _) = router.handle_json(body.as_bytes()).await;
        assert_eq!(status, 202);
    }

    eventually(|| sink.len() == 1).await;
    listener.stop().await.unwrap();
    assert_eq!(sink.entries(), vec![LogPayload::new("event", "d")]);
}
