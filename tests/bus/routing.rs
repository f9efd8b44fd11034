//! Topic routing between producers and consumers.

use std::sync::Arc;

use relay_gateway::bus::{EventProducer, ExchangeKind, InMemoryBroker, Severity};
use relay_gateway::LogPayload;

use crate::support::{consume, eventually, Recorder};

#[tokio::test]
async fn error_reaches_wildcard_but_not_info_binding() {
    let broker = InMemoryBroker::new();
    let wildcard = Recorder::default();
    let info_only = Recorder::default();
    let h1 = consume(&broker, &["log.*"], Arc::new(wildcard.clone())).await;
    let h2 = consume(&broker, &["log.INFO"], Arc::new(info_only.clone())).await;

    let producer = EventProducer::new(Arc::new(broker.clone())).await.unwrap();
    producer
        .publish(&LogPayload::new("event", "boom"), Severity::Error.routing_key())
        .await
        .unwrap();
    // sentinel: once the INFO consumer sees this, the ERROR message would
    // already have arrived had it been routed there
    producer
        .publish(&LogPayload::new("event", "sentinel"), "log.INFO")
        .await
        .unwrap();

    eventually(|| wildcard.len() == 2 && info_only.len() == 1).await;
    h1.stop().await.unwrap();
    h2.stop().await.unwrap();

    assert_eq!(wildcard.keys(), vec!["log.ERROR", "log.INFO"]);
    assert_eq!(wildcard.seen()[0].1, LogPayload::new("event", "boom"));
    assert_eq!(info_only.keys(), vec!["log.INFO"]);
}

#[tokio::test]
async fn messages_published_before_binding_are_lost() {
    let broker = InMemoryBroker::new();
    let producer = EventProducer::new(Arc::new(broker.clone())).await.unwrap();
    producer
        .publish(&LogPayload::new("early", "x"), "log.INFO")
        .await
        .unwrap();
    assert_eq!(broker.dropped(), 1);

    let recorder = Recorder::default();
    let handle = consume(&broker, &["log.INFO"], Arc::new(recorder.clone())).await;
    producer
        .publish(&LogPayload::new("late", "y"), "log.INFO")
        .await
        .unwrap();

    eventually(|| recorder.len() == 1).await;
    let stats = handle.stop().await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(recorder.seen()[0].1.name, "late");
}

#[tokio::test]
async fn every_consumer_gets_its_own_copy() {
    let broker = InMemoryBroker::new();
    let a = Recorder::default();
    let b = Recorder::default();
    let ha = consume(&broker, &["log.WARNING"], Arc::new(a.clone())).await;
    let hb = consume(&broker, &["#"], Arc::new(b.clone())).await;
    assert_eq!(broker.queue_count(), 2);

    let producer = EventProducer::new(Arc::new(broker.clone())).await.unwrap();
    producer
        .publish(&LogPayload::new("event", "w"), "log.WARNING")
        .await
        .unwrap();

    eventually(|| a.len() == 1 && b.len() == 1).await;
    ha.stop().await.unwrap();
    hb.stop().await.unwrap();
    eventually(|| broker.queue_count() == 0).await;
}

#[tokio::test]
async fn one_delivery_per_queue_with_overlapping_patterns() {
    let broker = InMemoryBroker::new();
    let recorder = Recorder::default();
    let handle = consume(
        &broker,
        &["log.INFO", "log.*", "#"],
        Arc::new(recorder.clone()),
    )
    .await;

    let producer = EventProducer::new(Arc::new(broker.clone())).await.unwrap();
    producer
        .publish_batch(&[
            ("log.INFO", &LogPayload::new("a", "1")),
            ("log.ERROR", &LogPayload::new("b", "2")),
        ])
        .await
        .unwrap();

    eventually(|| recorder.len() == 2).await;
    let stats = handle.stop().await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.handled, 2);
}

#[tokio::test]
async fn producer_and_consumer_both_declare_the_exchange() {
    let broker = InMemoryBroker::new();
    let recorder = Recorder::default();
    let handle = consume(&broker, &["log.INFO"], Arc::new(recorder.clone())).await;
    EventProducer::new(Arc::new(broker.clone())).await.unwrap();
    EventProducer::new(Arc::new(broker.clone())).await.unwrap();

    let exchange = broker.exchange("logs_topic").unwrap();
    assert_eq!(exchange.kind, ExchangeKind::Topic);
    assert!(exchange.durable);
    assert!(!exchange.auto_delete);
    handle.stop().await.unwrap();
}
