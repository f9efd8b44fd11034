//! Bootstrapping a broker connection that comes up late.

use std::sync::Arc;
use std::time::Duration;

use relay_gateway::bootstrap::{self, Backoff, BootstrapError};
use relay_gateway::bus::{BusError, EventProducer, InMemoryBroker};
use relay_gateway::LogPayload;

#[tokio::test(start_paused = true)]
async fn broker_reachable_on_third_attempt() {
    let broker = InMemoryBroker::new();
    let start = tokio::time::Instant::now();

    let connection = bootstrap::connect("rabbitmq", &Backoff::broker(), |attempt| {
        let broker = broker.clone();
        async move {
            if attempt < 3 {
                Err(BusError::ConnectionFailed("connection refused".into()))
            } else {
                Ok(broker)
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(1 + 4));
    let producer = EventProducer::new(Arc::new(connection)).await.unwrap();
    producer
        .publish(&LogPayload::new("event", "up"), "log.INFO")
        .await
        .unwrap();
    assert_eq!(broker.published(), 1);
}

#[tokio::test(start_paused = true)]
async fn broker_never_reachable() {
    let start = tokio::time::Instant::now();
    let result = bootstrap::connect("rabbitmq", &Backoff::broker(), |_| async {
        Err::<InMemoryBroker, _>(BusError::ConnectionFailed("connection refused".into()))
    })
    .await;

    // sleeps after failures 1..=4, none after the fifth
    assert_eq!(start.elapsed(), Duration::from_secs(1 + 4 + 9 + 16));
    match result {
        Err(BootstrapError::Exhausted {
            attempts,
            last_error,
            ..
        }) => {
            assert_eq!(attempts, 5);
            assert!(last_error.contains("connection refused"));
        }
        Ok(_) => panic!("expected exhaustion"),
    }
}
