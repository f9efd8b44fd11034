use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use relay_gateway::bus::{
    ConsumerHandle, ConsumerOptions, ConsumerState, EventConsumer, EventHandler, HandlerError,
    InMemoryBroker,
};
use relay_gateway::LogPayload;

/// Handler that records `(routing_key, payload)` pairs.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(String, LogPayload)>>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<(String, LogPayload)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.seen().into_iter().map(|(k, _)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: LogPayload, routing_key: &str) -> Result<(), HandlerError> {
        self.seen
            .lock()
            .unwrap()
            .push((routing_key.to_string(), event));
        Ok(())
    }
}

/// Start a single-worker consumer bound to `patterns` and wait until it is
/// consuming.
pub async fn consume(
    broker: &InMemoryBroker,
    patterns: &[&str],
    handler: Arc<dyn EventHandler>,
) -> ConsumerHandle {
    let options = ConsumerOptions {
        workers: 1,
        ..ConsumerOptions::default()
    };
    let consumer = Arc::new(
        EventConsumer::new(Arc::new(broker.clone()), handler, options)
            .await
            .unwrap(),
    );
    let mut handle = consumer.spawn(patterns.iter().map(|p| p.to_string()).collect());
    assert_eq!(
        handle.wait_for(ConsumerState::Consuming).await,
        ConsumerState::Consuming
    );
    handle
}

/// Poll `check` until it holds, failing after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
