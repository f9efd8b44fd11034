//! In-memory topic broker for testing and single-process scenarios.
//!
//! Implements the same [`Connection`]/[`Channel`] traits as the AMQP backend
//! with the semantics the event bus relies on:
//! - exchange declaration is idempotent for identical parameters
//! - publish routes to every queue with a matching binding, once per queue
//! - messages published while no queue is bound are dropped
//! - auto-delete queues disappear when their consumer stream is dropped
//! - exclusive queues nobody consumes from disappear when the declaring
//!   channel closes
//!
//! ## Example
//!
//! ```
//! # tokio_test_block_on(async {
//! use relay_gateway::bus::{Channel, Connection, ExchangeSpec, InMemoryBroker, Message, QueueSpec};
//!
//! let broker = InMemoryBroker::new();
//! let channel = broker.create_channel().await.unwrap();
//! channel.declare_exchange(&ExchangeSpec::logs_topic()).await.unwrap();
//!
//! let queue = channel.declare_queue(&QueueSpec::private()).await.unwrap();
//! channel.bind_queue(&queue, "logs_topic", "log.*").await.unwrap();
//!
//! channel.publish("logs_topic", Message::new("log.ERROR", b"{}".to_vec())).await.unwrap();
//! assert_eq!(broker.queued(&queue), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::broker::{
    Acknowledge, AutoAcked, Channel, Connection, ConsumeOptions, Delivery, DeliveryStream,
    ExchangeSpec, Message, QueueSpec,
};
use super::routing::topic_matches;
use super::BusError;

/// Operations that can be made to fail for testing error paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailOn {
    Channel,
    ExchangeDeclare,
    QueueDeclare,
    Bind,
    Publish,
    Consume,
}

struct QueueState {
    bindings: Vec<(String, String)>,
    auto_delete: bool,
    /// Messages routed before a consumer attached.
    backlog: VecDeque<(String, Vec<u8>)>,
    consumer: Option<mpsc::UnboundedSender<(String, Vec<u8>)>>,
}

impl QueueState {
    fn push(&mut self, routing_key: String, body: Vec<u8>) {
        match &self.consumer {
            Some(tx) if !tx.is_closed() => {
                let _ = tx.send((routing_key, body));
            }
            _ => self.backlog.push_back((routing_key, body)),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    failures: HashSet<FailOn>,
    published: usize,
    last_published: Option<Message>,
    dropped: usize,
    acked: usize,
    rejected: usize,
}

/// In-process topic broker. Cloning shares the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        lock(&self.state)
    }

    /// Make every subsequent `op` fail until [`clear_failure`](Self::clear_failure).
    pub fn fail(&self, op: FailOn) {
        self.lock().failures.insert(op);
    }

    pub fn clear_failure(&self, op: FailOn) {
        self.lock().failures.remove(&op);
    }

    /// Get a declared exchange by name.
    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.lock().exchanges.get(name).cloned()
    }

    /// Number of live queues.
    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    /// Names of the patterns bound to a queue.
    pub fn bindings(&self, queue: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.bindings.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Messages waiting in a queue for a consumer.
    pub fn queued(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.backlog.len())
            .unwrap_or(0)
    }

    /// Total messages accepted by exchanges.
    pub fn published(&self) -> usize {
        self.lock().published
    }

    /// The most recent message accepted by an exchange, with its properties.
    pub fn last_published(&self) -> Option<Message> {
        self.lock().last_published.clone()
    }

    /// Messages that matched no bound queue.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }

    pub fn acked(&self) -> usize {
        self.lock().acked
    }

    pub fn rejected(&self) -> usize {
        self.lock().rejected
    }
}

#[async_trait]
impl Connection for InMemoryBroker {
    type Channel = InMemoryChannel;

    async fn create_channel(&self) -> Result<InMemoryChannel, BusError> {
        if self.lock().failures.contains(&FailOn::Channel) {
            return Err(BusError::ChannelFailed("connection refused channel".into()));
        }
        Ok(InMemoryChannel {
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
            exclusive: Mutex::new(Vec::new()),
        })
    }
}

/// A channel on an [`InMemoryBroker`].
pub struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    open: AtomicBool,
    /// Exclusive queues declared here; dropped on close unless consumed.
    exclusive: Mutex<Vec<String>>,
}

impl InMemoryChannel {
    fn guard(&self, op: FailOn) -> Result<MutexGuard<'_, BrokerState>, BusError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BusError::ChannelFailed("channel closed".into()));
        }
        let state = lock(&self.state);
        if state.failures.contains(&op) {
            return Err(match op {
                FailOn::Channel => BusError::ChannelFailed("injected failure".into()),
                FailOn::ExchangeDeclare => BusError::ExchangeDeclare("injected failure".into()),
                FailOn::QueueDeclare => BusError::QueueDeclare("injected failure".into()),
                FailOn::Bind => BusError::Bind {
                    pattern: String::new(),
                    reason: "injected failure".into(),
                },
                FailOn::Publish => BusError::Rejected("injected failure".into()),
                FailOn::Consume => BusError::ConsumeFailed("injected failure".into()),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BusError> {
        let mut state = self.guard(FailOn::ExchangeDeclare)?;
        if let Some(existing) = state.exchanges.get(&spec.name) {
            if existing != spec {
                return Err(BusError::ExchangeDeclare(format!(
                    "exchange {} already declared with different parameters",
                    spec.name
                )));
            }
            return Ok(());
        }
        state.exchanges.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BusError> {
        let mut state = self.guard(FailOn::QueueDeclare)?;
        let name = if spec.name.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4().simple())
        } else {
            spec.name.clone()
        };
        state.queues.entry(name.clone()).or_insert_with(|| QueueState {
            bindings: Vec::new(),
            auto_delete: spec.auto_delete,
            backlog: VecDeque::new(),
            consumer: None,
        });
        drop(state);
        if spec.exclusive {
            self.exclusive
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(name.clone());
        }
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<(), BusError> {
        let mut state = self.guard(FailOn::Bind).map_err(|e| match e {
            BusError::Bind { reason, .. } => BusError::Bind {
                pattern: pattern.to_string(),
                reason,
            },
            other => other,
        })?;
        if !state.exchanges.contains_key(exchange) {
            return Err(BusError::Bind {
                pattern: pattern.to_string(),
                reason: format!("no exchange {}", exchange),
            });
        }
        let q = state.queues.get_mut(queue).ok_or_else(|| BusError::Bind {
            pattern: pattern.to_string(),
            reason: format!("no queue {}", queue),
        })?;
        let binding = (exchange.to_string(), pattern.to_string());
        if !q.bindings.contains(&binding) {
            q.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BusError> {
        let mut state = self.guard(FailOn::Publish)?;
        if !state.exchanges.contains_key(exchange) {
            return Err(BusError::Rejected(format!("no exchange {}", exchange)));
        }
        state.published += 1;

        let mut routed = false;
        for q in state.queues.values_mut() {
            let matched = q
                .bindings
                .iter()
                .any(|(ex, pattern)| ex == exchange && topic_matches(pattern, &message.routing_key));
            if matched {
                q.push(message.routing_key.clone(), message.body.clone());
                routed = true;
            }
        }
        if !routed {
            state.dropped += 1;
        }
        state.last_published = Some(message);
        Ok(())
    }

    async fn consume(&self, queue: &str, options: &ConsumeOptions) -> Result<DeliveryStream, BusError> {
        let mut state = self.guard(FailOn::Consume)?;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::ConsumeFailed(format!("no queue {}", queue)))?;
        if q.consumer.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(BusError::ConsumeFailed(format!(
                "queue {} already has a consumer",
                queue
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for (key, body) in q.backlog.drain(..) {
            let _ = tx.send((key, body));
        }
        q.consumer = Some(tx);

        let guard = QueueGuard {
            state: Arc::clone(&self.state),
            queue: queue.to_string(),
        };
        let auto_ack = options.auto_ack;
        let shared = Arc::clone(&self.state);
        let queue = queue.to_string();

        let stream = UnboundedReceiverStream::new(rx).map(move |(routing_key, body)| {
            let _owned = &guard;
            let acker: Box<dyn Acknowledge> = if auto_ack {
                Box::new(AutoAcked)
            } else {
                Box::new(MemoryAcker {
                    state: Arc::clone(&shared),
                    queue: queue.clone(),
                    routing_key: routing_key.clone(),
                    body: body.clone(),
                    settled: AtomicBool::new(false),
                })
            };
            Ok(Delivery::new(routing_key, body, acker))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.open.store(false, Ordering::SeqCst);
        let declared = std::mem::take(
            &mut *self
                .exclusive
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut state = lock(&self.state);
        for queue in declared {
            let consumed = state
                .queues
                .get(&queue)
                .and_then(|q| q.consumer.as_ref())
                .is_some_and(|tx| !tx.is_closed());
            if !consumed {
                state.queues.remove(&queue);
            }
        }
        Ok(())
    }
}

/// Deletes an auto-delete queue when its consumer stream is dropped.
struct QueueGuard {
    state: Arc<Mutex<BrokerState>>,
    queue: String,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let auto_delete = state
            .queues
            .get(&self.queue)
            .map(|q| q.auto_delete)
            .unwrap_or(false);
        if auto_delete {
            state.queues.remove(&self.queue);
        } else if let Some(q) = state.queues.get_mut(&self.queue) {
            q.consumer = None;
        }
    }
}

struct MemoryAcker {
    state: Arc<Mutex<BrokerState>>,
    queue: String,
    routing_key: String,
    body: Vec<u8>,
    settled: AtomicBool,
}

impl MemoryAcker {
    fn settle(&self) -> Result<(), BusError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BusError::AckFailed("delivery already settled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), BusError> {
        self.settle()?;
        lock(&self.state).acked += 1;
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BusError> {
        self.settle()?;
        let mut state = lock(&self.state);
        state.rejected += 1;
        if requeue {
            if let Some(q) = state.queues.get_mut(&self.queue) {
                q.push(self.routing_key.clone(), self.body.clone());
            }
        }
        Ok(())
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
