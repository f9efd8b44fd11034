//! Event bus consumer: binds a private queue to the topic exchange and feeds
//! deliveries to a bounded worker pool.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected → ChannelOpen → ExchangeDeclared → QueueDeclared
//!              → Bound(n) → Consuming → ChannelClosed | Fatal
//! ```
//!
//! `listen` runs until the supplied shutdown future resolves, the broker ends
//! the delivery stream, or a fatal error occurs. Deliveries are pushed into a
//! bounded internal queue drained by `workers` tasks, so handler executions
//! overlap and are not ordered across messages.
//!
//! On shutdown, handlers already running get `shutdown_grace` to finish and
//! are then cancelled. Deliveries still buffered are not handled; they are
//! counted in [`ListenStats::abandoned`] and, when acknowledging after
//! success, rejected with requeue.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broker::{Channel, Connection, ConsumeOptions, Delivery, ExchangeSpec, QueueSpec};
use super::error::HandlerError;
use super::BusError;
use crate::envelope::LogPayload;

/// Handles one consumed log event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: LogPayload, routing_key: &str) -> Result<(), HandlerError>;
}

/// Where a consumer is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    ChannelOpen,
    ExchangeDeclared,
    QueueDeclared,
    /// Number of patterns bound so far.
    Bound(usize),
    Consuming,
    ChannelClosed,
    Fatal,
}

/// When deliveries are acknowledged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Broker-side auto-ack: a message counts as handled once delivered.
    #[default]
    Auto,
    /// Ack after the handler succeeds; reject on failure.
    AfterSuccess {
        /// Requeue rejected messages for redelivery.
        requeue_failed: bool,
    },
}

#[derive(Clone, Debug)]
pub struct ConsumerOptions {
    pub exchange: ExchangeSpec,
    /// Handler tasks draining the internal queue.
    pub workers: usize,
    /// Capacity of the internal queue between delivery loop and workers.
    pub buffer: usize,
    pub ack_mode: AckMode,
    /// How long running handlers may continue after shutdown is requested.
    pub shutdown_grace: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            exchange: ExchangeSpec::logs_topic(),
            workers: 4,
            buffer: 64,
            ack_mode: AckMode::Auto,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Counters from one `listen` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListenStats {
    /// Deliveries taken from the broker.
    pub received: usize,
    /// Handler calls that succeeded.
    pub handled: usize,
    /// Deliveries that failed to decode or whose handler failed.
    pub failed: usize,
    /// Deliveries left unhandled because the consumer was shutting down.
    pub abandoned: usize,
}

#[derive(Default)]
struct Counters {
    received: AtomicUsize,
    handled: AtomicUsize,
    failed: AtomicUsize,
    abandoned: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> ListenStats {
        ListenStats {
            received: self.received.load(Ordering::SeqCst),
            handled: self.handled.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
        }
    }
}

/// Consumes log events from the topic exchange.
pub struct EventConsumer<C: Connection> {
    connection: Arc<C>,
    handler: Arc<dyn EventHandler>,
    options: ConsumerOptions,
    state: watch::Sender<ConsumerState>,
}

impl<C: Connection> EventConsumer<C> {
    /// Create a consumer and declare the exchange once, so either side of the
    /// bus may start first.
    pub async fn new(
        connection: Arc<C>,
        handler: Arc<dyn EventHandler>,
        options: ConsumerOptions,
    ) -> Result<Self, BusError> {
        let channel = connection.create_channel().await?;
        let declared = channel.declare_exchange(&options.exchange).await;
        if let Err(e) = channel.close().await {
            warn!(error = %e, "failed to close setup channel");
        }
        declared?;

        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Ok(Self {
            connection,
            handler,
            options,
            state,
        })
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ConsumerState) {
        debug!(state = ?next, "consumer state");
        self.state.send_replace(next);
    }

    fn fatal(&self, err: BusError) -> BusError {
        error!(error = %err, "consumer failed");
        self.transition(ConsumerState::Fatal);
        err
    }

    /// Bind to `patterns` and consume until `shutdown` resolves.
    ///
    /// At least one pattern is required. A bind failure aborts with an error;
    /// bindings already made are left in place since the queue goes away with
    /// the consumer.
    pub async fn listen<P, F>(&self, patterns: &[P], shutdown: F) -> Result<ListenStats, BusError>
    where
        P: AsRef<str>,
        F: Future<Output = ()>,
    {
        if patterns.is_empty() {
            return Err(self.fatal(BusError::NoPatterns));
        }

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| self.fatal(e))?;
        self.transition(ConsumerState::ChannelOpen);

        let result = self.consume_on(&channel, patterns, shutdown).await;
        if let Err(e) = channel.close().await {
            warn!(error = %e, "failed to close consumer channel");
        }
        match result {
            Ok(stats) => {
                self.transition(ConsumerState::ChannelClosed);
                Ok(stats)
            }
            Err(e) => Err(self.fatal(e)),
        }
    }

    async fn consume_on<P, F>(
        &self,
        channel: &C::Channel,
        patterns: &[P],
        shutdown: F,
    ) -> Result<ListenStats, BusError>
    where
        P: AsRef<str>,
        F: Future<Output = ()>,
    {
        let exchange = &self.options.exchange.name;

        channel.declare_exchange(&self.options.exchange).await?;
        self.transition(ConsumerState::ExchangeDeclared);

        let queue = channel.declare_queue(&QueueSpec::private()).await?;
        self.transition(ConsumerState::QueueDeclared);

        for (bound, pattern) in patterns.iter().enumerate() {
            channel.bind_queue(&queue, exchange, pattern.as_ref()).await?;
            self.transition(ConsumerState::Bound(bound + 1));
        }

        let consume = ConsumeOptions {
            auto_ack: self.options.ack_mode == AckMode::Auto,
            consumer_tag: String::new(),
        };
        let mut deliveries = channel.consume(&queue, &consume).await?;
        self.transition(ConsumerState::Consuming);
        info!(exchange = %exchange, queue = %queue, "waiting for messages");

        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel::<Delivery>(self.options.buffer.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (stop_tx, stop_rx) = watch::channel(false);
        let workers = self.spawn_workers(&rx, &counters, stop_rx);
        let ack_mode = self.options.ack_mode;

        tokio::pin!(shutdown);
        let outcome = loop {
            let delivery = tokio::select! {
                _ = &mut shutdown => break Ok(Stop::Requested),
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => break Err(e),
                    None => break Ok(Stop::StreamEnded),
                },
            };
            counters.received.fetch_add(1, Ordering::SeqCst);

            // Hand-off waits for buffer space; shutdown must still win.
            tokio::select! {
                _ = &mut shutdown => {
                    abandon(delivery, ack_mode, &counters).await;
                    break Ok(Stop::Requested);
                }
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit.send(delivery),
                    Err(_) => break Err(BusError::ConsumeFailed("worker pool stopped".into())),
                },
            }
        };

        drop(deliveries);
        drop(tx);
        match &outcome {
            Ok(Stop::StreamEnded) => info!(queue = %queue, "delivery stream closed by broker"),
            Ok(Stop::Requested) => info!(queue = %queue, "consumer shutdown requested"),
            Err(_) => {}
        }
        // Buffered deliveries drain only when the broker ended the stream.
        if !matches!(outcome, Ok(Stop::StreamEnded)) {
            stop_tx.send_replace(true);
        }

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "consumer worker panicked");
            }
        }
        let mut rx = rx.lock().await;
        while let Ok(delivery) = rx.try_recv() {
            abandon(delivery, ack_mode, &counters).await;
        }

        let stats = counters.snapshot();
        if stats.abandoned > 0 {
            warn!(queue = %queue, abandoned = stats.abandoned, "deliveries left unhandled at shutdown");
        }
        outcome.map(|_| stats)
    }

    fn spawn_workers(
        &self,
        rx: &Arc<Mutex<mpsc::Receiver<Delivery>>>,
        counters: &Arc<Counters>,
        stop: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.options.workers.max(1))
            .map(|_| {
                let worker = Worker {
                    rx: Arc::clone(rx),
                    handler: Arc::clone(&self.handler),
                    counters: Arc::clone(counters),
                    ack_mode: self.options.ack_mode,
                    grace: self.options.shutdown_grace,
                };
                tokio::spawn(worker.run(stop.clone()))
            })
            .collect()
    }
}

/// Why the delivery loop ended.
enum Stop {
    Requested,
    StreamEnded,
}

struct Worker {
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    handler: Arc<dyn EventHandler>,
    counters: Arc<Counters>,
    ack_mode: AckMode,
    grace: Duration,
}

impl Worker {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                next = async { self.rx.lock().await.recv().await } => next,
            };
            let Some(delivery) = next else { break };

            let work = process(self.handler.as_ref(), delivery, self.ack_mode, &self.counters);
            tokio::pin!(work);
            tokio::select! {
                _ = &mut work => continue,
                _ = stopped(&mut stop) => {}
            }

            if tokio::time::timeout(self.grace, &mut work).await.is_err() {
                warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "event handler cancelled at shutdown"
                );
                self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
            }
            break;
        }
    }
}

/// Resolves once the stop flag is raised or its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopping| *stopping).await;
}

/// Give up on a delivery that no handler will see.
async fn abandon(delivery: Delivery, ack_mode: AckMode, counters: &Counters) {
    counters.abandoned.fetch_add(1, Ordering::SeqCst);
    if let AckMode::AfterSuccess { .. } = ack_mode {
        settle(delivery.reject(true).await);
    }
}

async fn process(
    handler: &dyn EventHandler,
    delivery: Delivery,
    ack_mode: AckMode,
    counters: &Counters,
) {
    let payload = match serde_json::from_slice::<LogPayload>(&delivery.body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(routing_key = %delivery.routing_key, error = %e, "dropping undecodable event");
            counters.failed.fetch_add(1, Ordering::SeqCst);
            if let AckMode::AfterSuccess { .. } = ack_mode {
                settle(delivery.reject(false).await);
            }
            return;
        }
    };

    match handler.handle(payload, &delivery.routing_key).await {
        Ok(()) => {
            counters.handled.fetch_add(1, Ordering::SeqCst);
            if let AckMode::AfterSuccess { .. } = ack_mode {
                settle(delivery.ack().await);
            }
        }
        Err(e) => {
            error!(routing_key = %delivery.routing_key, error = %e, "event handler failed");
            counters.failed.fetch_add(1, Ordering::SeqCst);
            if let AckMode::AfterSuccess { requeue_failed } = ack_mode {
                settle(delivery.reject(requeue_failed).await);
            }
        }
    }
}

fn settle(result: Result<(), BusError>) {
    if let Err(e) = result {
        warn!(error = %e, "failed to settle delivery");
    }
}

/// Handle to a consumer running on a background task. Drop or call `stop()`
/// to shut it down.
pub struct ConsumerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<ListenStats, BusError>>>,
    state: watch::Receiver<ConsumerState>,
}

impl<C: Connection> EventConsumer<C> {
    /// Run `listen` on a background task.
    pub fn spawn(self: Arc<Self>, patterns: Vec<String>) -> ConsumerHandle {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let state = self.state();
        let task = tokio::spawn(async move {
            self.listen(&patterns, async {
                let _ = stop_rx.await;
            })
            .await
        });
        ConsumerHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
            state,
        }
    }
}

impl ConsumerHandle {
    /// Wait until the consumer reaches `target` or a terminal state, returning
    /// the state it settled in.
    pub async fn wait_for(&mut self, target: ConsumerState) -> ConsumerState {
        let result = self
            .state
            .wait_for(|s| {
                *s == target || matches!(s, ConsumerState::ChannelClosed | ConsumerState::Fatal)
            })
            .await
            .map(|s| *s);
        result.unwrap_or(ConsumerState::ChannelClosed)
    }

    pub fn current(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Stop the consumer and wait for it to finish. Returns stats.
    pub async fn stop(mut self) -> Result<ListenStats, BusError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| BusError::ConsumeFailed(format!("consumer task failed: {}", e)))?,
            None => Ok(ListenStats::default()),
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}
