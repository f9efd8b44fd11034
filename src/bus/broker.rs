//! Broker connection and channel traits.
//!
//! Producers and consumers are written against these traits so the same code
//! runs over an AMQP broker (`amqp` feature) or the in-process
//! [`InMemoryBroker`](super::InMemoryBroker).
//!
//! A [`Connection`] is shared read-only; every publish or consume opens its
//! own [`Channel`] and channels are never shared across operations.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::routing::EXCHANGE_NAME;
use super::BusError;

/// Content type stamped on every published body.
pub const CONTENT_TYPE: &str = "text/plain";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
    Direct,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

/// Parameters of an exchange declaration.
///
/// Declaring twice with identical parameters is a no-op; declaring with
/// different parameters fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
}

impl ExchangeSpec {
    /// The shared durable topic exchange for log events.
    pub fn logs_topic() -> Self {
        Self {
            name: EXCHANGE_NAME.to_string(),
            kind: ExchangeKind::Topic,
            durable: true,
            auto_delete: false,
            internal: false,
        }
    }
}

/// Parameters of a queue declaration. An empty name asks the broker to
/// generate one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// A private, server-named, non-durable, exclusive, auto-delete queue.
    pub fn private() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// An outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub mandatory: bool,
    pub immediate: bool,
}

impl Message {
    /// A non-mandatory, non-immediate `text/plain` message.
    pub fn new(routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            content_type: CONTENT_TYPE.to_string(),
            mandatory: false,
            immediate: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// When true the broker treats a message as handled the moment it is
    /// delivered.
    pub auto_ack: bool,
    pub consumer_tag: String,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            auto_ack: true,
            consumer_tag: String::new(),
        }
    }
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BusError>;
    async fn reject(&self, requeue: bool) -> Result<(), BusError>;
}

/// Acknowledger for auto-ack deliveries: the broker already settled them.
pub struct AutoAcked;

#[async_trait]
impl Acknowledge for AutoAcked {
    async fn ack(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn reject(&self, _requeue: bool) -> Result<(), BusError> {
        Ok(())
    }
}

/// A message delivered to a consumer.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, body: Vec<u8>, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            acker,
        }
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub async fn ack(&self) -> Result<(), BusError> {
        self.acker.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BusError> {
        self.acker.reject(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("body", &self.payload_str())
            .finish()
    }
}

/// Stream of deliveries from one consumer. Dropping it cancels the consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BusError>>;

/// A live broker connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Channel: Channel;

    /// Open a new channel on this connection.
    async fn create_channel(&self) -> Result<Self::Channel, BusError>;
}

/// A channel on a broker connection.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Declare an exchange, idempotently.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BusError>;

    /// Declare a queue and return its (possibly server-generated) name.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BusError>;

    /// Bind a queue to an exchange with one routing-key pattern.
    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<(), BusError>;

    /// Publish a message to an exchange.
    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BusError>;

    /// Start consuming from a queue.
    async fn consume(&self, queue: &str, options: &ConsumeOptions) -> Result<DeliveryStream, BusError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), BusError>;
}
