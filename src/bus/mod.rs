//! Event Bus - topic-exchange publishing and consuming of log events
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  publish(payload, "log.INFO")  ┌──────────────────────┐
//! │EventProducer │ ─────────────────────────────▶ │ logs_topic (durable, │
//! └──────────────┘                                │   topic exchange)    │
//!                                                 └──────────┬───────────┘
//!                                     bindings: "log.*", ... │
//!                                                 ┌──────────▼───────────┐
//!                                                 │ private queue (per   │
//!                                                 │ consumer, auto-del)  │
//!                                                 └──────────┬───────────┘
//!                                                 ┌──────────▼───────────┐
//!                                                 │EventConsumer → worker│
//!                                                 │ pool → EventHandler  │
//!                                                 └──────────────────────┘
//! ```
//!
//! Producer and consumer each take an `Arc` of a [`Connection`] and open
//! their own channels on it. Backends:
//! - [`InMemoryBroker`] (always available)
//! - `AmqpConnection` (requires the `amqp` feature)

mod broker;
mod consumer;
mod error;
mod in_memory;
mod producer;
mod routing;

#[cfg(feature = "amqp")]
mod amqp;

pub use broker::{
    Acknowledge, AutoAcked, Channel, Connection, ConsumeOptions, Delivery, DeliveryStream,
    ExchangeKind, ExchangeSpec, Message, QueueSpec, CONTENT_TYPE,
};
pub use consumer::{
    AckMode, ConsumerHandle, ConsumerOptions, ConsumerState, EventConsumer, EventHandler,
    ListenStats,
};
pub use error::{BusError, HandlerError};
pub use in_memory::{FailOn, InMemoryBroker, InMemoryChannel};
pub use producer::EventProducer;
pub use routing::{topic_matches, Severity, EXCHANGE_NAME};

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConnection};
