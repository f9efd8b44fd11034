//! AMQP 0-9-1 backend built on lapin.
//!
//! Requires the `amqp` feature.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, ConnectionProperties};

use super::broker::{
    Acknowledge, AutoAcked, Channel, Connection, ConsumeOptions, Delivery, DeliveryStream,
    ExchangeKind, ExchangeSpec, Message, QueueSpec,
};
use super::BusError;

/// A live AMQP connection. Shared read-only; channels are opened per operation.
pub struct AmqpConnection {
    inner: lapin::Connection,
}

impl AmqpConnection {
    /// Dial the broker once. Retrying is the bootstrapper's job.
    pub async fn open(uri: &str) -> Result<Self, BusError> {
        let inner = lapin::Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;
        Ok(Self { inner })
    }

    pub async fn close(&self) -> Result<(), BusError> {
        self.inner
            .close(200, "bye")
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    type Channel = AmqpChannel;

    async fn create_channel(&self) -> Result<AmqpChannel, BusError> {
        let inner = self
            .inner
            .create_channel()
            .await
            .map_err(|e| BusError::ChannelFailed(e.to_string()))?;
        Ok(AmqpChannel { inner })
    }
}

pub struct AmqpChannel {
    inner: lapin::Channel,
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BusError> {
        let options = ExchangeDeclareOptions {
            passive: false,
            durable: spec.durable,
            auto_delete: spec.auto_delete,
            internal: spec.internal,
            nowait: false,
        };
        self.inner
            .exchange_declare(&spec.name, exchange_kind(spec.kind), options, FieldTable::default())
            .await
            .map_err(|e| BusError::ExchangeDeclare(e.to_string()))
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BusError> {
        let options = QueueDeclareOptions {
            passive: false,
            durable: spec.durable,
            exclusive: spec.exclusive,
            auto_delete: spec.auto_delete,
            nowait: false,
        };
        let queue = self
            .inner
            .queue_declare(&spec.name, options, FieldTable::default())
            .await
            .map_err(|e| BusError::QueueDeclare(e.to_string()))?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<(), BusError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Bind {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BusError> {
        let options = BasicPublishOptions {
            mandatory: message.mandatory,
            immediate: message.immediate,
        };
        let properties =
            BasicProperties::default().with_content_type(ShortString::from(message.content_type));
        self.inner
            .basic_publish(exchange, &message.routing_key, options, &message.body, properties)
            .await
            .map_err(|e| BusError::Rejected(e.to_string()))?
            .await
            .map_err(|e| BusError::Rejected(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, queue: &str, options: &ConsumeOptions) -> Result<DeliveryStream, BusError> {
        let consume_options = BasicConsumeOptions {
            no_local: false,
            no_ack: options.auto_ack,
            exclusive: false,
            nowait: false,
        };
        let consumer = self
            .inner
            .basic_consume(queue, &options.consumer_tag, consume_options, FieldTable::default())
            .await
            .map_err(|e| BusError::ConsumeFailed(e.to_string()))?;

        let auto_ack = options.auto_ack;
        let stream = consumer.map(move |item| {
            let delivery = item.map_err(|e| BusError::ConsumeFailed(e.to_string()))?;
            let acker: Box<dyn Acknowledge> = if auto_ack {
                Box::new(AutoAcked)
            } else {
                Box::new(AmqpAcker(delivery.acker))
            };
            Ok(Delivery::new(
                delivery.routing_key.as_str(),
                delivery.data,
                acker,
            ))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.inner
            .close(200, "OK")
            .await
            .map_err(|e| BusError::ChannelFailed(e.to_string()))
    }
}

struct AmqpAcker(lapin::acker::Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), BusError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BusError::AckFailed(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<(), BusError> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| BusError::AckFailed(e.to_string()))
    }
}
