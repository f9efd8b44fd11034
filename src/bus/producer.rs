//! Event bus producer: publishes log payloads to the topic exchange.

use std::sync::Arc;

use tracing::{debug, warn};

use super::broker::{Channel, Connection, ExchangeSpec, Message};
use super::BusError;
use crate::envelope::LogPayload;

/// Publishes severity-tagged log events to the shared topic exchange.
///
/// Each publish unit opens its own channel on the shared connection, declares
/// the exchange (idempotent) and closes the channel afterwards. Failures are
/// reported as [`BusError::PublishFailed`]; there is no retry here.
///
/// ## Example
///
/// ```ignore
/// let producer = EventProducer::new(Arc::new(broker)).await?;
/// producer.publish(&LogPayload::new("event", "hello"), "log.INFO").await?;
/// ```
pub struct EventProducer<C: Connection> {
    connection: Arc<C>,
    exchange: ExchangeSpec,
}

impl<C: Connection> EventProducer<C> {
    /// Create a producer for the `logs_topic` exchange, declaring it once.
    pub async fn new(connection: Arc<C>) -> Result<Self, BusError> {
        Self::with_exchange(connection, ExchangeSpec::logs_topic()).await
    }

    /// Create a producer for a custom exchange, declaring it once.
    pub async fn with_exchange(connection: Arc<C>, exchange: ExchangeSpec) -> Result<Self, BusError> {
        let channel = connection.create_channel().await?;
        let declared = channel.declare_exchange(&exchange).await;
        if let Err(e) = channel.close().await {
            warn!(error = %e, "failed to close setup channel");
        }
        declared?;
        Ok(Self {
            connection,
            exchange,
        })
    }

    pub fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    /// Publish one payload under `routing_key`.
    pub async fn publish(&self, payload: &LogPayload, routing_key: &str) -> Result<(), BusError> {
        self.publish_batch(&[(routing_key, payload)]).await
    }

    /// Publish several payloads on a single channel.
    ///
    /// Stops at the first failure; earlier messages stay published.
    pub async fn publish_batch(&self, items: &[(&str, &LogPayload)]) -> Result<(), BusError> {
        let mut messages = Vec::with_capacity(items.len());
        for (routing_key, payload) in items {
            let body = serde_json::to_vec(payload)
                .map_err(|e| BusError::publish(BusError::Serialization(e.to_string())))?;
            messages.push(Message::new(*routing_key, body));
        }

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(BusError::publish)?;

        let result = self.send_all(&channel, messages).await;
        if let Err(e) = channel.close().await {
            warn!(error = %e, "failed to close publish channel");
        }
        result.map_err(BusError::publish)
    }

    async fn send_all(&self, channel: &C::Channel, messages: Vec<Message>) -> Result<(), BusError> {
        channel.declare_exchange(&self.exchange).await?;
        for message in messages {
            debug!(
                exchange = %self.exchange.name,
                routing_key = %message.routing_key,
                bytes = message.body.len(),
                "publishing event"
            );
            channel.publish(&self.exchange.name, message).await?;
        }
        Ok(())
    }
}
