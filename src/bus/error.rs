//! Error type for broker operations.

use thiserror::Error;

/// Error type for channel, exchange, queue, publish and consume operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Opening or using the broker connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Opening a channel failed.
    #[error("channel failed: {0}")]
    ChannelFailed(String),
    /// Declaring an exchange failed, or it exists with different parameters.
    #[error("exchange declare failed: {0}")]
    ExchangeDeclare(String),
    /// Declaring a queue failed.
    #[error("queue declare failed: {0}")]
    QueueDeclare(String),
    /// Binding a queue to a routing-key pattern failed.
    #[error("queue bind failed for pattern {pattern}: {reason}")]
    Bind { pattern: String, reason: String },
    /// A consumer was asked to listen without any routing-key pattern.
    #[error("at least one routing-key pattern is required")]
    NoPatterns,
    /// Starting a consumer failed.
    #[error("consume failed: {0}")]
    ConsumeFailed(String),
    /// Acknowledging or rejecting a delivery failed.
    #[error("ack failed: {0}")]
    AckFailed(String),
    /// Any failure along the publish path, with its cause.
    #[error("publish failed: {0}")]
    PublishFailed(Box<BusError>),
    /// The broker rejected a publish (e.g. unknown exchange).
    #[error("publish rejected: {0}")]
    Rejected(String),
    /// Encoding a message body failed.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Error returned by an event handler for one consumed message.
///
/// Handler errors are logged by the consumer and never reach the broker
/// except as a reject when acknowledge-after-success is enabled.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("downstream rejected event: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

impl BusError {
    /// Wrap a failure from the publish path.
    pub fn publish(cause: BusError) -> Self {
        match cause {
            already @ BusError::PublishFailed(_) => already,
            other => BusError::PublishFailed(Box::new(other)),
        }
    }
}
