//! Downstream collaborators of the action router.
//!
//! Each trait is one narrow seam; the router holds them as trait objects so
//! tests can swap in counting stubs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::bus::{Connection, EventProducer, Severity};
use crate::config::DeliveryMode;
use crate::envelope::{AuthPayload, LogPayload, MailPayload, ResponseEnvelope};
use crate::error::GatewayError;
use crate::transport::{HttpClient, HttpLogClient, RpcClient, TransportError};

#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    async fn authenticate(&self, credentials: &AuthPayload) -> Result<ResponseEnvelope, GatewayError>;
}

#[async_trait]
pub trait MailService: Send + Sync + 'static {
    async fn send(&self, mail: &MailPayload) -> Result<ResponseEnvelope, GatewayError>;
}

/// The single active path for `log` actions.
#[async_trait]
pub trait LogDelivery: Send + Sync + 'static {
    fn mode(&self) -> DeliveryMode;
    async fn deliver(&self, entry: &LogPayload) -> Result<ResponseEnvelope, GatewayError>;
}

/// Authentication over HTTP; expects 202 with a response envelope body.
pub struct HttpAuthClient {
    client: HttpClient,
    url: String,
}

impl HttpAuthClient {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AuthService for HttpAuthClient {
    async fn authenticate(&self, credentials: &AuthPayload) -> Result<ResponseEnvelope, GatewayError> {
        let reply = self.client.post_json(&self.url, credentials).await?;
        debug!(status = reply.status, "auth reply");

        if reply.status == 401 {
            return Err(GatewayError::InvalidCredentials);
        }
        if !reply.is_accepted() {
            return Err(GatewayError::UpstreamFailed(format!(
                "authentication service answered {}",
                reply.status
            )));
        }
        let body = reply
            .json()
            .map_err(|e| GatewayError::UpstreamFailed(format!("authentication service: {e}")))?;
        if reply.error_flag() {
            return Err(GatewayError::InvalidCredentials);
        }

        let data = body.get("data").cloned();
        Ok(ResponseEnvelope::with_data("authenticated", data))
    }
}

/// Mail over HTTP; anything but 202 is a failed delivery.
pub struct HttpMailClient {
    client: HttpClient,
    url: String,
}

impl HttpMailClient {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl MailService for HttpMailClient {
    async fn send(&self, mail: &MailPayload) -> Result<ResponseEnvelope, GatewayError> {
        let reply = self
            .client
            .post_json(&self.url, mail)
            .await
            .map_err(|e| GatewayError::MailDeliveryFailed(e.to_string()))?;
        if !reply.is_accepted() {
            return Err(GatewayError::MailDeliveryFailed(format!(
                "mail service answered {}",
                reply.status
            )));
        }
        Ok(ResponseEnvelope::ok(format!("message sent to {}", mail.to)))
    }
}

pub struct HttpLogDelivery {
    client: HttpLogClient,
}

impl HttpLogDelivery {
    pub fn new(client: HttpLogClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogDelivery for HttpLogDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Http
    }

    async fn deliver(&self, entry: &LogPayload) -> Result<ResponseEnvelope, GatewayError> {
        self.client.send(entry).await.map_err(log_failed)?;
        Ok(ResponseEnvelope::ok("logged"))
    }
}

/// Binary RPC; the success message is the server's own result string.
pub struct RpcLogDelivery {
    client: RpcClient,
}

impl RpcLogDelivery {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogDelivery for RpcLogDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Rpc
    }

    async fn deliver(&self, entry: &LogPayload) -> Result<ResponseEnvelope, GatewayError> {
        let result = self.client.log_info(entry).await.map_err(log_failed)?;
        Ok(ResponseEnvelope::ok(result))
    }
}

#[cfg(feature = "grpc")]
pub struct GrpcLogDelivery {
    client: crate::transport::GrpcLogClient,
}

#[cfg(feature = "grpc")]
impl GrpcLogDelivery {
    pub fn new(client: crate::transport::GrpcLogClient) -> Self {
        Self { client }
    }
}

#[cfg(feature = "grpc")]
#[async_trait]
impl LogDelivery for GrpcLogDelivery {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Grpc
    }

    async fn deliver(&self, entry: &LogPayload) -> Result<ResponseEnvelope, GatewayError> {
        let result = self.client.write_log(entry).await.map_err(log_failed)?;
        Ok(ResponseEnvelope::ok(result))
    }
}

/// Publishes to the event bus with routing key `log.INFO`.
pub struct BusLogDelivery<C: Connection> {
    producer: EventProducer<C>,
}

impl<C: Connection> BusLogDelivery<C> {
    pub fn new(producer: EventProducer<C>) -> Self {
        Self { producer }
    }

    /// Build the producer on `connection`, declaring the exchange.
    pub async fn connect(connection: Arc<C>) -> Result<Self, GatewayError> {
        Ok(Self::new(EventProducer::new(connection).await?))
    }
}

#[async_trait]
impl<C: Connection> LogDelivery for BusLogDelivery<C> {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Bus
    }

    async fn deliver(&self, entry: &LogPayload) -> Result<ResponseEnvelope, GatewayError> {
        self.producer
            .publish(entry, Severity::Info.routing_key())
            .await?;
        Ok(ResponseEnvelope::ok("logged via rabbitmq"))
    }
}

fn log_failed(err: TransportError) -> GatewayError {
    GatewayError::LogDeliveryFailed(err.to_string())
}
