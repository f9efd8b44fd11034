//! Listener side of the bus: forwards consumed log events to the logger.

use async_trait::async_trait;
use tracing::debug;

use crate::bus::{EventHandler, HandlerError};
use crate::envelope::LogPayload;
use crate::transport::{HttpLogClient, TransportError};

/// Routes a consumed event by its `name`.
///
/// `auth` is accepted and dropped. Everything else, including `log`,
/// `event` and unrecognized names, is POSTed to the logging endpoint.
pub struct ForwardingHandler {
    logger: HttpLogClient,
}

impl ForwardingHandler {
    pub fn new(logger: HttpLogClient) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl EventHandler for ForwardingHandler {
    async fn handle(&self, event: LogPayload, routing_key: &str) -> Result<(), HandlerError> {
        match event.name.as_str() {
            "auth" => {
                debug!(routing_key, "auth event ignored");
                Ok(())
            }
            _ => {
                self.logger.send(&event).await.map_err(|e| match e {
                    TransportError::Remote(reason) => HandlerError::Rejected(reason),
                    other => HandlerError::Transport(other),
                })?;
                debug!(routing_key, name = %event.name, "event forwarded");
                Ok(())
            }
        }
    }
}
