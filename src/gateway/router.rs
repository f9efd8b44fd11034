//! Action router: one inbound envelope in, one downstream call, one response.

use std::sync::Arc;

use tracing::{info, warn};

use super::clients::{AuthService, LogDelivery, MailService};
use crate::envelope::{Command, Envelope, ResponseEnvelope};
use crate::error::GatewayError;

/// Dispatches envelopes to exactly one collaborator by action.
///
/// ## Example
///
/// ```ignore
/// let router = ActionRouter::new(auth, mail, Arc::new(RpcLogDelivery::new(rpc)));
/// let (status, response) = router
///     .handle_json(br#"{"action":"log","log":{"name":"event","data":"hi"}}"#)
///     .await;
/// ```
#[derive(Clone)]
pub struct ActionRouter {
    auth: Arc<dyn AuthService>,
    mail: Arc<dyn MailService>,
    log: Arc<dyn LogDelivery>,
}

impl ActionRouter {
    pub fn new(
        auth: Arc<dyn AuthService>,
        mail: Arc<dyn MailService>,
        log: Arc<dyn LogDelivery>,
    ) -> Self {
        Self { auth, mail, log }
    }

    pub fn log_delivery(&self) -> &Arc<dyn LogDelivery> {
        &self.log
    }

    /// Route a decoded envelope.
    ///
    /// Unknown actions fail before any collaborator is called.
    pub async fn route(&self, envelope: Envelope) -> Result<ResponseEnvelope, GatewayError> {
        let command = envelope.into_command()?;
        self.dispatch(command).await
    }

    pub async fn dispatch(&self, command: Command) -> Result<ResponseEnvelope, GatewayError> {
        let action = command.action();
        info!(%action, "routing request");
        match command {
            Command::Auth(credentials) => self.auth.authenticate(&credentials).await,
            Command::Log(entry) => self.log.deliver(&entry).await,
            Command::Mail(mail) => self.mail.send(&mail).await,
        }
    }

    /// Decode and route a raw body, folding errors into a response envelope.
    ///
    /// Returns the HTTP status alongside: 202 on success, otherwise the
    /// error's status code.
    pub async fn handle_json(&self, body: &[u8]) -> (u16, ResponseEnvelope) {
        let result = match Envelope::decode(body) {
            Ok(envelope) => self.route(envelope).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(response) => (202, response),
            Err(e) => {
                warn!(error = %e, "request failed");
                (e.status_code(), ResponseEnvelope::failure(e.to_string()))
            }
        }
    }
}
