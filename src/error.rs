//! Request-scoped errors surfaced by the gateway.

use thiserror::Error;

use crate::bus::BusError;
use crate::transport::TransportError;

/// Error type for routing one inbound envelope.
///
/// Every variant is converted into a `ResponseEnvelope` with `error: true`
/// before it reaches the external caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Body failed to decode, was too large, or held more than one JSON value.
    #[error("{0}")]
    Malformed(String),
    /// Valid JSON naming an action outside the closed set.
    #[error("unknown action")]
    UnknownAction(String),
    /// Authentication service rejected the credentials.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Authentication service answered with an unexpected status or an
    /// unreadable body.
    #[error("upstream call failed: {0}")]
    UpstreamFailed(String),
    /// Mail service did not accept the message.
    #[error("mail delivery failed: {0}")]
    MailDeliveryFailed(String),
    /// Logging service did not accept the entry.
    #[error("log delivery failed: {0}")]
    LogDeliveryFailed(String),
    /// Dial, send, or receive failure on a transport adapter.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Event-bus publish failure.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The gateway itself failed (e.g. could not encode a response).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Malformed(err.to_string())
    }
}

impl GatewayError {
    /// Map this error to the HTTP status returned to the caller.
    ///
    /// Request failures, including rejected credentials, surface as 400.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Internal(_) => 500,
            _ => 400,
        }
    }
}
