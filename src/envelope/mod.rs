//! Inbound envelope and the closed set of actions it can name.
//!
//! The wire shape is `{action, auth?, log?, mail?}`. Decoding produces an
//! [`Envelope`], which is converted once into a [`Command`], a tagged variant
//! carrying exactly the payload its action needs.

mod payload;
mod response;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use payload::{AuthPayload, LogPayload, MailPayload};
pub use response::ResponseEnvelope;

use crate::error::GatewayError;

/// Largest request body accepted by [`Envelope::decode`].
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Action names understood by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Auth,
    Log,
    Mail,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Auth => "auth",
            Action::Log => "log",
            Action::Mail => "mail",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth" => Ok(Action::Auth),
            "log" => Ok(Action::Log),
            "mail" => Ok(Action::Mail),
            other => Err(GatewayError::UnknownAction(other.to_string())),
        }
    }
}

/// The request envelope as it arrives on the wire.
///
/// Only the sub-payload matching `action` is meaningful; missing sub-payloads
/// decode to their empty default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub auth: AuthPayload,
    #[serde(default)]
    pub log: LogPayload,
    #[serde(default)]
    pub mail: MailPayload,
}

impl Envelope {
    /// Decode a request body.
    ///
    /// Rejects bodies over [`MAX_BODY_BYTES`], invalid JSON, and bodies that
    /// contain more than one JSON value.
    pub fn decode(body: &[u8]) -> Result<Self, GatewayError> {
        if body.len() > MAX_BODY_BYTES {
            return Err(GatewayError::Malformed(format!(
                "body must not be larger than {} bytes",
                MAX_BODY_BYTES
            )));
        }

        let mut de = serde_json::Deserializer::from_slice(body);
        let envelope = Envelope::deserialize(&mut de)?;
        de.end()
            .map_err(|_| GatewayError::Malformed("body must have only a single json value".into()))?;
        Ok(envelope)
    }

    pub fn action(&self) -> Result<Action, GatewayError> {
        self.action.parse()
    }

    /// Select the payload for this envelope's action.
    pub fn into_command(self) -> Result<Command, GatewayError> {
        Ok(match self.action()? {
            Action::Auth => Command::Auth(self.auth),
            Action::Log => Command::Log(self.log),
            Action::Mail => Command::Mail(self.mail),
        })
    }
}

/// One routed request: an action together with its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Auth(AuthPayload),
    Log(LogPayload),
    Mail(MailPayload),
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::Auth(_) => Action::Auth,
            Command::Log(_) => Action::Log,
            Command::Mail(_) => Action::Mail,
        }
    }
}
