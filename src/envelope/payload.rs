//! Sub-payloads carried by an inbound envelope.
//!
//! The gateway never inspects or mutates these; they are forwarded verbatim to
//! whichever downstream owns the action.

use serde::{Deserialize, Serialize};

/// Credentials for the authentication service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// A log record: category (`name`) plus free-text body.
///
/// Used as the HTTP/RPC call body and as the event-bus message body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: String,
}

impl LogPayload {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// A mail message for the mail service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailPayload {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}
