pub mod bootstrap;
pub mod bus;
pub mod config;
mod envelope;
mod error;
pub mod gateway;
pub mod listener;
pub mod telemetry;
pub mod transport;

pub use bootstrap::{Backoff, BootstrapError};
pub use config::{Config, ConfigError, DeliveryMode};
pub use envelope::{
    Action, AuthPayload, Command, Envelope, LogPayload, MailPayload, ResponseEnvelope,
    MAX_BODY_BYTES,
};
pub use error::GatewayError;
pub use gateway::ActionRouter;
pub use listener::ForwardingHandler;
