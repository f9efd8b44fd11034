//! Gateway: the single entry point that routes envelopes by action.
//!
//! ```text
//! POST /handle ──▶ ActionRouter ──┬─ auth ──▶ AuthService  (HTTP)
//!                                 ├─ mail ──▶ MailService  (HTTP)
//!                                 └─ log  ──▶ LogDelivery  (HTTP | RPC | gRPC | bus)
//! ```

mod clients;
mod router;

#[cfg(feature = "http")]
pub mod http;

pub use clients::{
    AuthService, BusLogDelivery, HttpAuthClient, HttpLogDelivery, HttpMailClient, LogDelivery,
    MailService, RpcLogDelivery,
};
pub use router::ActionRouter;

#[cfg(feature = "grpc")]
pub use clients::GrpcLogDelivery;

#[cfg(feature = "http")]
pub use http::GatewayState;
