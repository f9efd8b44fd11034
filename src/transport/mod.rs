//! Transport adapters between the gateway and downstream services.
//!
//! - [`http`]: JSON over HTTP POST (reqwest), plus the logger `/log` route
//! - [`rpc`]: length-prefixed bitcode frames over TCP
//! - `grpc`: tonic `logs.LogService` (requires the `grpc` feature)
//!
//! Logger-side servers write into a [`LogSink`].

mod error;
pub mod http;
pub mod rpc;
mod sink;

#[cfg(feature = "grpc")]
pub mod grpc;

pub use error::TransportError;
pub use http::{HttpClient, HttpLogClient, HttpReply};
pub use rpc::{RpcClient, RpcPayload, RpcReply, RpcRequest, RpcServer};
pub use sink::{LogSink, MemoryLogSink, SinkError};

#[cfg(feature = "http")]
pub use http::log_router;

#[cfg(feature = "grpc")]
pub use grpc::{GrpcLogClient, LogServer};
