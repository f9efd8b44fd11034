//! gRPC log transport: `logs.LogService/WriteLog`.
//!
//! Requires the `grpc` feature. Messages are hand-written prost structs
//! (standard protobuf wire format); the service stubs come from manual
//! codegen in `build.rs`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Endpoint, Server};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use super::{LogSink, TransportError};
use crate::envelope::LogPayload;

/// Result string returned on a successful write.
pub const GRPC_LOGGED: &str = "logged via grpc";

/// Dial plus call must finish within this.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Clone, PartialEq, prost::Message)]
pub struct Log {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub data: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogRequest {
    #[prost(message, optional, tag = "1")]
    pub log_entry: Option<Log>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogResponse {
    #[prost(string, tag = "1")]
    pub result: String,
}

impl From<&LogPayload> for LogRequest {
    fn from(entry: &LogPayload) -> Self {
        LogRequest {
            log_entry: Some(Log {
                name: entry.name.clone(),
                data: entry.data.clone(),
            }),
        }
    }
}

include!(concat!(env!("OUT_DIR"), "/logs.LogService.rs"));

pub use log_service_client::LogServiceClient;
pub use log_service_server::{LogService, LogServiceServer};

/// Client that dials per call under a single deadline.
#[derive(Clone, Debug)]
pub struct GrpcLogClient {
    url: String,
    deadline: Duration,
}

impl GrpcLogClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Write one entry and return the server's result string.
    pub async fn write_log(&self, entry: &LogPayload) -> Result<String, TransportError> {
        match tokio::time::timeout(self.deadline, self.dial_and_call(entry)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.deadline)),
        }
    }

    async fn dial_and_call(&self, entry: &LogPayload) -> Result<String, TransportError> {
        let dial_err = |e: tonic::transport::Error| TransportError::Dial {
            addr: self.url.clone(),
            reason: e.to_string(),
        };
        let channel = Endpoint::from_shared(self.url.clone())
            .map_err(dial_err)?
            .connect()
            .await
            .map_err(dial_err)?;

        let mut client = LogServiceClient::new(channel);
        let response = client.write_log(LogRequest::from(entry)).await?;
        let result = response.into_inner().result;
        debug!(url = %self.url, %result, "grpc log written");
        Ok(result)
    }
}

/// Logger-side gRPC service writing into a sink.
pub struct LogServer<S: LogSink> {
    sink: Arc<S>,
}

impl<S: LogSink> LogServer<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }
}

#[tonic::async_trait]
impl<S: LogSink> LogService for LogServer<S> {
    async fn write_log(
        &self,
        request: Request<LogRequest>,
    ) -> Result<Response<LogResponse>, Status> {
        let input = request.into_inner().log_entry.unwrap_or_default();
        let entry = LogPayload::new(input.name, input.data);

        match self.sink.write(entry).await {
            Ok(()) => Ok(Response::new(LogResponse {
                result: GRPC_LOGGED.to_string(),
            })),
            Err(e) => {
                warn!(error = %e, "grpc log write failed");
                Err(Status::internal(format!("failed: {e}")))
            }
        }
    }
}

/// Build the tonic service for `sink`, to compose with other routes.
pub fn log_server<S: LogSink>(sink: Arc<S>) -> LogServiceServer<LogServer<S>> {
    LogServiceServer::new(LogServer::new(sink))
}

/// Serve `LogService` on an already-bound listener until `shutdown` resolves.
pub async fn serve_grpc<S, F>(
    sink: Arc<S>,
    listener: TcpListener,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    S: LogSink,
    F: Future<Output = ()>,
{
    info!(addr = ?listener.local_addr().ok(), "grpc server listening");
    Server::builder()
        .add_service(log_server(sink))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}
