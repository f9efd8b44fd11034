//! Transport-level failures shared by the HTTP, binary RPC and gRPC adapters.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the remote endpoint.
    #[error("dial {addr} failed: {reason}")]
    Dial { addr: String, reason: String },
    /// Connection established but the request could not be sent or read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Request body could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
    /// Reply body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
    /// A frame exceeded the size limit.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    /// The remote side answered with an error.
    #[error("remote error: {0}")]
    Remote(String),
    /// Call did not complete within its deadline.
    #[error("deadline of {0:?} exceeded")]
    Timeout(std::time::Duration),
    /// HTTP client failure (connection refused, bad URL, ...).
    #[error("http: {0}")]
    Http(String),
    /// gRPC call returned a non-OK status.
    #[error("grpc status {code}: {message}")]
    Status { code: String, message: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Http(format!("timed out: {err}"));
        }
        TransportError::Http(err.to_string())
    }
}

#[cfg(feature = "grpc")]
impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        TransportError::Status {
            code: format!("{:?}", status.code()),
            message: status.message().to_string(),
        }
    }
}
