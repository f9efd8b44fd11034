//! Binary RPC: length-prefixed bitcode frames over TCP.
//!
//! Each frame is a big-endian `u32` byte count followed by a bitcode body.
//! A connection carries any number of request/reply pairs in order; the
//! client here dials once per call.
//!
//! ## Example
//!
//! ```ignore
//! let server = Arc::new(RpcServer::new(Arc::new(MemoryLogSink::new())));
//! let listener = TcpListener::bind("0.0.0.0:5001").await?;
//! tokio::spawn(server.serve(listener, shutdown));
//!
//! let reply = RpcClient::new("logger-service:5001")
//!     .log_info(&LogPayload::new("event", "hello"))
//!     .await?;
//! assert_eq!(reply, "Processed payload via RPC: event!");
//! ```

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::{LogSink, TransportError};
use crate::envelope::LogPayload;

/// Method name served by [`RpcServer`].
pub const LOG_INFO_METHOD: &str = "RPCServer.LogInfo";

/// Frames larger than this are rejected on read and write.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcPayload {
    pub name: String,
    pub data: String,
}

impl From<&LogPayload> for RpcPayload {
    fn from(entry: &LogPayload) -> Self {
        Self {
            name: entry.name.clone(),
            data: entry.data.clone(),
        }
    }
}

impl From<RpcPayload> for LogPayload {
    fn from(payload: RpcPayload) -> Self {
        LogPayload::new(payload.name, payload.data)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub seq: u64,
    pub method: String,
    pub args: RpcPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub seq: u64,
    pub error: Option<String>,
    pub result: String,
}

impl RpcReply {
    fn ok(seq: u64, result: String) -> Self {
        Self {
            seq,
            error: None,
            result,
        }
    }

    fn err(seq: u64, error: impl Into<String>) -> Self {
        Self {
            seq,
            error: Some(error.into()),
            result: String::new(),
        }
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = bitcode::serialize(value).map_err(|e| TransportError::Encode(e.to_string()))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            size: body.len(),
            limit: MAX_FRAME_BYTES,
        });
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` when the peer closed cleanly between frames.
///
/// A stream that ends inside the length prefix or the body is an
/// `UnexpectedEof` I/O error.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {filled} of 4 length bytes"),
                )))
            }
            n => filled += n,
        }
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_BYTES,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    bitcode::deserialize(&body)
        .map(Some)
        .map_err(|e| TransportError::Decode(e.to_string()))
}

/// Client that dials the server for every call.
#[derive(Debug)]
pub struct RpcClient {
    addr: String,
    seq: AtomicU64,
}

impl RpcClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Invoke `method` with `args` and return the result string.
    pub async fn call(&self, method: &str, args: RpcPayload) -> Result<String, TransportError> {
        let mut stream =
            TcpStream::connect(&self.addr)
                .await
                .map_err(|e| TransportError::Dial {
                    addr: self.addr.clone(),
                    reason: e.to_string(),
                })?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            seq,
            method: method.to_string(),
            args,
        };
        write_frame(&mut stream, &request).await?;

        let reply: RpcReply = read_frame(&mut stream)
            .await?
            .ok_or_else(|| TransportError::Decode("connection closed before reply".into()))?;
        if reply.seq != seq {
            return Err(TransportError::Decode(format!(
                "reply seq {} does not match request {seq}",
                reply.seq
            )));
        }
        match reply.error {
            Some(error) => Err(TransportError::Remote(error)),
            None => Ok(reply.result),
        }
    }

    pub async fn log_info(&self, entry: &LogPayload) -> Result<String, TransportError> {
        self.call(LOG_INFO_METHOD, RpcPayload::from(entry)).await
    }
}

/// Logger-side RPC server writing `RPCServer.LogInfo` calls into a sink.
pub struct RpcServer<S: LogSink> {
    sink: Arc<S>,
}

impl<S: LogSink> RpcServer<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    /// Dispatch one request.
    pub async fn handle(&self, request: RpcRequest) -> RpcReply {
        if request.method != LOG_INFO_METHOD {
            return RpcReply::err(
                request.seq,
                format!("rpc: can't find method {}", request.method),
            );
        }
        let name = request.args.name.clone();
        match self.sink.write(request.args.into()).await {
            Ok(()) => RpcReply::ok(request.seq, format!("Processed payload via RPC: {name}!")),
            Err(e) => {
                warn!(error = %e, "rpc log write failed");
                RpcReply::err(request.seq, e.to_string())
            }
        }
    }

    /// Accept connections until `shutdown` resolves, one task per connection.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(addr = ?listener.local_addr().ok(), "rpc server listening");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("rpc server stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            if let Some(pause) = accept_backoff(&e) {
                                warn!(error = %e, "rpc accept failed, pausing");
                                tokio::time::sleep(pause).await;
                            } else {
                                debug!(error = %e, "rpc connection dropped before accept");
                            }
                            continue;
                        }
                    };
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_connection(stream).await {
                            warn!(%peer, error = %e, "rpc connection ended with error");
                        }
                    });
                }
            }
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<(), TransportError> {
        while let Some(request) = read_frame::<_, RpcRequest>(&mut stream).await? {
            debug!(seq = request.seq, method = %request.method, "rpc request");
            let reply = self.handle(request).await;
            write_frame(&mut stream, &reply).await?;
        }
        Ok(())
    }
}

/// Pause before the next `accept` after `err`, or `None` when the error only
/// concerns one peer and accepting can resume at once.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => None,
        // EMFILE, ENFILE and the like: give descriptors a moment to free up.
        _ => Some(Duration::from_millis(100)),
    }
}
