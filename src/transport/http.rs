//! HTTP adapters: JSON-over-POST client, and the logger-side `/log` endpoint.
//!
//! The client is always compiled. `log_router` requires the `http` feature.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::TransportError;
use crate::envelope::LogPayload;

/// Status and decoded body of one HTTP reply.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    /// JSON body, or the decode error when the body was empty or not JSON.
    pub body: Result<Value, String>,
}

impl HttpReply {
    pub fn is_accepted(&self) -> bool {
        self.status == 202
    }

    /// The decoded body, or `TransportError::Decode` when it was not JSON.
    pub fn json(&self) -> Result<&Value, TransportError> {
        self.body
            .as_ref()
            .map_err(|e| TransportError::Decode(format!("reply body is not JSON: {e}")))
    }

    /// `error` flag of a response envelope body, `false` when absent or when
    /// the body did not decode.
    pub fn error_flag(&self) -> bool {
        self.body
            .as_ref()
            .ok()
            .and_then(|body| body.get("error"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Thin wrapper over a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Client whose requests fail after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// POST `body` as JSON and return the status with the decoded reply.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<HttpReply, TransportError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).map_err(|e| e.to_string());
        debug!(url, status, json = body.is_ok(), "http reply");
        Ok(HttpReply { status, body })
    }
}

/// Posts log entries to a logging endpoint that answers 202 on success.
#[derive(Clone, Debug)]
pub struct HttpLogClient {
    client: HttpClient,
    url: String,
}

impl HttpLogClient {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one entry; any status other than 202 is `TransportError::Remote`.
    pub async fn send(&self, entry: &LogPayload) -> Result<HttpReply, TransportError> {
        let reply = self.client.post_json(&self.url, entry).await?;
        if !reply.is_accepted() {
            return Err(TransportError::Remote(format!(
                "logger answered {} at {}",
                reply.status, self.url
            )));
        }
        Ok(reply)
    }
}

#[cfg(feature = "http")]
mod server {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use tracing::warn;

    use crate::envelope::{LogPayload, ResponseEnvelope};
    use crate::transport::LogSink;

    /// Logger-side HTTP surface: `POST /log` writes the body into `sink`.
    pub fn log_router<S: LogSink>(sink: Arc<S>) -> Router {
        Router::new()
            .route("/log", post(write_log::<S>))
            .with_state(sink)
    }

    async fn write_log<S: LogSink>(
        State(sink): State<Arc<S>>,
        Json(entry): Json<LogPayload>,
    ) -> impl IntoResponse {
        match sink.write(entry).await {
            Ok(()) => (StatusCode::ACCEPTED, Json(ResponseEnvelope::ok("logged"))),
            Err(e) => {
                warn!(error = %e, "log write failed");
                (
                    StatusCode::BAD_REQUEST,
                    Json(ResponseEnvelope::failure(e.to_string())),
                )
            }
        }
    }
}

#[cfg(feature = "http")]
pub use server::log_router;
