//! HTTP surface of the gateway.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `POST /handle`: route an envelope. 202 on success, error status otherwise.
//! - `POST /`: `{ "error": false, "message": "hit the broker" }`.
//! - `GET /ping`: heartbeat, body `.`.
//! - `POST /log-grpc`: write the envelope's `log` payload through a dedicated
//!   delivery (gRPC in the shipped binary), whatever the configured mode.
//!
//! ## Example
//!
//! ```ignore
//! let app = gateway::http::router(GatewayState::new(action_router));
//! gateway::http::serve(app, "0.0.0.0:80", shutdown).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use super::clients::LogDelivery;
use super::router::ActionRouter;
use crate::envelope::{Envelope, ResponseEnvelope};

/// Shared state behind the gateway routes.
#[derive(Clone)]
pub struct GatewayState {
    router: ActionRouter,
    direct_log: Option<Arc<dyn LogDelivery>>,
}

impl GatewayState {
    pub fn new(router: ActionRouter) -> Self {
        Self {
            router,
            direct_log: None,
        }
    }

    /// Enable `POST /log-grpc` backed by `delivery`.
    pub fn with_direct_log(mut self, delivery: Arc<dyn LogDelivery>) -> Self {
        self.direct_log = Some(delivery);
        self
    }
}

/// Build the axum `Router` for the gateway.
pub fn router(state: GatewayState) -> Router {
    let mut app = Router::new()
        .route("/", post(broker_handler))
        .route("/ping", get(ping_handler))
        .route("/handle", post(handle_handler));
    if state.direct_log.is_some() {
        app = app.route("/log-grpc", post(log_grpc_handler));
    }
    app.with_state(state)
}

/// Serve `app` at `addr` until `shutdown` resolves.
pub async fn serve<F>(app: Router, addr: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = ?listener.local_addr().ok(), "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn broker_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(ResponseEnvelope::ok("hit the broker")))
}

async fn ping_handler() -> &'static str {
    "."
}

async fn handle_handler(State(state): State<GatewayState>, body: Bytes) -> impl IntoResponse {
    let (status, response) = state.router.handle_json(&body).await;
    (to_status(status), Json(response))
}

async fn log_grpc_handler(State(state): State<GatewayState>, body: Bytes) -> impl IntoResponse {
    let Some(delivery) = state.direct_log.as_ref() else {
        return (StatusCode::NOT_FOUND, Json(ResponseEnvelope::failure("not found")));
    };
    let result = match Envelope::decode(&body) {
        Ok(envelope) => delivery.deliver(&envelope.log).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(response) => (StatusCode::ACCEPTED, Json(response)),
        Err(e) => {
            warn!(error = %e, "direct log failed");
            (to_status(e.status_code()), Json(ResponseEnvelope::failure(e.to_string())))
        }
    }
}

fn to_status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
