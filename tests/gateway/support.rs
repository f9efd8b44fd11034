//! Stub downstream services.

use std::sync::{Arc, Mutex};

use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use relay_gateway::gateway::{
    ActionRouter, HttpAuthClient, HttpMailClient, LogDelivery, RpcLogDelivery,
};
use relay_gateway::transport::{HttpClient, RpcClient};

/// A downstream that answers every POST with a fixed status and body, and
/// records what it was sent.
#[derive(Clone)]
pub struct Stub {
    pub url: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Stub {
    pub async fn start(status: u16, reply: Value) -> Self {
        let reply = reply.to_string();
        Self::start_with(status, "application/json", reply).await
    }

    /// A downstream answering with a raw, non-JSON body.
    pub async fn start_raw(status: u16, reply: &str) -> Self {
        Self::start_with(status, "text/html", reply.to_string()).await
    }

    async fn start_with(status: u16, content_type: &'static str, reply: String) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let app = Router::new().route(
            "/",
            post(move |Json(body): Json<Value>| {
                let recorded = recorded.clone();
                let reply = reply.clone();
                async move {
                    recorded.lock().unwrap().push(body);
                    (
                        StatusCode::from_u16(status).unwrap(),
                        [(header::CONTENT_TYPE, content_type)],
                        reply,
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{addr}/"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Router wired to HTTP stubs for auth and mail, and `log` for logging.
pub fn router(auth: &Stub, mail: &Stub, log: Arc<dyn LogDelivery>) -> ActionRouter {
    let http = HttpClient::new();
    ActionRouter::new(
        Arc::new(HttpAuthClient::new(http.clone(), &auth.url)),
        Arc::new(HttpMailClient::new(http, &mail.url)),
        log,
    )
}

/// A log delivery pointing at a port nobody listens on.
pub fn unreachable_log() -> Arc<dyn LogDelivery> {
    Arc::new(RpcLogDelivery::new(RpcClient::new("127.0.0.1:1")))
}
