use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use relay_gateway::gateway::{
    self, ActionRouter, GatewayState, HttpAuthClient, HttpLogDelivery, HttpMailClient, LogDelivery,
    RpcLogDelivery,
};
use relay_gateway::transport::{HttpClient, HttpLogClient, RpcClient};
use relay_gateway::{telemetry, Config, DeliveryMode};

#[tokio::main]
async fn main() {
    telemetry::init();
    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    info!(mode = %config.log_delivery, addr = %config.gateway_addr, "starting gateway");

    let http = HttpClient::new();
    let log = log_delivery(&config, &http).await?;
    let router = ActionRouter::new(
        Arc::new(HttpAuthClient::new(http.clone(), &config.auth_url)),
        Arc::new(HttpMailClient::new(http.clone(), &config.mail_url)),
        log,
    );

    let state = GatewayState::new(router);
    #[cfg(feature = "grpc")]
    let state = state.with_direct_log(grpc_delivery(&config)?);

    let app = gateway::http::router(state);
    gateway::http::serve(app, &config.gateway_addr, shutdown_signal())
        .await
        .context("serving http")?;
    info!("gateway stopped");
    Ok(())
}

async fn log_delivery(config: &Config, http: &HttpClient) -> Result<Arc<dyn LogDelivery>> {
    let delivery: Arc<dyn LogDelivery> = match config.log_delivery {
        DeliveryMode::Http => Arc::new(HttpLogDelivery::new(HttpLogClient::new(
            http.clone(),
            &config.logger_url,
        ))),
        DeliveryMode::Rpc => Arc::new(RpcLogDelivery::new(RpcClient::new(&config.logger_rpc_addr))),
        DeliveryMode::Grpc => grpc_delivery(config)?,
        DeliveryMode::Bus => bus_delivery(config).await?,
    };
    Ok(delivery)
}

#[cfg(feature = "grpc")]
fn grpc_delivery(config: &Config) -> Result<Arc<dyn LogDelivery>> {
    let client = relay_gateway::transport::GrpcLogClient::new(&config.logger_grpc_url);
    Ok(Arc::new(gateway::GrpcLogDelivery::new(client)))
}

#[cfg(not(feature = "grpc"))]
fn grpc_delivery(_: &Config) -> Result<Arc<dyn LogDelivery>> {
    anyhow::bail!("LOG_DELIVERY=grpc needs the `grpc` feature")
}

#[cfg(feature = "amqp")]
async fn bus_delivery(config: &Config) -> Result<Arc<dyn LogDelivery>> {
    use relay_gateway::bootstrap::{self, Backoff};
    use relay_gateway::bus::AmqpConnection;

    let connection = bootstrap::connect("rabbitmq", &Backoff::broker(), |_| {
        AmqpConnection::open(&config.amqp_url)
    })
    .await?;
    let delivery = gateway::BusLogDelivery::connect(Arc::new(connection)).await?;
    Ok(Arc::new(delivery))
}

#[cfg(not(feature = "amqp"))]
async fn bus_delivery(_: &Config) -> Result<Arc<dyn LogDelivery>> {
    anyhow::bail!("LOG_DELIVERY=bus needs the `amqp` feature")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
