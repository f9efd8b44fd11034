use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use relay_gateway::bootstrap::{self, Backoff};
use relay_gateway::bus::{AmqpConnection, ConsumerOptions, EventConsumer};
use relay_gateway::transport::{HttpClient, HttpLogClient};
use relay_gateway::{telemetry, Config, ForwardingHandler};

#[tokio::main]
async fn main() {
    telemetry::init();
    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "listener failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let connection = bootstrap::connect("rabbitmq", &Backoff::broker(), |_| {
        AmqpConnection::open(&config.amqp_url)
    })
    .await?;
    let connection = Arc::new(connection);

    let logger = HttpLogClient::new(HttpClient::new(), &config.logger_url);
    let options = ConsumerOptions {
        workers: config.consumer_workers,
        ack_mode: config.consumer_ack,
        ..ConsumerOptions::default()
    };
    let consumer = EventConsumer::new(
        connection.clone(),
        Arc::new(ForwardingHandler::new(logger)),
        options,
    )
    .await
    .context("creating consumer")?;

    info!(topics = ?config.listen_topics, "listening for events");
    let stats = consumer
        .listen(&config.listen_topics, shutdown_signal())
        .await
        .context("consuming events")?;
    info!(
        received = stats.received,
        handled = stats.handled,
        failed = stats.failed,
        "listener stopped"
    );

    if let Err(e) = connection.close().await {
        error!(error = %e, "closing broker connection");
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
