//! Process bootstrap: broker connection, consumer wiring, signal-driven
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tickrelay_amqp::{AmqpRelay, AmqpRelayConfig};
use tickrelay_binance::{BinanceFeed, BinanceFeedConfig};
use tickrelay_config::AppConfig;
use tickrelay_gateway::{CommandConsumer, CommandHandler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::SubscriptionManager;

pub async fn run(config: AppConfig) -> Result<()> {
    let relay_config = AmqpRelayConfig {
        url: config.amqp.url.clone(),
        exchange: config.amqp.exchange.clone(),
        connect_attempts: config.amqp.connect_attempts,
        connect_backoff: Duration::from_secs(config.amqp.connect_backoff_secs),
    };
    let relay = Arc::new(
        AmqpRelay::connect(&relay_config)
            .await
            .context("failed to establish the initial broker connection")?,
    );
    relay
        .declare_queue(&config.amqp.command_queue, &config.amqp.command_queue)
        .await
        .context("failed to declare the command queue")?;

    let feed = Arc::new(BinanceFeed::new(BinanceFeedConfig {
        ws_url: config.feed.ws_url.clone(),
        reconnect_delay: Duration::from_secs(config.feed.reconnect_delay_secs),
    }));

    let shutdown = CancellationToken::new();
    let (handle, manager_task) =
        SubscriptionManager::spawn(feed, relay.clone(), shutdown.clone());

    let consumer_relay = relay.clone();
    let queue = config.amqp.command_queue.clone();
    let handler: Arc<dyn CommandHandler> = Arc::new(handle);
    let mut consumer_task =
        tokio::spawn(async move { consumer_relay.consume(&queue, handler).await });

    let consumer_failure = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("termination signal received; shutting down");
            None
        }
        result = &mut consumer_task => Some(result),
    };

    shutdown.cancel();
    if let Err(err) = manager_task.await {
        warn!(error = %err, "subscription manager task panicked");
    }
    if consumer_failure.is_none() {
        consumer_task.abort();
    }
    if let Err(err) = relay.disconnect().await {
        warn!(error = %err, "broker disconnect failed");
    }

    match consumer_failure {
        // Losing the command consumer's own infrastructure is fatal to the
        // whole process, unlike failures inside a single user's pipeline.
        Some(Ok(Err(err))) => Err(anyhow!(err).context("command consumer terminated")),
        Some(Ok(Ok(()))) => Err(anyhow!("command consumer exited unexpectedly")),
        Some(Err(err)) => Err(anyhow!(err).context("command consumer task panicked")),
        None => Ok(()),
    }
}
