//! Capability traits for the external collaborators (exchange feed, message
//! relay) used by the engine. The engine depends only on these traits so
//! tests can substitute doubles that replay canned price updates or capture
//! published alerts without a live exchange or broker connection.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tickrelay_core::{AlertMessage, Command, Interval, PriceUpdate};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Convenience alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Common error type returned by gateway implementations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failures (network, remote close, timeouts).
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization or payload parsing failures.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The request parameters are invalid for the target service.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Helper used by connectors when mapping any error type into a gateway error.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A live market-data source yielding normalized price updates.
///
/// Each `stream` call opens one multiplexed subscription covering all
/// requested symbols at the given timeframe. The returned channel carries at
/// most one in-flight update; it closes once `cancel` fires or the feed task
/// gives up. The sequence is one-shot per task: reconnects happen inside the
/// task, a cancelled stream is never restarted.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn stream(
        &self,
        symbols: &[String],
        timeframe: Interval,
        cancel: CancellationToken,
    ) -> GatewayResult<mpsc::Receiver<PriceUpdate>>;
}

/// Publishes classified alerts to a routed destination keyed by level.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    /// Publish one alert. Failures surface to the caller; the caller decides
    /// whether they are fatal (in the pipeline they are logged and skipped).
    async fn publish(&self, routing_key: &str, message: &AlertMessage) -> GatewayResult<()>;
}

/// Receives decoded control commands from the consumer loop.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle one inbound command. An error causes the delivery to be
    /// negatively acknowledged and returned to the broker.
    async fn handle(&self, command: Command) -> GatewayResult<()>;
}

/// Consumes control commands from a durable queue, indefinitely.
#[async_trait]
pub trait CommandConsumer: Send + Sync {
    /// Run the consume loop on `queue`, invoking `handler` per decoded
    /// command. Returns only on infrastructure failure, which the caller
    /// treats as fatal to the process.
    async fn consume(&self, queue: &str, handler: Arc<dyn CommandHandler>) -> GatewayResult<()>;
}
