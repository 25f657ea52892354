//! Binance combined-kline WebSocket feed client.

use std::time::Duration;

use async_trait::async_trait;
use tickrelay_core::{Interval, PriceUpdate};
use tickrelay_gateway::{GatewayError, GatewayResult, PriceFeed};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod ws;

pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443";

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct BinanceFeedConfig {
    pub ws_url: String,
    /// Fixed delay between reconnect attempts after a connection failure.
    pub reconnect_delay: Duration,
}

impl Default for BinanceFeedConfig {
    fn default() -> Self {
        Self {
            ws_url: BINANCE_WS_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Streams multiplexed kline frames for a set of symbols and normalizes them
/// into [`PriceUpdate`]s. Reconnects with a fixed delay for as long as the
/// owning task is alive; malformed frames are logged and dropped.
pub struct BinanceFeed {
    config: BinanceFeedConfig,
}

impl BinanceFeed {
    pub fn new(config: BinanceFeedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    async fn stream(
        &self,
        symbols: &[String],
        timeframe: Interval,
        cancel: CancellationToken,
    ) -> GatewayResult<mpsc::Receiver<PriceUpdate>> {
        if symbols.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "subscription declares no symbols".into(),
            ));
        }
        let url = ws::stream_url(&self.config.ws_url, symbols, timeframe);
        // Capacity 1: no buffering beyond a single in-flight message, the
        // consumer's pull is the only backpressure.
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(ws::run_feed_loop(
            url,
            timeframe,
            self.config.reconnect_delay,
            tx,
            cancel,
        ));
        Ok(rx)
    }
}
