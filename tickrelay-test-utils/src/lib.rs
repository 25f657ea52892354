//! Test doubles and a mock kline WebSocket server for exercising the engine
//! without a live exchange or broker.

mod feed;
mod publisher;
mod server;

pub use feed::ScriptedFeed;
pub use publisher::CapturingPublisher;
pub use server::{kline_frame, MockKlineServer, SessionScript};

use chrono::{TimeZone, Utc};
use tickrelay_core::{Interval, PriceUpdate};

/// Build a price update with the change percent derived from open/close.
#[must_use]
pub fn price_update(symbol: &str, open: f64, close: f64) -> PriceUpdate {
    PriceUpdate {
        symbol: symbol.to_string(),
        timeframe: Interval::OneMinute,
        open_price: open,
        close_price: close,
        price_change_percent: (close - open) / open * 100.0,
        event_time: Utc.timestamp_millis_opt(1_680_000_000_000).unwrap(),
    }
}
