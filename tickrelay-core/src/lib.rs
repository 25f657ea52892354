//! Domain types shared across the tickrelay workspace, plus the pure
//! threshold classifier that turns price moves into alert levels.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candle interval over which open/close prices are compared.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneSecond,
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl Interval {
    /// Binance-compatible stream label (`1m`, `1h`, ...).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OneSecond => "1s",
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // The month label is uppercase on the wire; resolve it before the
        // case fold so it cannot collide with `1m`.
        if value == "1M" {
            return Ok(Self::OneMonth);
        }
        match value.to_lowercase().as_str() {
            "1s" => Ok(Self::OneSecond),
            "1m" | "1min" | "1minute" => Ok(Self::OneMinute),
            "3m" | "3min" => Ok(Self::ThreeMinutes),
            "5m" | "5min" => Ok(Self::FiveMinutes),
            "15m" | "15min" => Ok(Self::FifteenMinutes),
            "30m" | "30min" => Ok(Self::ThirtyMinutes),
            "1h" | "60m" | "1hour" => Ok(Self::OneHour),
            "2h" => Ok(Self::TwoHours),
            "4h" => Ok(Self::FourHours),
            "6h" => Ok(Self::SixHours),
            "8h" => Ok(Self::EightHours),
            "12h" => Ok(Self::TwelveHours),
            "1d" | "day" | "d" => Ok(Self::OneDay),
            "3d" => Ok(Self::ThreeDays),
            "1w" | "week" | "w" => Ok(Self::OneWeek),
            "1mo" | "1month" | "month" => Ok(Self::OneMonth),
            other => Err(format!("unsupported interval '{other}'")),
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.label().to_string()
    }
}

/// A per-user streaming subscription request.
///
/// Immutable once handed to the subscription manager; a later request for the
/// same `user_id` supersedes the previous one instead of merging with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub user_id: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub timeframe: Interval,
    /// Ascending percentage magnitudes; level N corresponds to `thresholds[N-1]`.
    #[serde(default)]
    pub thresholds: Vec<f64>,
}

/// Inbound control command consumed from the durable command queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Subscribe(SubscriptionRequest),
    Unsubscribe { user_id: String },
}

/// One normalized price observation produced by the feed client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub symbol: String,
    pub timeframe: Interval,
    pub open_price: f64,
    pub close_price: f64,
    pub price_change_percent: f64,
    pub event_time: DateTime<Utc>,
}

/// Leveled alert published to the relay, keyed by `level_<N>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub user_id: String,
    pub symbol: String,
    pub timeframe: Interval,
    pub price_change_percent: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub change_level: usize,
}

impl AlertMessage {
    /// Build an alert for `user_id` from a classified price update.
    #[must_use]
    pub fn from_update(user_id: &str, update: &PriceUpdate, change_level: usize) -> Self {
        Self {
            user_id: user_id.to_string(),
            symbol: update.symbol.clone(),
            timeframe: update.timeframe,
            price_change_percent: update.price_change_percent,
            open_price: update.open_price,
            close_price: update.close_price,
            change_level,
        }
    }

    /// Routing key directing this alert to the queue bound for its severity.
    #[must_use]
    pub fn routing_key(&self) -> String {
        format!("level_{}", self.change_level)
    }
}

/// Map an absolute price change onto a 1-based alert level.
///
/// `thresholds` is scanned in ascending order and the highest threshold met
/// wins; the magnitudes are monotonically increasing, so any threshold met
/// implies all lower ones are met too. Returns 0 when no threshold is met or
/// the list is empty.
#[must_use]
pub fn classify(change_percent: f64, thresholds: &[f64]) -> usize {
    let magnitude = change_percent.abs();
    let mut level = 0;
    for (idx, threshold) in thresholds.iter().enumerate() {
        if magnitude >= *threshold {
            level = idx + 1;
        }
    }
    level
}
