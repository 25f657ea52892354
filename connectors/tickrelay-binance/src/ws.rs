use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tickrelay_core::{Interval, PriceUpdate};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) fn stream_url(base_url: &str, symbols: &[String], timeframe: Interval) -> String {
    let streams = symbols
        .iter()
        .map(|symbol| format!("{}@kline_{}", symbol.to_lowercase(), timeframe.label()))
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/stream?streams={}", base_url.trim_end_matches('/'), streams)
}

/// Why one connected session ended, deciding whether the outer loop reconnects.
enum SessionEnd {
    Cancelled,
    Disconnected,
    ReceiverGone,
}

/// Connect / drain / reconnect until the token fires or the downstream
/// receiver is dropped.
pub(crate) async fn run_feed_loop(
    url: String,
    timeframe: Interval,
    reconnect_delay: Duration,
    tx: mpsc::Sender<PriceUpdate>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                info!(url = %url, "kline stream connected");
                match drain_socket(socket, timeframe, &tx, &cancel).await {
                    SessionEnd::Cancelled | SessionEnd::ReceiverGone => break,
                    SessionEnd::Disconnected => {
                        warn!(
                            delay_secs = reconnect_delay.as_secs(),
                            "kline stream lost; reconnecting"
                        );
                    }
                }
            }
            Err(err) => {
                warn!(
                    error = %err,
                    delay_secs = reconnect_delay.as_secs(),
                    "kline stream connect failed; retrying"
                );
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(reconnect_delay) => {}
        }
    }
    debug!("kline stream task finished");
}

async fn drain_socket(
    mut socket: WsStream,
    timeframe: Interval,
    tx: &mpsc::Sender<PriceUpdate>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            message = socket.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                if let Some(end) = forward_frame(&text, timeframe, tx, cancel).await {
                    return end;
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                if let Ok(text) = String::from_utf8(bytes) {
                    if let Some(end) = forward_frame(&text, timeframe, tx, cancel).await {
                        return end;
                    }
                } else {
                    warn!("dropping non UTF-8 binary frame");
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                if socket.send(Message::Pong(payload)).await.is_err() {
                    return SessionEnd::Disconnected;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "kline stream closed by remote");
                return SessionEnd::Disconnected;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(error = %err, "kline stream read error");
                return SessionEnd::Disconnected;
            }
            None => return SessionEnd::Disconnected,
        }
    }
}

async fn forward_frame(
    text: &str,
    timeframe: Interval,
    tx: &mpsc::Sender<PriceUpdate>,
    cancel: &CancellationToken,
) -> Option<SessionEnd> {
    let Some(update) = parse_frame(text, timeframe) else {
        warn!("dropping unparsable kline frame");
        return None;
    };
    tokio::select! {
        _ = cancel.cancelled() => Some(SessionEnd::Cancelled),
        sent = tx.send(update) => match sent {
            Ok(()) => None,
            Err(_) => Some(SessionEnd::ReceiverGone),
        },
    }
}

#[derive(Debug, Deserialize)]
struct CombinedFrame {
    stream: String,
    data: KlineEnvelope,
}

#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "c")]
    close: String,
}

fn parse_frame(text: &str, timeframe: Interval) -> Option<PriceUpdate> {
    let frame: CombinedFrame = serde_json::from_str(text).ok()?;
    let symbol = frame.stream.split('@').next()?.to_uppercase();
    let open: f64 = frame.data.kline.open.parse().ok()?;
    let close: f64 = frame.data.kline.close.parse().ok()?;
    if open == 0.0 {
        return None;
    }
    let price_change_percent = (close - open) / open * 100.0;
    Some(PriceUpdate {
        symbol,
        timeframe,
        open_price: open,
        close_price: close,
        price_change_percent,
        event_time: millis_to_datetime(frame.data.event_time)?,
    })
}

fn millis_to_datetime(value: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value).single()
}
