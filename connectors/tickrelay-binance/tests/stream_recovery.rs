use std::time::Duration;

use serde_json::json;
use tickrelay_binance::{BinanceFeed, BinanceFeedConfig};
use tickrelay_core::Interval;
use tickrelay_gateway::PriceFeed;
use tickrelay_test_utils::{kline_frame, MockKlineServer, SessionScript};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn feed_for(server: &MockKlineServer) -> BinanceFeed {
    BinanceFeed::new(BinanceFeedConfig {
        ws_url: server.ws_url(),
        reconnect_delay: Duration::from_millis(50),
    })
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_killing_the_stream() {
    let missing_close = json!({
        "stream": "btcusdt@kline_1m",
        "data": {"E": 1_680_000_000_000i64, "k": {"o": "100"}}
    })
    .to_string();
    let server = MockKlineServer::spawn(vec![SessionScript::new(vec![
        kline_frame("BTCUSDT", "1m", 100.0, 101.6),
        missing_close,
        kline_frame("BTCUSDT", "1m", 100.0, 99.0),
    ])])
    .await
    .unwrap();

    let feed = feed_for(&server);
    let cancel = CancellationToken::new();
    let mut updates = feed
        .stream(&["BTCUSDT".to_string()], Interval::OneMinute, cancel.clone())
        .await
        .unwrap();

    let first = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(first.symbol, "BTCUSDT");
    assert!((first.price_change_percent - 1.6).abs() < 1e-9);

    // The malformed frame in between was dropped, not surfaced.
    let second = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(second.close_price, 99.0);

    cancel.cancel();
}

#[tokio::test]
async fn reconnects_after_remote_close_on_the_same_receiver() {
    let server = MockKlineServer::spawn(vec![
        SessionScript::new(vec![kline_frame("BTCUSDT", "1m", 100.0, 101.0)]).then_close(),
        SessionScript::new(vec![kline_frame("BTCUSDT", "1m", 100.0, 102.0)]),
    ])
    .await
    .unwrap();

    let feed = feed_for(&server);
    let cancel = CancellationToken::new();
    let mut updates = feed
        .stream(&["BTCUSDT".to_string()], Interval::OneMinute, cancel.clone())
        .await
        .unwrap();

    let first = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(first.close_price, 101.0);

    let second = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(second.close_price, 102.0);
    assert_eq!(server.connections(), 2);

    cancel.cancel();
}

#[tokio::test]
async fn cancellation_closes_the_update_channel() {
    let server = MockKlineServer::spawn(vec![SessionScript::new(Vec::new())])
        .await
        .unwrap();

    let feed = feed_for(&server);
    let cancel = CancellationToken::new();
    let mut updates = feed
        .stream(&["BTCUSDT".to_string()], Interval::OneMinute, cancel.clone())
        .await
        .unwrap();

    cancel.cancel();
    let next = timeout(WAIT, updates.recv()).await.unwrap();
    assert!(next.is_none(), "channel stayed open after cancellation");
}

#[tokio::test]
async fn empty_symbol_list_is_rejected() {
    let feed = BinanceFeed::new(BinanceFeedConfig::default());
    let cancel = CancellationToken::new();
    let result = feed.stream(&[], Interval::OneMinute, cancel).await;
    assert!(result.is_err());
}
