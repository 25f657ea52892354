use std::sync::Arc;
use std::time::Duration;

use tickrelay_core::{Interval, SubscriptionRequest};
use tickrelay_engine::engine::{ManagerHandle, SubscriptionManager};
use tickrelay_test_utils::{price_update, CapturingPublisher, ScriptedFeed};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn request(user_id: &str, symbols: &[&str]) -> SubscriptionRequest {
    SubscriptionRequest {
        user_id: user_id.to_string(),
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        timeframe: Interval::OneMinute,
        thresholds: vec![0.5, 1.0, 2.0],
    }
}

struct Harness {
    feed: Arc<ScriptedFeed>,
    publisher: Arc<CapturingPublisher>,
    handle: ManagerHandle,
    manager: JoinHandle<()>,
    shutdown: CancellationToken,
}

fn harness() -> Harness {
    let feed = Arc::new(ScriptedFeed::new());
    let publisher = CapturingPublisher::new();
    let shutdown = CancellationToken::new();
    let (handle, manager) =
        SubscriptionManager::spawn(feed.clone(), publisher.clone(), shutdown.clone());
    Harness {
        feed,
        publisher,
        handle,
        manager,
        shutdown,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribe_releases_the_stream_before_returning() {
    let h = harness();
    for round in 0..20 {
        h.feed.push_repeating(price_update("BTCUSDT", 100.0, 101.0)).await;
        h.handle.subscribe(request("u1", &["BTCUSDT"])).await.unwrap();
        wait_until(|| h.feed.streams_active() == 1).await;

        h.handle.unsubscribe("u1").await.unwrap();
        assert_eq!(
            h.feed.streams_active(),
            0,
            "round {round}: stream still live after unsubscribe returned"
        );
    }

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resubscribe_replaces_active_task() {
    let h = harness();
    h.feed.push_repeating(price_update("BTCUSDT", 100.0, 101.0)).await;
    h.feed.push_repeating(price_update("ETHUSDT", 200.0, 203.0)).await;

    h.handle.subscribe(request("u1", &["BTCUSDT"])).await.unwrap();
    timeout(WAIT, h.publisher.wait_for(1)).await.unwrap();

    h.handle.subscribe(request("u1", &["ETHUSDT"])).await.unwrap();
    // The first stream was cancelled and awaited before the second started.
    wait_until(|| h.feed.streams_opened() == 2).await;
    wait_until(|| h.feed.streams_active() == 1).await;

    h.publisher.clear().await;
    timeout(WAIT, h.publisher.wait_for(2)).await.unwrap();
    for (key, alert) in h.publisher.published().await {
        assert_eq!(alert.symbol, "ETHUSDT");
        assert_eq!(key, "level_2");
    }

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
}

#[tokio::test]
async fn unsubscribe_unknown_user_is_noop() {
    let h = harness();
    h.handle.unsubscribe("ghost").await.unwrap();
    assert_eq!(h.feed.streams_opened(), 0);
    assert_eq!(h.publisher.published_count().await, 0);

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unsubscribe_stops_publishes_for_user() {
    let h = harness();
    h.feed.push_repeating(price_update("BTCUSDT", 100.0, 101.0)).await;

    h.handle.subscribe(request("u1", &["BTCUSDT"])).await.unwrap();
    timeout(WAIT, h.publisher.wait_for(1)).await.unwrap();

    h.handle.unsubscribe("u1").await.unwrap();
    let count = h.publisher.published_count().await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.publisher.published_count().await,
        count,
        "alert published after unsubscribe returned"
    );
    assert_eq!(h.feed.streams_active(), 0);

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_symbol_list_is_rejected_without_a_task() {
    let h = harness();
    h.handle.subscribe(request("u1", &[])).await.unwrap();
    assert_eq!(h.feed.streams_opened(), 0);
    assert_eq!(h.publisher.published_count().await, 0);

    // The manager stays responsive after the rejection.
    h.feed.push_repeating(price_update("BTCUSDT", 100.0, 101.0)).await;
    h.handle.subscribe(request("u1", &["BTCUSDT"])).await.unwrap();
    timeout(WAIT, h.publisher.wait_for(1)).await.unwrap();

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
}

#[tokio::test]
async fn publish_failure_does_not_abort_the_pipeline() {
    let h = harness();
    h.feed.push_repeating(price_update("BTCUSDT", 100.0, 101.0)).await;
    h.publisher.set_failing(true);

    h.handle.subscribe(request("u1", &["BTCUSDT"])).await.unwrap();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.publisher.published_count().await, 0);

    h.publisher.set_failing(false);
    timeout(WAIT, h.publisher.wait_for(1)).await.unwrap();

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
}

#[tokio::test]
async fn level_zero_updates_are_dropped() {
    let h = harness();
    h.feed.push_repeating(price_update("BTCUSDT", 100.0, 100.1)).await;

    h.handle.subscribe(request("u1", &["BTCUSDT"])).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.publisher.published_count().await, 0);

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_every_subscription() {
    let h = harness();
    h.feed.push_repeating(price_update("BTCUSDT", 100.0, 101.0)).await;
    h.feed.push_repeating(price_update("ETHUSDT", 200.0, 203.0)).await;

    h.handle.subscribe(request("u1", &["BTCUSDT"])).await.unwrap();
    h.handle.subscribe(request("u2", &["ETHUSDT"])).await.unwrap();
    wait_until(|| h.feed.streams_opened() == 2).await;

    h.shutdown.cancel();
    timeout(WAIT, h.manager).await.unwrap().unwrap();
    assert_eq!(h.feed.streams_active(), 0);
}
