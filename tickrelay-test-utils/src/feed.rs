use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tickrelay_core::{Interval, PriceUpdate};
use tickrelay_gateway::{GatewayError, GatewayResult, PriceFeed};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

enum Script {
    /// Emit each update once, then idle until cancelled.
    Finite(Vec<PriceUpdate>),
    /// Emit clones of the update every few milliseconds until cancelled.
    Repeating(PriceUpdate),
}

/// A [`PriceFeed`] double replaying canned updates.
///
/// Each `stream` call pops the next queued script; calls beyond the queue idle
/// until cancelled. The double tracks how many streams were opened and how
/// many are still live so tests can assert replace/cancel semantics.
pub struct ScriptedFeed {
    scripts: Mutex<VecDeque<Script>>,
    opened: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl ScriptedFeed {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            opened: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn push_finite(&self, updates: Vec<PriceUpdate>) {
        self.scripts.lock().await.push_back(Script::Finite(updates));
    }

    pub async fn push_repeating(&self, update: PriceUpdate) {
        self.scripts
            .lock()
            .await
            .push_back(Script::Repeating(update));
    }

    /// Total number of `stream` calls observed.
    pub fn streams_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of stream tasks not yet torn down.
    pub fn streams_active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn stream(
        &self,
        symbols: &[String],
        _timeframe: Interval,
        cancel: CancellationToken,
    ) -> GatewayResult<mpsc::Receiver<PriceUpdate>> {
        if symbols.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "subscription declares no symbols".into(),
            ));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().await.pop_front();
        let (tx, rx) = mpsc::channel(1);
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            run_script(script, &tx, cancel).await;
            // Decrement before the sender drops: a drained receiver then
            // implies the counter already reads zero.
            active.fetch_sub(1, Ordering::SeqCst);
            drop(tx);
        });
        Ok(rx)
    }
}

async fn run_script(
    script: Option<Script>,
    tx: &mpsc::Sender<PriceUpdate>,
    cancel: CancellationToken,
) {
    match script {
        Some(Script::Finite(updates)) => {
            for update in updates {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(update) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            cancel.cancelled().await;
        }
        Some(Script::Repeating(update)) => loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(update.clone()) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(Duration::from_millis(5)) => {}
            }
        },
        None => cancel.cancelled().await,
    }
}
