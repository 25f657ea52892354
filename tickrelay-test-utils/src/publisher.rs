use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tickrelay_core::AlertMessage;
use tickrelay_gateway::{AlertPublisher, GatewayError, GatewayResult};
use tokio::sync::{Mutex, Notify};

/// An [`AlertPublisher`] double recording every publish.
#[derive(Default)]
pub struct CapturingPublisher {
    records: Mutex<Vec<(String, AlertMessage)>>,
    notify: Notify,
    failing: AtomicBool,
}

impl CapturingPublisher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// When set, every publish returns a transport error without recording.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<(String, AlertMessage)> {
        self.records.lock().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }

    /// Block until at least `expected` publishes were recorded.
    pub async fn wait_for(&self, expected: usize) {
        loop {
            let notified = self.notify.notified();
            if self.records.lock().await.len() >= expected {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl AlertPublisher for CapturingPublisher {
    async fn publish(&self, routing_key: &str, message: &AlertMessage) -> GatewayResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("publish rejected by test".into()));
        }
        self.records
            .lock()
            .await
            .push((routing_key.to_string(), message.clone()));
        self.notify.notify_waiters();
        Ok(())
    }
}
