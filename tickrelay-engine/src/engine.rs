//! The subscription manager: a single actor owning every per-user streaming
//! task, fed by the command consumer and torn down on process shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tickrelay_core::{classify, AlertMessage, Command, SubscriptionRequest};
use tickrelay_gateway::{
    AlertPublisher, CommandHandler, GatewayError, GatewayResult, PriceFeed,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONTROL_QUEUE_DEPTH: usize = 64;

enum ControlMessage {
    Subscribe(SubscriptionRequest, oneshot::Sender<()>),
    Unsubscribe(String, oneshot::Sender<()>),
}

struct ActiveSubscription {
    request: SubscriptionRequest,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Clonable front door to the manager actor.
///
/// Operations send a control message and wait for the actor's acknowledgment,
/// so `unsubscribe` returning guarantees the user's task has fully wound down.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ControlMessage>,
}

impl ManagerHandle {
    pub async fn subscribe(&self, request: SubscriptionRequest) -> GatewayResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(ControlMessage::Subscribe(request, ack_tx))
            .await
            .map_err(|_| GatewayError::Other("subscription manager stopped".into()))?;
        ack_rx
            .await
            .map_err(|_| GatewayError::Other("subscription manager stopped".into()))
    }

    pub async fn unsubscribe(&self, user_id: &str) -> GatewayResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(ControlMessage::Unsubscribe(user_id.to_string(), ack_tx))
            .await
            .map_err(|_| GatewayError::Other("subscription manager stopped".into()))?;
        ack_rx
            .await
            .map_err(|_| GatewayError::Other("subscription manager stopped".into()))
    }
}

#[async_trait]
impl CommandHandler for ManagerHandle {
    async fn handle(&self, command: Command) -> GatewayResult<()> {
        match command {
            Command::Subscribe(request) => self.subscribe(request).await,
            Command::Unsubscribe { user_id } => self.unsubscribe(&user_id).await,
        }
    }
}

/// Owns the `user_id -> ActiveSubscription` map. All mutations run on the
/// actor task, which serializes subscribe/unsubscribe/shutdown without locks.
pub struct SubscriptionManager {
    feed: Arc<dyn PriceFeed>,
    publisher: Arc<dyn AlertPublisher>,
    active: HashMap<String, ActiveSubscription>,
    control_rx: mpsc::Receiver<ControlMessage>,
    shutdown: CancellationToken,
}

impl SubscriptionManager {
    /// Spawn the manager actor. Cancelling `shutdown` stops the actor and
    /// every subscription task under it; the returned handle completes once
    /// all of them have wound down.
    pub fn spawn(
        feed: Arc<dyn PriceFeed>,
        publisher: Arc<dyn AlertPublisher>,
        shutdown: CancellationToken,
    ) -> (ManagerHandle, JoinHandle<()>) {
        let (tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let manager = Self {
            feed,
            publisher,
            active: HashMap::new(),
            control_rx,
            shutdown,
        };
        let task = tokio::spawn(manager.run());
        (ManagerHandle { tx }, task)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = self.control_rx.recv() => match message {
                    Some(ControlMessage::Subscribe(request, ack)) => {
                        self.handle_subscribe(request).await;
                        let _ = ack.send(());
                    }
                    Some(ControlMessage::Unsubscribe(user_id, ack)) => {
                        self.handle_unsubscribe(&user_id).await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
            }
        }
        self.drain().await;
    }

    async fn handle_subscribe(&mut self, request: SubscriptionRequest) {
        if request.symbols.is_empty() {
            warn!(user = %request.user_id, "rejecting subscription with no symbols");
            return;
        }
        // Replace semantics: the previous task is cancelled and awaited
        // before the new one starts, never merged or queued.
        self.handle_unsubscribe(&request.user_id).await;
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_pipeline(
            request.clone(),
            self.feed.clone(),
            self.publisher.clone(),
            cancel.clone(),
        ));
        info!(
            user = %request.user_id,
            symbols = request.symbols.len(),
            timeframe = %request.timeframe,
            "subscription started"
        );
        self.active.insert(
            request.user_id.clone(),
            ActiveSubscription {
                request,
                cancel,
                task,
            },
        );
    }

    async fn handle_unsubscribe(&mut self, user_id: &str) {
        let Some(subscription) = self.active.remove(user_id) else {
            return;
        };
        subscription.cancel.cancel();
        if let Err(err) = subscription.task.await {
            warn!(user = %user_id, error = %err, "subscription task panicked");
        }
        info!(
            user = %user_id,
            symbols = subscription.request.symbols.len(),
            "subscription stopped"
        );
    }

    async fn drain(&mut self) {
        self.shutdown.cancel();
        for (user_id, subscription) in self.active.drain() {
            subscription.cancel.cancel();
            if let Err(err) = subscription.task.await {
                warn!(user = %user_id, error = %err, "subscription task panicked");
            }
        }
        info!("all subscriptions stopped");
    }
}

/// One user's feed -> classify -> publish pipeline.
///
/// Errors inside the pipeline are isolated to this user: a failed publish or
/// dropped update never aborts the subscription or touches other users.
async fn run_pipeline(
    request: SubscriptionRequest,
    feed: Arc<dyn PriceFeed>,
    publisher: Arc<dyn AlertPublisher>,
    cancel: CancellationToken,
) {
    let mut updates = match feed
        .stream(&request.symbols, request.timeframe, cancel.clone())
        .await
    {
        Ok(rx) => rx,
        Err(err) => {
            error!(user = %request.user_id, error = %err, "failed to open price stream");
            return;
        }
    };
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            next = updates.recv() => match next {
                Some(update) => update,
                None => break,
            },
        };
        // Updates observed after the cancel signal must not be published.
        if cancel.is_cancelled() {
            break;
        }
        let level = classify(update.price_change_percent, &request.thresholds);
        if level == 0 {
            continue;
        }
        let alert = AlertMessage::from_update(&request.user_id, &update, level);
        let routing_key = alert.routing_key();
        if let Err(err) = publisher.publish(&routing_key, &alert).await {
            warn!(
                user = %request.user_id,
                symbol = %alert.symbol,
                error = %err,
                "alert publish failed; continuing"
            );
        }
    }
    // The update channel closes only once the feed task has exited and
    // released its connection. Draining to the end makes that teardown
    // observable to whoever awaits this task.
    while updates.recv().await.is_some() {}
}
