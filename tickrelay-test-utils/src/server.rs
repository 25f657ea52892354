use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// What one accepted connection should do before the next one is served.
#[derive(Clone, Debug)]
pub struct SessionScript {
    /// Raw text frames sent to the client in order.
    pub frames: Vec<String>,
    /// Close the connection after the frames, forcing the client to reconnect.
    pub close_after: bool,
}

impl SessionScript {
    #[must_use]
    pub fn new(frames: Vec<String>) -> Self {
        Self {
            frames,
            close_after: false,
        }
    }

    #[must_use]
    pub fn then_close(mut self) -> Self {
        self.close_after = true;
        self
    }
}

/// Minimal stand-in for the exchange's combined kline stream endpoint.
///
/// Each accepted connection pops the next queued [`SessionScript`]; a
/// connection with no script idles until the client or the server goes away.
pub struct MockKlineServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockKlineServer {
    pub async fn spawn(scripts: Vec<SessionScript>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let scripts = Arc::new(Mutex::new(scripts.into_iter().collect::<VecDeque<_>>()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let accepted = connections.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _peer)) => {
                                accepted.fetch_add(1, Ordering::SeqCst);
                                let script = scripts.lock().await.pop_front();
                                tokio::spawn(async move {
                                    if let Err(err) = handle_connection(stream, script).await {
                                        warn!(error = %err, "mock kline connection ended with error");
                                    }
                                });
                            }
                            Err(err) => {
                                warn!(error = %err, "mock kline server failed to accept");
                                break;
                            }
                        }
                    }
                }
            }
        });
        Ok(Self {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockKlineServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn handle_connection(stream: TcpStream, script: Option<SessionScript>) -> Result<()> {
    let mut ws = accept_async(stream).await?;
    let script = script.unwrap_or_else(|| SessionScript::new(Vec::new()));
    for frame in script.frames {
        ws.send(Message::Text(frame)).await?;
        sleep(Duration::from_millis(5)).await;
    }
    if script.close_after {
        let _ = ws.send(Message::Close(None)).await;
        return Ok(());
    }
    // Hold the connection open, answering pings, until the client hangs up.
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Ping(payload) => ws.send(Message::Pong(payload)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// Build a combined-stream kline frame as the exchange emits it.
#[must_use]
pub fn kline_frame(symbol: &str, timeframe: &str, open: f64, close: f64) -> String {
    json!({
        "stream": format!("{}@kline_{}", symbol.to_lowercase(), timeframe),
        "data": {
            "E": 1_680_000_000_000i64,
            "k": {
                "o": open.to_string(),
                "c": close.to_string(),
                "h": close.max(open).to_string(),
                "l": close.min(open).to_string(),
            }
        }
    })
    .to_string()
}
