//! CLOB market-channel WebSocket stream.
//!
//! One long-lived connection per process. Subscriptions are buffered in a
//! shared set: pre-connect calls are flushed as a single message right
//! after the handshake, post-connect calls go out immediately, and every
//! reconnect re-sends the accumulated set before further events flow.
//!
//! Reconnection: up to N consecutive cycles with exponential backoff;
//! a successful session resets the counter. Exhaustion is terminal for
//! this source only.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::events::{EventKind, MarketEvent};
use crate::ingest::{is_shutdown, IngestSource};
use crate::subscription::SubscribeSink;
use crate::util::f64_field;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// A silent socket for this long reads as a dead connection.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

// ─────────────────────────────────────────────────────────
// Subscription handle
// ─────────────────────────────────────────────────────────

/// Cloneable handle for subscribing tokens, legal before and after
/// connect. The shared set is the durable record; the channel nudges a
/// live session to send the incremental message.
#[derive(Clone)]
pub struct SubscriptionHandle {
    tokens: Arc<Mutex<HashSet<String>>>,
    live_tx: mpsc::UnboundedSender<Vec<String>>,
}

impl SubscribeSink for SubscriptionHandle {
    fn subscribe(&self, token_ids: &[String]) -> Result<(), IngestError> {
        {
            let mut tokens = self.tokens.lock();
            for id in token_ids {
                tokens.insert(id.clone());
            }
        }
        // No live session yet: the set flushes on connect. Idempotent on
        // a running one.
        let _ = self.live_tx.send(token_ids.to_vec());
        Ok(())
    }

    fn is_subscribed(&self, token_id: &str) -> bool {
        self.tokens.lock().contains(token_id)
    }
}

impl SubscriptionHandle {
    pub fn subscribed_tokens(&self) -> HashSet<String> {
        self.tokens.lock().clone()
    }
}

// ─────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────

pub struct ClobMarketStream {
    cfg: IngestConfig,
    ws_url: String,
    tokens: Arc<Mutex<HashSet<String>>>,
    sub_rx: mpsc::UnboundedReceiver<Vec<String>>,
    handle: SubscriptionHandle,
    connected: Arc<AtomicBool>,
    session: Option<(WsWrite, WsRead)>,
}

enum SessionEnd {
    Shutdown,
    QueueClosed,
    Lost(String),
}

impl ClobMarketStream {
    pub fn new(ws_url: impl Into<String>, cfg: IngestConfig) -> Self {
        let tokens: Arc<Mutex<HashSet<String>>> = Arc::default();
        let (live_tx, sub_rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle {
            tokens: tokens.clone(),
            live_tx,
        };
        Self {
            cfg,
            ws_url: ws_url.into(),
            tokens,
            sub_rx,
            handle,
            connected: Arc::new(AtomicBool::new(false)),
            session: None,
        }
    }

    pub fn subscription_handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    async fn establish(&mut self) -> Result<(), IngestError> {
        info!("📡 Connecting market WS: {}", self.ws_url);
        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&self.ws_url)).await;
        let (ws, response) = match connect {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(IngestError::Connection(format!("ws connect: {e}"))),
            Err(_) => return Err(IngestError::Connection("ws connect timeout".into())),
        };
        info!("✅ Market WS connected (status={:?})", response.status());

        let (mut write, read) = ws.split();

        // Flush the accumulated subscription set atomically.
        let tokens: Vec<String> = self.tokens.lock().iter().cloned().collect();
        if !tokens.is_empty() {
            Self::send_subscription(&mut write, &tokens).await?;
        }

        self.session = Some((write, read));
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_subscription(write: &mut WsWrite, token_ids: &[String]) -> Result<(), IngestError> {
        let msg = json!({"assets_ids": token_ids, "type": "market"});
        write
            .send(Message::Text(msg.to_string()))
            .await
            .map_err(|e| IngestError::Subscription(format!("subscribe send: {e}")))?;
        info!("📤 Subscribed to {} tokens", token_ids.len());
        Ok(())
    }

    /// Drive one connected session until it ends.
    async fn run_session(
        &mut self,
        out: &mpsc::Sender<MarketEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut write, mut read) = match self.session.take() {
            Some(s) => s,
            None => return SessionEnd::Lost("no session".into()),
        };
        let mut heartbeat = tokio::time::interval(self.cfg.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender means the supervisor is gone.
                    if changed.is_err() || is_shutdown(shutdown) {
                        return SessionEnd::Shutdown;
                    }
                }
                Some(tokens) = self.sub_rx.recv() => {
                    if let Err(e) = Self::send_subscription(&mut write, &tokens).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                _ = heartbeat.tick() => {
                    if write.send(Message::Text("PING".into())).await.is_err() {
                        return SessionEnd::Lost("heartbeat send failed".into());
                    }
                }
                msg = tokio::time::timeout(RECEIVE_TIMEOUT, read.next()) => {
                    match msg {
                        Err(_) => return SessionEnd::Lost("receive timeout".into()),
                        Ok(None) => return SessionEnd::Lost("stream ended".into()),
                        Ok(Some(Err(e))) => return SessionEnd::Lost(format!("ws error: {e}")),
                        Ok(Some(Ok(Message::Close(_)))) => {
                            return SessionEnd::Lost("closed by server".into());
                        }
                        Ok(Some(Ok(Message::Text(text)))) => {
                            for event in parse_frame_text(&text) {
                                if out.send(event).await.is_err() {
                                    return SessionEnd::QueueClosed;
                                }
                            }
                        }
                        Ok(Some(Ok(_))) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl IngestSource for ClobMarketStream {
    fn name(&self) -> &'static str {
        "clob-ws"
    }

    async fn connect(&mut self) -> Result<(), IngestError> {
        self.establish().await
    }

    async fn run(
        &mut self,
        out: mpsc::Sender<MarketEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IngestError> {
        let mut failures: u32 = 0;

        let result = loop {
            if self.session.is_none() {
                if failures >= self.cfg.reconnect_attempts {
                    break Err(IngestError::ReconnectExhausted {
                        attempts: self.cfg.reconnect_attempts,
                    });
                }
                let backoff = self.cfg.backoff_for(failures);
                failures += 1;
                info!(
                    "🔄 Reconnect attempt {}/{} in {:.1}s",
                    failures,
                    self.cfg.reconnect_attempts,
                    backoff.as_secs_f64(),
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || is_shutdown(&shutdown) {
                            break Ok(());
                        }
                    }
                }
                if let Err(e) = self.establish().await {
                    warn!("📡 Reconnect failed: {e}");
                    continue;
                }
                failures = 0;
            }

            match self.run_session(&out, &mut shutdown).await {
                SessionEnd::Shutdown => break Ok(()),
                SessionEnd::QueueClosed => break Ok(()),
                SessionEnd::Lost(reason) => {
                    warn!("📡 Market WS session lost: {reason}");
                    self.connected.store(false, Ordering::SeqCst);
                }
            }
        };

        self.disconnect().await;
        result
    }

    async fn disconnect(&mut self) {
        if let Some((mut write, _read)) = self.session.take() {
            let _ = write.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("📡 Market WS disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────
// Frame parsing
// ─────────────────────────────────────────────────────────

/// Decode one WS text payload into events. Batched frames arrive as
/// arrays. Malformed payloads are dropped with a warning; unknown event
/// types with a debug trace.
pub(crate) fn parse_frame_text(text: &str) -> Vec<MarketEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("📡 Dropping malformed frame: {e}");
            return Vec::new();
        }
    };
    match value {
        Value::Array(frames) => frames.iter().filter_map(parse_frame).collect(),
        other => parse_frame(&other).into_iter().collect(),
    }
}

fn parse_frame(frame: &Value) -> Option<MarketEvent> {
    let event_type = frame.get("event_type").and_then(Value::as_str)?;
    let kind = match event_type {
        "book" => EventKind::BookUpdate,
        "price_change" => EventKind::PriceChange,
        "last_trade_price" => EventKind::LastTrade,
        "tick_size_change" => EventKind::TickSizeChange,
        other => {
            debug!("📡 Dropping unknown event type: {other}");
            return None;
        }
    };

    let token_id = frame.get("asset_id").and_then(Value::as_str).unwrap_or("");
    if token_id.is_empty() {
        warn!("📡 Dropping {event_type} frame without asset_id");
        return None;
    }

    let mut best_bid = f64_field(frame, "best_bid");
    let mut best_ask = f64_field(frame, "best_ask");
    let mut last_price = None;
    let mut last_size = None;

    match kind {
        EventKind::BookUpdate => {
            // Top of each side, not assuming the arrays are sorted.
            best_bid = side_extreme(frame, ["buys", "bids"], f64::max);
            best_ask = side_extreme(frame, ["sells", "asks"], f64::min);
        }
        EventKind::LastTrade => {
            last_price = f64_field(frame, "price");
            last_size = f64_field(frame, "size");
        }
        _ => {}
    }

    Some(MarketEvent {
        market_id: frame.get("market").and_then(Value::as_str).map(str::to_string),
        best_bid,
        best_ask,
        last_price,
        last_size,
        raw: Some(frame.clone()),
        ..MarketEvent::market(kind, token_id)
    })
}

fn side_extreme(frame: &Value, keys: [&str; 2], pick: fn(f64, f64) -> f64) -> Option<f64> {
    let levels = keys.iter().find_map(|k| frame.get(*k).and_then(Value::as_array))?;
    levels
        .iter()
        .filter_map(|lvl| lvl.get("price").and_then(crate::util::safe_f64))
        .filter(|p| *p > 0.0)
        .reduce(pick)
}
