//! Resilient mark-price feed
//!
//! One long-lived WebSocket session to the exchange, owned by a single
//! task. The cloneable `PriceFeed` handle exposes the subscription set,
//! the last-price cache and a broadcast of normalized ticks; the session
//! task is the only writer to the socket.
//!
//! Session state machine:
//! DISCONNECTED → CONNECTING → OPEN → (transient close → reconnect) → …
//! → TERMINATED (explicit `close()` or reconnect exhaustion).

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::parser::{parse_message, MarkPriceTick, ParsedMessage};

/// Consecutive failed connects before the feed gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Application-level ping cadence while the session is open
const PING_INTERVAL: Duration = Duration::from_secs(30);
const TICK_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Disconnected,
    Connecting,
    Open,
    /// Permanent: explicit shutdown or max reconnect attempts reached
    Terminated,
}

enum FeedCommand {
    Subscribe(String),
    Unsubscribe(String),
    Close,
}

struct FeedShared {
    url: String,
    /// Uppercase symbols the feed should be subscribed to, remembered
    /// across reconnects
    symbols: Mutex<BTreeSet<String>>,
    last_prices: RwLock<HashMap<String, Decimal>>,
    tick_tx: broadcast::Sender<MarkPriceTick>,
    status_tx: watch::Sender<FeedStatus>,
    request_id: AtomicU64,
    /// Taken by `spawn`; present until the session task starts
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<FeedCommand>>>,
}

impl FeedShared {
    /// Normalized tick entry point: updates the cache and fans out to
    /// listeners. The session task routes every parsed frame through
    /// here; replay sources can push ticks the same way.
    fn ingest(&self, mut tick: MarkPriceTick) {
        if tick.symbol.bytes().any(|b| b.is_ascii_lowercase()) {
            tick.symbol = tick.symbol.to_uppercase();
        }
        if let Ok(mut prices) = self.last_prices.write() {
            prices.insert(tick.symbol.clone(), tick.mark_price);
        }
        let _ = self.tick_tx.send(tick);
    }
}

/// Cloneable handle to the price feed
#[derive(Clone)]
pub struct PriceFeed {
    shared: Arc<FeedShared>,
    cmd_tx: mpsc::UnboundedSender<FeedCommand>,
    status_rx: watch::Receiver<FeedStatus>,
}

impl PriceFeed {
    pub fn new(url: impl Into<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (tick_tx, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(FeedStatus::Disconnected);
        let shared = Arc::new(FeedShared {
            url: url.into(),
            symbols: Mutex::new(BTreeSet::new()),
            last_prices: RwLock::new(HashMap::new()),
            tick_tx,
            status_tx,
            request_id: AtomicU64::new(0),
            cmd_rx: Mutex::new(Some(cmd_rx)),
        });
        Self {
            shared,
            cmd_tx,
            status_rx,
        }
    }

    /// Start the session task; only the first call has an effect
    pub fn spawn(&self) {
        let taken = self
            .shared
            .cmd_rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(cmd_rx) = taken {
            let shared = self.shared.clone();
            tokio::spawn(run_session(shared, cmd_rx));
        }
    }

    /// Remember the symbol and subscribe on the wire when connected;
    /// idempotent
    pub fn subscribe(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        let inserted = self
            .shared
            .symbols
            .lock()
            .map(|mut set| set.insert(symbol.clone()))
            .unwrap_or(false);
        if inserted {
            let _ = self.cmd_tx.send(FeedCommand::Subscribe(symbol));
        }
    }

    /// Forget the symbol and unsubscribe on the wire when connected;
    /// idempotent
    pub fn unsubscribe(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        let removed = self
            .shared
            .symbols
            .lock()
            .map(|mut set| set.remove(&symbol))
            .unwrap_or(false);
        if removed {
            let _ = self.cmd_tx.send(FeedCommand::Unsubscribe(symbol));
        }
    }

    /// Best-effort cache of the most recent tick per symbol
    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.shared
            .last_prices
            .read()
            .ok()
            .and_then(|prices| prices.get(&symbol.to_uppercase()).copied())
    }

    pub fn is_connected(&self) -> bool {
        *self.status_rx.borrow() == FeedStatus::Open
    }

    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status_rx.clone()
    }

    /// New receiver on the tick broadcast
    pub fn ticks(&self) -> broadcast::Receiver<MarkPriceTick> {
        self.shared.tick_tx.subscribe()
    }

    /// Push a normalized tick into the cache and broadcast, exactly as
    /// the session task does for frames off the wire
    pub fn ingest(&self, tick: MarkPriceTick) {
        self.shared.ingest(tick);
    }

    /// Currently remembered symbols
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.shared
            .symbols
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Permanent shutdown; suppresses reconnect
    pub fn close(&self) {
        let _ = self.cmd_tx.send(FeedCommand::Close);
    }
}

/// Backoff before reconnect attempt `n + 1`, after `n` consecutive
/// failures: min(30s, 2^(n−1) · 1s)
fn backoff_delay(failed_attempts: u32) -> Duration {
    let exp = failed_attempts.saturating_sub(1).min(5);
    Duration::from_secs((1u64 << exp).min(30))
}

fn stream_param(symbol: &str) -> String {
    format!("{}@markPrice", symbol.to_lowercase())
}

fn subscribe_frame(shared: &FeedShared, params: Vec<String>) -> String {
    json!({
        "method": "SUBSCRIBE",
        "params": params,
        "id": shared.request_id.fetch_add(1, Ordering::SeqCst) + 1,
    })
    .to_string()
}

fn unsubscribe_frame(shared: &FeedShared, params: Vec<String>) -> String {
    json!({
        "method": "UNSUBSCRIBE",
        "params": params,
        "id": shared.request_id.fetch_add(1, Ordering::SeqCst) + 1,
    })
    .to_string()
}

async fn run_session(shared: Arc<FeedShared>, mut cmd_rx: mpsc::UnboundedReceiver<FeedCommand>) {
    let mut failed_attempts: u32 = 0;

    loop {
        shared.status_tx.send_replace(FeedStatus::Connecting);
        debug!(url = %shared.url, "connecting to exchange stream");

        match connect_async(shared.url.as_str()).await {
            Ok((ws, _)) => {
                failed_attempts = 0;
                shared.status_tx.send_replace(FeedStatus::Open);
                info!(url = %shared.url, "exchange stream connected");

                match drive_connection(&shared, &mut cmd_rx, ws).await {
                    SessionEnd::CloseRequested => {
                        shared.status_tx.send_replace(FeedStatus::Terminated);
                        info!("price feed shut down");
                        return;
                    }
                    SessionEnd::ConnectionLost => {
                        shared.status_tx.send_replace(FeedStatus::Disconnected);
                        warn!("exchange stream disconnected, reconnecting");
                    }
                }
            }
            Err(e) => {
                failed_attempts += 1;
                warn!(
                    attempt = failed_attempts,
                    error = %e,
                    "exchange stream connect failed"
                );
                if failed_attempts >= MAX_RECONNECT_ATTEMPTS {
                    shared.status_tx.send_replace(FeedStatus::Terminated);
                    error!(
                        attempts = failed_attempts,
                        "max reconnect attempts reached, price feed terminated"
                    );
                    return;
                }
                if backoff_wait(&mut cmd_rx, backoff_delay(failed_attempts)).await {
                    shared.status_tx.send_replace(FeedStatus::Terminated);
                    info!("price feed shut down during backoff");
                    return;
                }
            }
        }
    }
}

enum SessionEnd {
    CloseRequested,
    ConnectionLost,
}

async fn drive_connection(
    shared: &FeedShared,
    cmd_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    // One bulk subscribe covering the whole remembered set.
    let symbols: Vec<String> = shared
        .symbols
        .lock()
        .map(|set| set.iter().map(|s| stream_param(s)).collect())
        .unwrap_or_default();
    if !symbols.is_empty() {
        let frame = subscribe_frame(shared, symbols);
        if sink.send(Message::Text(frame)).await.is_err() {
            return SessionEnd::ConnectionLost;
        }
    }

    let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_text(shared, &text),
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        return SessionEnd::ConnectionLost;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::ConnectionLost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "exchange stream read error");
                    return SessionEnd::ConnectionLost;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(FeedCommand::Subscribe(symbol)) => {
                    let frame = subscribe_frame(shared, vec![stream_param(&symbol)]);
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return SessionEnd::ConnectionLost;
                    }
                }
                Some(FeedCommand::Unsubscribe(symbol)) => {
                    let frame = unsubscribe_frame(shared, vec![stream_param(&symbol)]);
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return SessionEnd::ConnectionLost;
                    }
                }
                Some(FeedCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::CloseRequested;
                }
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return SessionEnd::ConnectionLost;
                }
            }
        }
    }
}

fn handle_text(shared: &FeedShared, text: &str) {
    match parse_message(text) {
        Ok(ParsedMessage::MarkPrice(tick)) => shared.ingest(tick),
        Ok(ParsedMessage::Ack { id }) => debug!(?id, "subscription acknowledged"),
        Ok(ParsedMessage::Other(value)) => debug!(%value, "ignoring unexpected frame"),
        // Parse failures never tear down the session.
        Err(e) => warn!(error = %e, "dropping unparseable frame"),
    }
}

/// Sleep out the backoff while staying responsive to `Close`. Returns
/// true when shutdown was requested.
async fn backoff_wait(cmd_rx: &mut mpsc::UnboundedReceiver<FeedCommand>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match tokio::time::timeout(remaining, cmd_rx.recv()).await {
            Ok(Some(FeedCommand::Close)) | Ok(None) => return true,
            // Set mutations already happened in the handle; the bulk
            // subscribe on the next OPEN picks them up.
            Ok(Some(_)) => {}
            Err(_) => return false,
        }
    }
}
