//! Live event stream for UI clients
//!
//! Server-Sent Events fan-out: every client session gets its own task
//! holding receivers on the engine's price and trigger broadcasts, and a
//! bounded per-client outbound queue feeding the SSE sink. Overflow on
//! either hop drops the oldest frames and keeps the newest — slow
//! clients fall behind on history, never on the live picture, and never
//! stall the engine or each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::engine::models::{Position, Side};
use crate::engine::{calc, PriceUpdate, TriggerExecuted};
use crate::error::AppError;
use crate::websocket::PriceFeed;

use axum::response::sse::Event;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_QUEUE_CAPACITY: usize = 256;

/// One OPEN position in the initial snapshot; the mark-price fields are
/// present only when the feed has a cached price
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPosition {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub entry_time: DateTime<Utc>,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_percent: Option<Decimal>,
}

/// Typed frames pushed to every client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamFrame {
    Connected,
    Initial {
        positions: Vec<SnapshotPosition>,
    },
    #[serde(rename_all = "camelCase")]
    PositionUpdate {
        position_id: i64,
        symbol: String,
        mark_price: Decimal,
        unrealized_pnl: Decimal,
        pnl_percent: Decimal,
        ts: i64,
    },
    TriggerExecuted(TriggerExecuted),
    Heartbeat {
        ts: i64,
    },
}

/// Per-client session state fed by the engine broadcasts
pub struct ClientSession {
    store: Arc<crate::engine::storage::Store>,
    feed: PriceFeed,
    price_rx: broadcast::Receiver<PriceUpdate>,
    trigger_rx: broadcast::Receiver<TriggerExecuted>,
}

impl ClientSession {
    pub fn new(
        store: Arc<crate::engine::storage::Store>,
        feed: PriceFeed,
        price_rx: broadcast::Receiver<PriceUpdate>,
        trigger_rx: broadcast::Receiver<TriggerExecuted>,
    ) -> Self {
        Self {
            store,
            feed,
            price_rx,
            trigger_rx,
        }
    }

    /// Spawn the session task; frames arrive on the returned stream
    /// until the client disconnects or the engine goes away. The
    /// outbound queue is a bounded ring: when a slow client lets it
    /// overflow, the oldest frames are skipped and delivery resumes at
    /// the newest.
    pub fn spawn(self) -> impl Stream<Item = Result<Event, Infallible>> {
        let (tx, rx) = broadcast::channel(CLIENT_QUEUE_CAPACITY);
        tokio::spawn(self.run(tx));
        BroadcastStream::new(rx).filter_map(|frame| match frame {
            Ok(json) => Some(Ok::<_, Infallible>(Event::default().data(json))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "stream client overflowed, dropped oldest frames");
                None
            }
        })
    }

    async fn run(mut self, tx: broadcast::Sender<String>) {
        if !send_frame(&tx, &StreamFrame::Connected) {
            return;
        }

        match self.initial_snapshot().await {
            Ok(frame) => {
                if !send_frame(&tx, &frame) {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "initial snapshot failed, dropping stream client");
                return;
            }
        }

        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);

        loop {
            // Price updates drain first so a closure is observed after
            // the position updates from the ticks that preceded it.
            tokio::select! {
                biased;

                update = self.price_rx.recv() => match update {
                    Ok(update) => {
                        if !self.push_position_updates(&tx, &update).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "stream client lagged on price updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                trigger = self.trigger_rx.recv() => match trigger {
                    Ok(trigger) => {
                        if !send_frame(&tx, &StreamFrame::TriggerExecuted(trigger)) {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "stream client lagged on triggers");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                _ = heartbeat.tick() => {
                    let frame = StreamFrame::Heartbeat {
                        ts: Utc::now().timestamp_millis(),
                    };
                    if !send_frame(&tx, &frame) {
                        return;
                    }
                }
            }
        }
    }

    async fn initial_snapshot(&self) -> Result<StreamFrame, AppError> {
        let open = self
            .store
            .list_positions(Some(crate::engine::models::PositionStatus::Open))
            .await?;
        let positions = open
            .iter()
            .map(|p| self.snapshot_position(p))
            .collect();
        Ok(StreamFrame::Initial { positions })
    }

    fn snapshot_position(&self, p: &Position) -> SnapshotPosition {
        let mark_price = self.feed.last_price(&p.symbol);
        let unrealized_pnl =
            mark_price.map(|mark| calc::unrealized_pnl(p.side, p.entry_price, mark, p.qty));
        let pnl_percent = unrealized_pnl.map(|pnl| calc::pnl_percent(pnl, p.qty, p.entry_price));
        SnapshotPosition {
            id: p.id,
            symbol: p.symbol.clone(),
            side: p.side,
            qty: p.qty,
            entry_price: p.entry_price,
            leverage: p.leverage,
            entry_time: p.entry_time,
            sl: p.sl,
            tp: p.tp,
            mark_price,
            unrealized_pnl,
            pnl_percent,
        }
    }

    /// One position-update frame per OPEN position on the tick's symbol
    async fn push_position_updates(
        &self,
        tx: &broadcast::Sender<String>,
        update: &PriceUpdate,
    ) -> bool {
        let positions = match self.store.list_open_by_symbol(&update.symbol).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(symbol = %update.symbol, error = %e, "position load failed for stream");
                return true;
            }
        };
        for p in positions {
            let unrealized_pnl =
                calc::unrealized_pnl(p.side, p.entry_price, update.mark_price, p.qty);
            let frame = StreamFrame::PositionUpdate {
                position_id: p.id,
                symbol: p.symbol.clone(),
                mark_price: update.mark_price,
                unrealized_pnl,
                pnl_percent: calc::pnl_percent(unrealized_pnl, p.qty, p.entry_price),
                ts: update.ts.timestamp_millis(),
            };
            if !send_frame(tx, &frame) {
                return false;
            }
        }
        true
    }
}

/// Queue one frame for the client; returns false once the client is
/// gone. The send never blocks — on overflow the ring evicts its oldest
/// entries, observed by the reader as a lag skip.
fn send_frame(tx: &broadcast::Sender<String>, frame: &StreamFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "frame serialization failed");
            return true;
        }
    };
    tx.send(json).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_frame_type_tags() {
        let connected = serde_json::to_value(StreamFrame::Connected).unwrap();
        assert_eq!(connected["type"], "connected");

        let heartbeat = serde_json::to_value(StreamFrame::Heartbeat { ts: 1 }).unwrap();
        assert_eq!(heartbeat["type"], "heartbeat");

        let update = serde_json::to_value(StreamFrame::PositionUpdate {
            position_id: 3,
            symbol: "BTCUSDT".to_string(),
            mark_price: dec!(105),
            unrealized_pnl: dec!(50),
            pnl_percent: dec!(5),
            ts: 1_700_000_000_000,
        })
        .unwrap();
        assert_eq!(update["type"], "position-update");
        assert_eq!(update["positionId"], 3);
        assert_eq!(update["markPrice"], "105");

        let trigger = serde_json::to_value(StreamFrame::TriggerExecuted(TriggerExecuted {
            position_id: 3,
            event: crate::engine::models::EventKind::TpTriggered,
            close_price: dec!(110),
            realized_pnl: dec!(99.16),
        }))
        .unwrap();
        assert_eq!(trigger["type"], "trigger-executed");
        assert_eq!(trigger["event"], "TP_TRIGGERED");
    }

    #[test]
    fn test_snapshot_omits_mark_fields_without_cache() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snapshot = SnapshotPosition {
            id: 1,
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            qty: dec!(10),
            entry_price: dec!(100),
            leverage: 1,
            entry_time: ts,
            sl: None,
            tp: None,
            mark_price: None,
            unrealized_pnl: None,
            pnl_percent: None,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value.get("markPrice").is_none());
        assert!(value.get("unrealizedPnl").is_none());
        assert_eq!(value["entryTime"], 1_714_564_800_000i64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_liveness_without_traffic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.db");
        let store = Arc::new(
            crate::engine::storage::Store::new(path.to_str().unwrap())
                .await
                .unwrap(),
        );
        let feed = PriceFeed::new("wss://example.invalid/ws");
        let (price_tx, _) = broadcast::channel::<PriceUpdate>(8);
        let (trigger_tx, _) = broadcast::channel::<TriggerExecuted>(8);

        let session = ClientSession::new(
            store,
            feed,
            price_tx.subscribe(),
            trigger_tx.subscribe(),
        );
        let stream = session.spawn();
        tokio::pin!(stream);

        // connected + initial, then with no traffic the next frame can
        // only be the 30s heartbeat.
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_frames() {
        let (tx, rx) = broadcast::channel(2);
        for ts in 0..5 {
            assert!(send_frame(&tx, &StreamFrame::Heartbeat { ts }));
        }

        let stream = BroadcastStream::new(rx).filter_map(|frame| frame.ok());
        tokio::pin!(stream);

        // The ring kept the two newest frames; the rest were evicted.
        assert!(stream.next().await.unwrap().contains("\"ts\":3"));
        assert!(stream.next().await.unwrap().contains("\"ts\":4"));
    }
}
