//! Trading engine: per-tick trigger evaluation and lifecycle events
//!
//! The `TriggerEngine` consumes the feed's tick broadcast and decides,
//! for every OPEN position on the tick's symbol, whether a stop-loss or
//! take-profit closes it. Closure is delegated to the Store's guarded
//! conditional update, which makes it at-most-once even when consecutive
//! ticks both satisfy a predicate.

pub mod broker;
pub mod calc;
pub mod models;
pub mod storage;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::metrics::EngineMetrics;
use crate::parser::MarkPriceTick;
use crate::websocket::PriceFeed;

use models::{EventKind, Position};
use storage::Store;

const PRICE_CHANNEL_CAPACITY: usize = 1024;
const TRIGGER_CHANNEL_CAPACITY: usize = 256;

/// Broadcast payload: one accepted tick
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub symbol: String,
    pub mark_price: Decimal,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
}

/// Broadcast payload: one committed automatic closure
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerExecuted {
    pub position_id: i64,
    pub event: EventKind,
    pub close_price: Decimal,
    pub realized_pnl: Decimal,
}

pub struct TriggerEngine {
    store: Arc<Store>,
    feed: PriceFeed,
    metrics: EngineMetrics,
    price_tx: broadcast::Sender<PriceUpdate>,
    trigger_tx: broadcast::Sender<TriggerExecuted>,
}

impl TriggerEngine {
    pub fn new(store: Arc<Store>, feed: PriceFeed, metrics: EngineMetrics) -> Self {
        let (price_tx, _) = broadcast::channel(PRICE_CHANNEL_CAPACITY);
        let (trigger_tx, _) = broadcast::channel(TRIGGER_CHANNEL_CAPACITY);
        Self {
            store,
            feed,
            metrics,
            price_tx,
            trigger_tx,
        }
    }

    pub fn subscribe_prices(&self) -> broadcast::Receiver<PriceUpdate> {
        self.price_tx.subscribe()
    }

    pub fn subscribe_triggers(&self) -> broadcast::Receiver<TriggerExecuted> {
        self.trigger_tx.subscribe()
    }

    /// Run the engine until the feed's tick channel closes
    pub fn spawn(engine: Arc<TriggerEngine>) {
        let mut ticks = engine.feed.ticks();
        tokio::spawn(async move {
            loop {
                match ticks.recv().await {
                    Ok(tick) => engine.on_tick(tick).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "engine lagged behind the tick stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("tick stream closed, trigger engine stopping");
                        return;
                    }
                }
            }
        });
    }

    /// Evaluate one tick. Stops are checked before targets, positions in
    /// id order, and a failure on one position never blocks the rest.
    pub async fn on_tick(&self, tick: MarkPriceTick) {
        self.metrics.ticks_total.inc();
        let _ = self.price_tx.send(PriceUpdate {
            symbol: tick.symbol.clone(),
            mark_price: tick.mark_price,
            ts: tick.ts,
        });

        let positions = match self.store.list_open_by_symbol(&tick.symbol).await {
            Ok(positions) => positions,
            Err(e) => {
                error!(symbol = %tick.symbol, error = %e, "failed to load open positions");
                return;
            }
        };

        for position in &positions {
            if calc::should_trigger_sl(position.side, tick.mark_price, position.sl) {
                self.execute_trigger(position, &tick, EventKind::SlTriggered)
                    .await;
                // A position closes at most once per tick; never fall
                // through to the TP check.
                continue;
            }
            if calc::should_trigger_tp(position.side, tick.mark_price, position.tp) {
                self.execute_trigger(position, &tick, EventKind::TpTriggered)
                    .await;
            }
        }

        match self.store.count_open_for_symbol(&tick.symbol).await {
            Ok(0) => self.feed.unsubscribe(&tick.symbol),
            Ok(_) => {}
            Err(e) => warn!(symbol = %tick.symbol, error = %e, "open-position count failed"),
        }
    }

    async fn execute_trigger(&self, position: &Position, tick: &MarkPriceTick, kind: EventKind) {
        let taker_fee = match self.store.get_settings().await {
            Ok(settings) => settings.taker_fee,
            Err(e) => {
                error!(position_id = position.id, error = %e, "settings unavailable, skipping trigger");
                return;
            }
        };
        let close_fee = calc::fee(calc::notional(position.qty, tick.mark_price), taker_fee);

        match self
            .store
            .close_position(position.id, tick.mark_price, close_fee, kind, tick.ts)
            .await
        {
            Ok(Some(closed)) => {
                self.metrics.triggers_total.inc();
                let realized_pnl = closed.realized_pnl.unwrap_or(Decimal::ZERO);
                info!(
                    position_id = closed.id,
                    symbol = %closed.symbol,
                    event = %kind,
                    close_price = %tick.mark_price,
                    realized_pnl = %realized_pnl,
                    "trigger executed"
                );
                let _ = self.trigger_tx.send(TriggerExecuted {
                    position_id: closed.id,
                    event: kind,
                    close_price: tick.mark_price,
                    realized_pnl,
                });
            }
            // Another closure already won; nothing to announce.
            Ok(None) => debug!(position_id = position.id, "position already closed"),
            Err(e) => {
                // A stuck position is better than a halted engine.
                error!(position_id = position.id, error = %e, "trigger close failed");
            }
        }
    }
}
