//! Public trading operations for the UI/API boundary
//!
//! Thin orchestration over Store + Calc + PriceFeed + REST: validation,
//! entry-price resolution, fee computation, aggregate statistics and the
//! CSV export. All state lives in the Store.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;
use crate::rest::ExchangeRest;
use crate::websocket::PriceFeed;

use super::calc;
use super::models::{
    CreatePositionRequest, EntryType, EventKind, Position, PositionEvent, PositionStatus,
    Settings, SettingsUpdate, SizeMode, SlTpMode, Stats, SymbolPnl, UpdateSlTpRequest,
};
use super::storage::{NewPosition, Store};

const MIN_SYMBOL_LEN: usize = 5;
const MAX_SYMBOL_LEN: usize = 20;
const MAX_LEVERAGE: u32 = 125;
const DEFAULT_EVENT_LIMIT: usize = 100;

pub struct Broker {
    store: Arc<Store>,
    feed: PriceFeed,
    rest: ExchangeRest,
    quote_asset: String,
}

impl Broker {
    pub fn new(store: Arc<Store>, feed: PriceFeed, rest: ExchangeRest, quote_asset: String) -> Self {
        Self {
            store,
            feed,
            rest,
            quote_asset,
        }
    }

    /// Validate, resolve the entry price, convert percent SL/TP and
    /// persist the position; subscribes the feed to the symbol.
    pub async fn create_position(&self, req: CreatePositionRequest) -> Result<Position, AppError> {
        let symbol = req.symbol.trim().to_uppercase();
        self.validate_symbol(&symbol)?;

        if !(1..=MAX_LEVERAGE).contains(&req.leverage) {
            return Err(AppError::Validation(format!(
                "leverage must be between 1 and {MAX_LEVERAGE}"
            )));
        }
        if req.size_value <= Decimal::ZERO {
            return Err(AppError::Validation("sizeValue must be positive".to_string()));
        }

        let entry_price = match req.entry_type {
            EntryType::Limit => match req.limit_price {
                Some(price) if price > Decimal::ZERO => price,
                _ => {
                    return Err(AppError::Validation(
                        "limitPrice must be positive for LIMIT entries".to_string(),
                    ))
                }
            },
            EntryType::Market => self.rest.ticker_price(&symbol).await?,
        };

        let settings = self.store.get_settings().await?;

        // Percent levels are anchored to the resolved entry price, which
        // for LIMIT entries equals the limit price. A request without a
        // level falls back to the settings-wide default percent.
        let sl = match resolve_level(req.sl, req.sl_mode, "sl", |p| {
            calc::sl_price_from_percent(req.side, entry_price, p)
        })? {
            Some(level) => Some(level),
            None => settings
                .default_stop_loss_percent
                .map(|p| calc::sl_price_from_percent(req.side, entry_price, p)),
        };
        let tp = match resolve_level(req.tp, req.tp_mode, "tp", |p| {
            calc::tp_price_from_percent(req.side, entry_price, p)
        })? {
            Some(level) => Some(level),
            None => settings
                .default_take_profit_percent
                .map(|p| calc::tp_price_from_percent(req.side, entry_price, p)),
        };
        let qty = match req.size_mode {
            SizeMode::Usdt => req.size_value / entry_price,
            SizeMode::Qty => req.size_value,
        };
        let fees_open = calc::fee(calc::notional(qty, entry_price), settings.taker_fee);

        let position = self
            .store
            .create_position(NewPosition {
                symbol: symbol.clone(),
                side: req.side,
                size_mode: req.size_mode,
                size_value: req.size_value,
                entry_price,
                leverage: req.leverage,
                fees_open,
                sl,
                tp,
                notes: req.notes,
            })
            .await?;

        self.feed.subscribe(&symbol);

        info!(
            position_id = position.id,
            symbol = %position.symbol,
            side = %position.side,
            qty = %position.qty,
            entry_price = %position.entry_price,
            sl = ?position.sl,
            tp = ?position.tp,
            "position opened"
        );

        Ok(position)
    }

    /// Close at the latest known price; cache first, REST fallback.
    /// Closing an already-closed position is a Conflict.
    pub async fn close_position_manual(&self, id: i64) -> Result<Position, AppError> {
        let position = self
            .store
            .get_position(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("position {id} not found")))?;
        if position.status == PositionStatus::Closed {
            return Err(AppError::Conflict(format!("position {id} already closed")));
        }

        let close_price = match self.feed.last_price(&position.symbol) {
            Some(price) => price,
            None => self.rest.ticker_price(&position.symbol).await?,
        };
        let settings = self.store.get_settings().await?;
        let close_fee = calc::fee(calc::notional(position.qty, close_price), settings.taker_fee);

        let closed = self
            .store
            .close_position(id, close_price, close_fee, EventKind::ManualClose, Utc::now())
            .await?
            .ok_or_else(|| AppError::Conflict(format!("position {id} already closed")))?;

        info!(
            position_id = closed.id,
            symbol = %closed.symbol,
            close_price = %close_price,
            realized_pnl = ?closed.realized_pnl,
            "position closed manually"
        );
        Ok(closed)
    }

    pub async fn update_sl_tp(
        &self,
        id: i64,
        update: UpdateSlTpRequest,
    ) -> Result<Position, AppError> {
        if update.sl.is_none() && update.tp.is_none() {
            return Err(AppError::Validation("provide sl and/or tp".to_string()));
        }
        for (name, value) in [("sl", update.sl), ("tp", update.tp)] {
            if let Some(v) = value {
                if v <= Decimal::ZERO {
                    return Err(AppError::Validation(format!("{name} must be positive")));
                }
            }
        }
        self.store.update_sl_tp(id, &update).await
    }

    pub async fn delete_position(&self, id: i64) -> Result<(), AppError> {
        if self.store.delete_position(id).await? {
            info!(position_id = id, "position deleted");
            Ok(())
        } else {
            Err(AppError::NotFound(format!("position {id} not found")))
        }
    }

    pub async fn get_position(&self, id: i64) -> Result<Position, AppError> {
        self.store
            .get_position(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("position {id} not found")))
    }

    pub async fn list_positions(
        &self,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>, AppError> {
        self.store.list_positions(status).await
    }

    pub async fn get_events(
        &self,
        position_id: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<PositionEvent>, AppError> {
        self.store
            .list_events(position_id, limit.unwrap_or(DEFAULT_EVENT_LIMIT))
            .await
    }

    pub async fn get_settings(&self) -> Result<Settings, AppError> {
        self.store.get_settings().await
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<Settings, AppError> {
        for (name, value) in [("takerFee", update.taker_fee), ("makerFee", update.maker_fee)] {
            if let Some(v) = value {
                if v < Decimal::ZERO {
                    return Err(AppError::Validation(format!("{name} must not be negative")));
                }
            }
        }
        for (name, value) in [
            ("defaultStopLossPercent", update.default_stop_loss_percent),
            ("defaultTakeProfitPercent", update.default_take_profit_percent),
        ] {
            if let Some(v) = value {
                if v <= Decimal::ZERO {
                    return Err(AppError::Validation(format!("{name} must be positive")));
                }
            }
        }
        self.store.update_settings(&update).await
    }

    /// Aggregates over all positions; ties between symbols resolve to
    /// the earliest-created one.
    pub async fn get_stats(&self) -> Result<Stats, AppError> {
        let positions = self.store.list_all_by_id().await?;
        let settings = self.store.get_settings().await?;

        let total_positions = positions.len() as u64;
        let open_positions = positions.iter().filter(|p| p.is_open()).count() as u64;
        let closed: Vec<&Position> = positions.iter().filter(|p| !p.is_open()).collect();
        let closed_positions = closed.len() as u64;

        let total_pnl: Decimal = closed
            .iter()
            .filter_map(|p| p.realized_pnl)
            .sum();

        let winners = closed
            .iter()
            .filter(|p| p.realized_pnl.map(|r| r > Decimal::ZERO).unwrap_or(false))
            .count();
        let win_rate = if closed.is_empty() {
            0.0
        } else {
            winners as f64 / closed.len() as f64 * 100.0
        };

        let mut r_multiples: Vec<Decimal> = Vec::new();
        for p in &closed {
            let (Some(realized), Some(sl)) = (p.realized_pnl, p.sl) else {
                continue;
            };
            let risk = (p.entry_price - sl).abs();
            if risk.is_zero() || p.qty.is_zero() {
                continue;
            }
            r_multiples.push(realized / p.qty / risk);
        }
        let avg_r_multiple = if r_multiples.is_empty() {
            None
        } else {
            let mean: Decimal =
                r_multiples.iter().copied().sum::<Decimal>() / Decimal::from(r_multiples.len());
            Some(mean.try_into().unwrap_or(0.0))
        };

        // Per-symbol sums in insertion order so ties keep the earliest.
        let mut by_symbol: Vec<(String, Decimal)> = Vec::new();
        for p in &closed {
            let Some(realized) = p.realized_pnl else { continue };
            match by_symbol.iter_mut().find(|(s, _)| *s == p.symbol) {
                Some((_, sum)) => *sum += realized,
                None => by_symbol.push((p.symbol.clone(), realized)),
            }
        }
        let mut best_symbol: Option<SymbolPnl> = None;
        let mut worst_symbol: Option<SymbolPnl> = None;
        for (symbol, pnl) in &by_symbol {
            if best_symbol.as_ref().map(|b| *pnl > b.pnl).unwrap_or(true) {
                best_symbol = Some(SymbolPnl {
                    symbol: symbol.clone(),
                    pnl: *pnl,
                });
            }
            if worst_symbol.as_ref().map(|w| *pnl < w.pnl).unwrap_or(true) {
                worst_symbol = Some(SymbolPnl {
                    symbol: symbol.clone(),
                    pnl: *pnl,
                });
            }
        }

        Ok(Stats {
            total_positions,
            open_positions,
            closed_positions,
            total_pnl,
            win_rate,
            avg_r_multiple,
            best_symbol,
            worst_symbol,
            current_balance: settings.base_balance + total_pnl,
        })
    }

    /// CSV over positions in the entry-time range; OPEN rows have empty
    /// close-side cells
    pub async fn export_csv(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        symbol: Option<String>,
    ) -> Result<String, AppError> {
        let symbol = symbol.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty());
        let positions = self
            .store
            .list_for_export(start, end, symbol.as_deref())
            .await?;

        let mut out = String::from(
            "ID,Symbol,Side,Quantity,Entry Price,Close Price,Entry Time,Close Time,\
             Realized PnL,Fees Open,Fees Close,Funding PnL,Leverage,Notes\n",
        );
        for p in positions {
            let row = [
                p.id.to_string(),
                p.symbol.clone(),
                p.side.to_string(),
                p.qty.to_string(),
                p.entry_price.to_string(),
                p.close_price.map(|v| v.to_string()).unwrap_or_default(),
                iso8601(p.entry_time),
                p.close_time.map(iso8601).unwrap_or_default(),
                p.realized_pnl.map(|v| v.to_string()).unwrap_or_default(),
                p.fees_open.to_string(),
                p.fees_close.map(|v| v.to_string()).unwrap_or_default(),
                p.funding_pnl.map(|v| v.to_string()).unwrap_or_default(),
                p.leverage.to_string(),
                p.notes.clone().unwrap_or_default(),
            ];
            let escaped: Vec<String> = row.iter().map(|cell| csv_cell(cell)).collect();
            out.push_str(&escaped.join(","));
            out.push('\n');
        }
        Ok(out)
    }

    fn validate_symbol(&self, symbol: &str) -> Result<(), AppError> {
        if symbol.len() < MIN_SYMBOL_LEN || symbol.len() > MAX_SYMBOL_LEN {
            return Err(AppError::Validation(format!(
                "symbol must be {MIN_SYMBOL_LEN}-{MAX_SYMBOL_LEN} characters"
            )));
        }
        if !symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(AppError::Validation(
                "symbol must be uppercase alphanumeric".to_string(),
            ));
        }
        if !symbol.ends_with(&self.quote_asset) {
            return Err(AppError::Validation(format!(
                "symbol must end in {}",
                self.quote_asset
            )));
        }
        Ok(())
    }
}

/// An SL/TP input is either an absolute price or a percent distance;
/// percent values convert once, here.
fn resolve_level(
    value: Option<Decimal>,
    mode: Option<SlTpMode>,
    name: &str,
    from_percent: impl Fn(Decimal) -> Decimal,
) -> Result<Option<Decimal>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if value <= Decimal::ZERO {
        return Err(AppError::Validation(format!("{name} must be positive")));
    }
    match mode.unwrap_or(SlTpMode::Price) {
        SlTpMode::Price => Ok(Some(value)),
        SlTpMode::Percent => Ok(Some(from_percent(value))),
    }
}

fn iso8601(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wrap cells containing commas or quotes, doubling embedded quotes
fn csv_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_cell_escaping() {
        assert_eq!(csv_cell("plain"), "plain");
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_resolve_level_modes() {
        use rust_decimal_macros::dec;
        let from_percent = |p: Decimal| dec!(100) * (Decimal::ONE - p / dec!(100));

        assert_eq!(resolve_level(None, None, "sl", from_percent).unwrap(), None);
        assert_eq!(
            resolve_level(Some(dec!(95)), Some(SlTpMode::Price), "sl", from_percent).unwrap(),
            Some(dec!(95))
        );
        assert_eq!(
            resolve_level(Some(dec!(5)), Some(SlTpMode::Percent), "sl", from_percent).unwrap(),
            Some(dec!(95.00))
        );
        assert!(resolve_level(Some(dec!(-1)), None, "sl", from_percent).is_err());
    }
}
