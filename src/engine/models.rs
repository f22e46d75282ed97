//! Data models for the trading engine
//!
//! All money values use Decimal for financial precision; timestamps are
//! UTC and serialize to millisecond epochs on the wire.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Side::Long),
            "SHORT" => Some(Side::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(PositionStatus::Open),
            "CLOSED" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the entry price is determined at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Market,
    Limit,
}

/// How `size_value` is interpreted when deriving the quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeMode {
    /// `size_value` is a notional amount in the quote asset
    Usdt,
    /// `size_value` is a base-asset quantity
    Qty,
}

/// How a submitted SL/TP value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlTpMode {
    /// Absolute price level
    Price,
    /// Percent distance from the entry price, converted once at creation
    Percent,
}

/// Fill classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillType {
    Open,
    Close,
    /// Reserved, unused
    Partial,
}

impl FillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillType::Open => "OPEN",
            FillType::Close => "CLOSE",
            FillType::Partial => "PARTIAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(FillType::Open),
            "CLOSE" => Some(FillType::Close),
            "PARTIAL" => Some(FillType::Partial),
            _ => None,
        }
    }
}

/// Audit-log event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PositionCreated,
    SlTriggered,
    TpTriggered,
    ManualClose,
    SlUpdated,
    TpUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PositionCreated => "POSITION_CREATED",
            EventKind::SlTriggered => "SL_TRIGGERED",
            EventKind::TpTriggered => "TP_TRIGGERED",
            EventKind::ManualClose => "MANUAL_CLOSE",
            EventKind::SlUpdated => "SL_UPDATED",
            EventKind::TpUpdated => "TP_UPDATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POSITION_CREATED" => Some(EventKind::PositionCreated),
            "SL_TRIGGERED" => Some(EventKind::SlTriggered),
            "TP_TRIGGERED" => Some(EventKind::TpTriggered),
            "MANUAL_CLOSE" => Some(EventKind::ManualClose),
            "SL_UPDATED" => Some(EventKind::SlUpdated),
            "TP_UPDATED" => Some(EventKind::TpUpdated),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A virtual perpetual-futures position
///
/// `symbol`, `side`, `qty`, `entry_price`, `entry_time`, `leverage` and
/// `fees_open` are immutable after creation. `sl`/`tp` mutate while OPEN.
/// The close-side fields are set exactly once when the position closes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub entry_price: Decimal,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub entry_time: DateTime<Utc>,
    pub leverage: u32,
    pub fees_open: Decimal,
    pub notes: Option<String>,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub status: PositionStatus,
    pub close_price: Option<Decimal>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub close_time: Option<DateTime<Utc>>,
    pub fees_close: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub funding_pnl: Option<Decimal>,
}

impl Position {
    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Append-only audit record of entry/exit economics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub id: i64,
    pub position_id: i64,
    #[serde(rename = "type")]
    pub fill_type: FillType,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
}

/// Append-only audit record of lifecycle transitions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEvent {
    pub id: i64,
    pub position_id: i64,
    pub event: EventKind,
    pub payload: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
}

/// Single-record user settings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Fraction charged on notional for taker fills
    pub taker_fee: Decimal,
    /// Fraction charged on notional for maker fills
    pub maker_fee: Decimal,
    /// Reserved; accrual is not implemented and funding PnL stays zero
    pub enable_funding: bool,
    /// Starting balance used for equity display
    pub base_balance: Decimal,
    /// Fallback SL percent for create requests that set no stop
    pub default_stop_loss_percent: Option<Decimal>,
    /// Fallback TP percent for create requests that set no target
    pub default_take_profit_percent: Option<Decimal>,
    /// Display preference, echoed only
    pub number_format: String,
    /// Display preference, echoed only
    pub timezone: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            taker_fee: Decimal::new(4, 4),  // 0.0004
            maker_fee: Decimal::new(2, 4),  // 0.0002
            enable_funding: false,
            base_balance: Decimal::new(10_000, 0),
            default_stop_loss_percent: None,
            default_take_profit_percent: None,
            number_format: "en-US".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Partial settings update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub taker_fee: Option<Decimal>,
    pub maker_fee: Option<Decimal>,
    pub enable_funding: Option<bool>,
    pub base_balance: Option<Decimal>,
    pub default_stop_loss_percent: Option<Decimal>,
    pub default_take_profit_percent: Option<Decimal>,
    pub number_format: Option<String>,
    pub timezone: Option<String>,
}

/// Request body for opening a position
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePositionRequest {
    pub symbol: String,
    pub side: Side,
    pub size_mode: SizeMode,
    pub size_value: Decimal,
    pub leverage: u32,
    pub entry_type: EntryType,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub sl: Option<Decimal>,
    #[serde(default)]
    pub tp: Option<Decimal>,
    #[serde(default)]
    pub sl_mode: Option<SlTpMode>,
    #[serde(default)]
    pub tp_mode: Option<SlTpMode>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// PATCH body for SL/TP edits; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSlTpRequest {
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
}

/// Realized PnL summed per symbol
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPnl {
    pub symbol: String,
    pub pnl: Decimal,
}

/// Aggregate statistics over all positions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_positions: u64,
    pub open_positions: u64,
    pub closed_positions: u64,
    pub total_pnl: Decimal,
    /// Fraction of closed positions with positive realized PnL, in percent
    pub win_rate: f64,
    /// Mean of (realizedPnl/qty) / |entry − sl| over closed positions that
    /// carried a stop with non-zero risk; null when none qualify
    pub avg_r_multiple: Option<f64>,
    pub best_symbol: Option<SymbolPnl>,
    pub worst_symbol: Option<SymbolPnl>,
    pub current_balance: Decimal,
}
