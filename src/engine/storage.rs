//! SQLite persistence for positions, fills, events and settings
//!
//! Async wrapper over rusqlite with WAL enabled. The connection mutex is
//! the single-writer discipline: every transaction holds it end to end,
//! which makes the guarded close the linearization point for triggers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::json;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::AppError;

use super::models::{
    EventKind, Fill, FillType, Position, PositionEvent, PositionStatus, Settings, SettingsUpdate,
    Side, SizeMode, UpdateSlTpRequest,
};

const POSITION_COLUMNS: &str = "id, symbol, side, qty, entry_price, entry_time, leverage, \
     fees_open, notes, sl, tp, status, close_price, close_time, fees_close, realized_pnl, \
     funding_pnl";

/// Input for a new position; the quantity is derived here from the size mode
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub symbol: String,
    pub side: Side,
    pub size_mode: SizeMode,
    pub size_value: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub fees_open: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub notes: Option<String>,
}

/// Async SQLite connection wrapper
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database, run migrations and seed
    /// default settings
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrate(&conn)?;
        seed_settings(&conn)?;

        info!(path = %db_path, "database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a position together with its OPEN fill and POSITION_CREATED
    /// event in one transaction
    pub async fn create_position(&self, new: NewPosition) -> Result<Position, AppError> {
        let qty = match new.size_mode {
            SizeMode::Usdt => new.size_value / new.entry_price,
            SizeMode::Qty => new.size_value,
        };
        let entry_time = Utc::now();

        let mut position = Position {
            id: 0,
            symbol: new.symbol,
            side: new.side,
            qty,
            entry_price: new.entry_price,
            entry_time,
            leverage: new.leverage,
            fees_open: new.fees_open,
            notes: new.notes,
            sl: new.sl,
            tp: new.tp,
            status: PositionStatus::Open,
            close_price: None,
            close_time: None,
            fees_close: None,
            realized_pnl: None,
            funding_pnl: None,
        };

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO positions \
             (symbol, side, qty, entry_price, entry_time, leverage, fees_open, notes, sl, tp, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'OPEN')",
            params![
                position.symbol,
                position.side.as_str(),
                position.qty.to_string(),
                position.entry_price.to_string(),
                position.entry_time.timestamp_millis(),
                position.leverage,
                position.fees_open.to_string(),
                position.notes,
                position.sl.map(|d| d.to_string()),
                position.tp.map(|d| d.to_string()),
            ],
        )?;
        position.id = tx.last_insert_rowid();

        insert_fill(
            &tx,
            position.id,
            FillType::Open,
            position.entry_price,
            position.qty,
            position.fees_open,
            entry_time,
        )?;
        insert_event(
            &tx,
            position.id,
            EventKind::PositionCreated,
            &json!({
                "symbol": &position.symbol,
                "side": position.side,
                "qty": position.qty.to_string(),
                "entryPrice": position.entry_price.to_string(),
                "leverage": position.leverage,
            }),
            entry_time,
        )?;

        tx.commit()?;
        Ok(position)
    }

    pub async fn get_position(&self, id: i64) -> Result<Option<Position>, AppError> {
        let conn = self.conn.lock().await;
        let position = conn
            .query_row(
                &format!("SELECT {POSITION_COLUMNS} FROM positions WHERE id = ?1"),
                [id],
                row_to_position,
            )
            .optional()?;
        Ok(position)
    }

    /// List positions, newest entries first, optionally filtered by status
    pub async fn list_positions(
        &self,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>, AppError> {
        let conn = self.conn.lock().await;
        let positions = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {POSITION_COLUMNS} FROM positions WHERE status = ?1 \
                     ORDER BY entry_time DESC, id DESC"
                ))?;
                let rows = stmt.query_map([status.as_str()], row_to_position)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {POSITION_COLUMNS} FROM positions ORDER BY entry_time DESC, id DESC"
                ))?;
                let rows = stmt.query_map([], row_to_position)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(positions)
    }

    /// OPEN positions on one symbol in id order — the trigger scan order
    pub async fn list_open_by_symbol(&self, symbol: &str) -> Result<Vec<Position>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE status = 'OPEN' AND symbol = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([symbol], row_to_position)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All positions in creation order, for aggregation
    pub async fn list_all_by_id(&self) -> Result<Vec<Position>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_position)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Distinct symbols with at least one OPEN position
    pub async fn open_symbols(&self) -> Result<Vec<String>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT DISTINCT symbol FROM positions WHERE status = 'OPEN'")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn count_open_for_symbol(&self, symbol: &str) -> Result<i64, AppError> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM positions WHERE status = 'OPEN' AND symbol = ?1",
            [symbol],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Update SL and/or TP on an OPEN position; emits one event named after
    /// the first-updated field
    pub async fn update_sl_tp(
        &self,
        id: i64,
        update: &UpdateSlTpRequest,
    ) -> Result<Position, AppError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let mut position = tx
            .query_row(
                &format!("SELECT {POSITION_COLUMNS} FROM positions WHERE id = ?1"),
                [id],
                row_to_position,
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("position {id} not found")))?;

        if position.status == PositionStatus::Closed {
            return Err(AppError::Conflict(format!(
                "position {id} is closed; SL/TP can no longer change"
            )));
        }

        match (update.sl, update.tp) {
            (Some(sl), Some(tp)) => {
                tx.execute(
                    "UPDATE positions SET sl = ?1, tp = ?2 WHERE id = ?3",
                    params![sl.to_string(), tp.to_string(), id],
                )?;
                position.sl = Some(sl);
                position.tp = Some(tp);
            }
            (Some(sl), None) => {
                tx.execute(
                    "UPDATE positions SET sl = ?1 WHERE id = ?2",
                    params![sl.to_string(), id],
                )?;
                position.sl = Some(sl);
            }
            (None, Some(tp)) => {
                tx.execute(
                    "UPDATE positions SET tp = ?1 WHERE id = ?2",
                    params![tp.to_string(), id],
                )?;
                position.tp = Some(tp);
            }
            (None, None) => {
                return Err(AppError::Validation("no SL or TP value provided".to_string()));
            }
        }

        let kind = if update.sl.is_some() {
            EventKind::SlUpdated
        } else {
            EventKind::TpUpdated
        };
        insert_event(
            &tx,
            id,
            kind,
            &json!({
                "sl": update.sl.map(|d| d.to_string()),
                "tp": update.tp.map(|d| d.to_string()),
            }),
            Utc::now(),
        )?;

        tx.commit()?;
        Ok(position)
    }

    /// Guarded close: the conditional UPDATE commits at most once per
    /// position. Returns None when another closure already won — callers
    /// treat that as "already handled", not an error.
    pub async fn close_position(
        &self,
        id: i64,
        close_price: Decimal,
        close_fee: Decimal,
        event: EventKind,
        close_time: DateTime<Utc>,
    ) -> Result<Option<Position>, AppError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let mut position = tx
            .query_row(
                &format!("SELECT {POSITION_COLUMNS} FROM positions WHERE id = ?1"),
                [id],
                row_to_position,
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("position {id} not found")))?;

        let funding_pnl = Decimal::ZERO;
        let gross = super::calc::gross_pnl(position.side, position.entry_price, close_price, position.qty);
        let realized_pnl = gross - position.fees_open - close_fee - funding_pnl;

        let changed = tx.execute(
            "UPDATE positions SET status = 'CLOSED', close_price = ?1, close_time = ?2, \
             fees_close = ?3, realized_pnl = ?4, funding_pnl = ?5 \
             WHERE id = ?6 AND status = 'OPEN'",
            params![
                close_price.to_string(),
                close_time.timestamp_millis(),
                close_fee.to_string(),
                realized_pnl.to_string(),
                funding_pnl.to_string(),
                id,
            ],
        )?;

        if changed == 0 {
            // Lost the race; nothing was written.
            tx.commit()?;
            return Ok(None);
        }

        insert_fill(&tx, id, FillType::Close, close_price, position.qty, close_fee, close_time)?;
        insert_event(
            &tx,
            id,
            event,
            &json!({
                "closePrice": close_price.to_string(),
                "realizedPnl": realized_pnl.to_string(),
                "feesClose": close_fee.to_string(),
            }),
            close_time,
        )?;

        tx.commit()?;

        position.status = PositionStatus::Closed;
        position.close_price = Some(close_price);
        position.close_time = Some(close_time);
        position.fees_close = Some(close_fee);
        position.realized_pnl = Some(realized_pnl);
        position.funding_pnl = Some(funding_pnl);
        Ok(Some(position))
    }

    /// Unconditional delete; fills and events go with the position
    pub async fn delete_position(&self, id: i64) -> Result<bool, AppError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute("DELETE FROM positions WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Fills for one position in write order
    pub async fn list_fills(&self, position_id: i64) -> Result<Vec<Fill>, AppError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, position_id, type, price, qty, fee, ts FROM fills \
             WHERE position_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([position_id], row_to_fill)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Audit events, newest first
    pub async fn list_events(
        &self,
        position_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PositionEvent>, AppError> {
        let conn = self.conn.lock().await;
        let limit = limit as i64;
        let events = match position_id {
            Some(pid) => {
                let mut stmt = conn.prepare(
                    "SELECT id, position_id, event, payload, ts FROM events \
                     WHERE position_id = ?1 ORDER BY ts DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![pid, limit], row_to_event)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, position_id, event, payload, ts FROM events \
                     ORDER BY ts DESC, id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], row_to_event)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(events)
    }

    /// Positions for CSV export, oldest entries first
    pub async fn list_for_export(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, AppError> {
        let conn = self.conn.lock().await;

        let start_ms = start.map(|t| t.timestamp_millis());
        let end_ms = end.map(|t| t.timestamp_millis());
        let mut sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE 1=1");
        let mut args: Vec<&dyn ToSql> = Vec::new();
        if let Some(ref v) = start_ms {
            sql.push_str(" AND entry_time >= ?");
            args.push(v);
        }
        if let Some(ref v) = end_ms {
            sql.push_str(" AND entry_time <= ?");
            args.push(v);
        }
        if let Some(ref s) = symbol {
            sql.push_str(" AND symbol = ?");
            args.push(s);
        }
        sql.push_str(" ORDER BY entry_time ASC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_position)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn get_settings(&self) -> Result<Settings, AppError> {
        let conn = self.conn.lock().await;
        let settings = conn.query_row(
            "SELECT taker_fee, maker_fee, enable_funding, base_balance, \
             default_stop_loss_percent, default_take_profit_percent, number_format, timezone \
             FROM settings WHERE id = 1",
            [],
            row_to_settings,
        )?;
        Ok(settings)
    }

    /// Apply the provided fields on top of the stored settings
    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings, AppError> {
        let conn = self.conn.lock().await;
        let mut settings = conn.query_row(
            "SELECT taker_fee, maker_fee, enable_funding, base_balance, \
             default_stop_loss_percent, default_take_profit_percent, number_format, timezone \
             FROM settings WHERE id = 1",
            [],
            row_to_settings,
        )?;

        if let Some(v) = update.taker_fee {
            settings.taker_fee = v;
        }
        if let Some(v) = update.maker_fee {
            settings.maker_fee = v;
        }
        if let Some(v) = update.enable_funding {
            settings.enable_funding = v;
        }
        if let Some(v) = update.base_balance {
            settings.base_balance = v;
        }
        if let Some(v) = update.default_stop_loss_percent {
            settings.default_stop_loss_percent = Some(v);
        }
        if let Some(v) = update.default_take_profit_percent {
            settings.default_take_profit_percent = Some(v);
        }
        if let Some(ref v) = update.number_format {
            settings.number_format = v.clone();
        }
        if let Some(ref v) = update.timezone {
            settings.timezone = v.clone();
        }

        conn.execute(
            "UPDATE settings SET taker_fee = ?1, maker_fee = ?2, enable_funding = ?3, \
             base_balance = ?4, default_stop_loss_percent = ?5, default_take_profit_percent = ?6, \
             number_format = ?7, timezone = ?8 WHERE id = 1",
            params![
                settings.taker_fee.to_string(),
                settings.maker_fee.to_string(),
                settings.enable_funding as i64,
                settings.base_balance.to_string(),
                settings.default_stop_loss_percent.map(|d| d.to_string()),
                settings.default_take_profit_percent.map(|d| d.to_string()),
                settings.number_format,
                settings.timezone,
            ],
        )?;

        Ok(settings)
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            qty TEXT NOT NULL,
            entry_price TEXT NOT NULL,
            entry_time INTEGER NOT NULL,
            leverage INTEGER NOT NULL,
            fees_open TEXT NOT NULL,
            sl TEXT,
            tp TEXT,
            status TEXT NOT NULL DEFAULT 'OPEN',
            close_price TEXT,
            close_time INTEGER,
            fees_close TEXT,
            realized_pnl TEXT
        );

        CREATE TABLE IF NOT EXISTS fills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            position_id INTEGER NOT NULL REFERENCES positions(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            price TEXT NOT NULL,
            qty TEXT NOT NULL,
            fee TEXT NOT NULL,
            ts INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            position_id INTEGER NOT NULL REFERENCES positions(id) ON DELETE CASCADE,
            event TEXT NOT NULL,
            payload TEXT NOT NULL,
            ts INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            taker_fee TEXT NOT NULL,
            maker_fee TEXT NOT NULL,
            enable_funding INTEGER NOT NULL,
            base_balance TEXT NOT NULL,
            default_stop_loss_percent TEXT,
            default_take_profit_percent TEXT,
            number_format TEXT NOT NULL,
            timezone TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_positions_status_symbol ON positions(status, symbol);
        CREATE INDEX IF NOT EXISTS idx_positions_entry_time ON positions(entry_time);
        CREATE INDEX IF NOT EXISTS idx_fills_position ON fills(position_id);
        CREATE INDEX IF NOT EXISTS idx_events_position ON events(position_id);
        "#,
    )?;

    // Columns added after the initial schema; no-ops on databases that
    // already have them.
    add_column_if_missing(conn, "positions", "notes", "TEXT")?;
    add_column_if_missing(conn, "positions", "funding_pnl", "TEXT")?;

    Ok(())
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .any(|name| name == column);
    if !exists {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
    }
    Ok(())
}

fn seed_settings(conn: &Connection) -> rusqlite::Result<()> {
    let defaults = Settings::default();
    conn.execute(
        "INSERT OR IGNORE INTO settings \
         (id, taker_fee, maker_fee, enable_funding, base_balance, \
          default_stop_loss_percent, default_take_profit_percent, number_format, timezone) \
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            defaults.taker_fee.to_string(),
            defaults.maker_fee.to_string(),
            defaults.enable_funding as i64,
            defaults.base_balance.to_string(),
            defaults.default_stop_loss_percent.map(|d| d.to_string()),
            defaults.default_take_profit_percent.map(|d| d.to_string()),
            defaults.number_format,
            defaults.timezone,
        ],
    )?;
    Ok(())
}

fn insert_fill(
    conn: &Connection,
    position_id: i64,
    fill_type: FillType,
    price: Decimal,
    qty: Decimal,
    fee: Decimal,
    ts: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO fills (position_id, type, price, qty, fee, ts) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            position_id,
            fill_type.as_str(),
            price.to_string(),
            qty.to_string(),
            fee.to_string(),
            ts.timestamp_millis(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_event(
    conn: &Connection,
    position_id: i64,
    kind: EventKind,
    payload: &serde_json::Value,
    ts: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO events (position_id, event, payload, ts) VALUES (?1, ?2, ?3, ?4)",
        params![
            position_id,
            kind.as_str(),
            payload.to_string(),
            ts.timestamp_millis(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Row decoding ────────────────────────────────────────────────────

fn column_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn decimal_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|_| column_error(idx, format!("bad decimal '{raw}'")))
}

fn decimal_col_opt(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|_| column_error(idx, format!("bad decimal '{s}'"))))
        .transpose()
}

fn time_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn time_col_opt(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|v| {
        DateTime::from_timestamp_millis(v).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, v))
    })
    .transpose()
}

fn row_to_position(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    let side_raw: String = row.get(2)?;
    let side =
        Side::parse(&side_raw).ok_or_else(|| column_error(2, format!("bad side '{side_raw}'")))?;
    let status_raw: String = row.get(11)?;
    let status = PositionStatus::parse(&status_raw)
        .ok_or_else(|| column_error(11, format!("bad status '{status_raw}'")))?;

    Ok(Position {
        id: row.get(0)?,
        symbol: row.get(1)?,
        side,
        qty: decimal_col(row, 3)?,
        entry_price: decimal_col(row, 4)?,
        entry_time: time_col(row, 5)?,
        leverage: row.get(6)?,
        fees_open: decimal_col(row, 7)?,
        notes: row.get(8)?,
        sl: decimal_col_opt(row, 9)?,
        tp: decimal_col_opt(row, 10)?,
        status,
        close_price: decimal_col_opt(row, 12)?,
        close_time: time_col_opt(row, 13)?,
        fees_close: decimal_col_opt(row, 14)?,
        realized_pnl: decimal_col_opt(row, 15)?,
        funding_pnl: decimal_col_opt(row, 16)?,
    })
}

fn row_to_settings(row: &rusqlite::Row) -> rusqlite::Result<Settings> {
    let enable_funding: i64 = row.get(2)?;
    Ok(Settings {
        taker_fee: decimal_col(row, 0)?,
        maker_fee: decimal_col(row, 1)?,
        enable_funding: enable_funding != 0,
        base_balance: decimal_col(row, 3)?,
        default_stop_loss_percent: decimal_col_opt(row, 4)?,
        default_take_profit_percent: decimal_col_opt(row, 5)?,
        number_format: row.get(6)?,
        timezone: row.get(7)?,
    })
}

fn row_to_fill(row: &rusqlite::Row) -> rusqlite::Result<Fill> {
    let type_raw: String = row.get(2)?;
    let fill_type = FillType::parse(&type_raw)
        .ok_or_else(|| column_error(2, format!("bad fill type '{type_raw}'")))?;
    Ok(Fill {
        id: row.get(0)?,
        position_id: row.get(1)?,
        fill_type,
        price: decimal_col(row, 3)?,
        qty: decimal_col(row, 4)?,
        fee: decimal_col(row, 5)?,
        ts: time_col(row, 6)?,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<PositionEvent> {
    let kind_raw: String = row.get(2)?;
    let event = EventKind::parse(&kind_raw)
        .ok_or_else(|| column_error(2, format!("bad event kind '{kind_raw}'")))?;
    let payload_raw: String = row.get(3)?;
    let payload = serde_json::from_str(&payload_raw)
        .map_err(|e| column_error(3, format!("bad payload: {e}")))?;
    Ok(PositionEvent {
        id: row.get(0)?,
        position_id: row.get(1)?,
        event,
        payload,
        ts: time_col(row, 4)?,
    })
}
