//! Exchange wire message parsing
//!
//! Only two inbound shapes matter: mark-price updates and subscription
//! acknowledgements. Everything else is surfaced as `Other` so the feed
//! can log and drop it without tearing down the session.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// A normalized mark-price tick
#[derive(Debug, Clone)]
pub struct MarkPriceTick {
    /// Uppercase quote-denominated pair
    pub symbol: String,
    pub mark_price: Decimal,
    pub ts: DateTime<Utc>,
}

/// Raw `markPriceUpdate` event as sent by the exchange
#[derive(Debug, Deserialize)]
pub struct MarkPriceUpdate {
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event timestamp in ms
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    /// String-encoded mark price
    #[serde(rename = "p")]
    pub mark_price: String,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid price '{0}'")]
    Price(String),
    #[error("invalid timestamp {0}")]
    Timestamp(i64),
}

#[derive(Debug)]
pub enum ParsedMessage {
    MarkPrice(MarkPriceTick),
    Ack { id: Option<u64> },
    Other(Value),
}

/// Parse one inbound text frame
pub fn parse_message(text: &str) -> Result<ParsedMessage, WireError> {
    let value: Value = serde_json::from_str(text)?;

    if value.get("e").and_then(Value::as_str) == Some("markPriceUpdate") {
        let raw: MarkPriceUpdate = serde_json::from_value(value)?;
        let mark_price = Decimal::from_str(&raw.mark_price)
            .map_err(|_| WireError::Price(raw.mark_price.clone()))?;
        let ts = DateTime::from_timestamp_millis(raw.event_time)
            .ok_or(WireError::Timestamp(raw.event_time))?;
        return Ok(ParsedMessage::MarkPrice(MarkPriceTick {
            symbol: raw.symbol.to_uppercase(),
            mark_price,
            ts,
        }));
    }

    // Subscribe/unsubscribe responses carry an `id` echo and a null result.
    if value.get("id").is_some() {
        let id = value.get("id").and_then(Value::as_u64);
        return Ok(ParsedMessage::Ack { id });
    }

    Ok(ParsedMessage::Other(value))
}
