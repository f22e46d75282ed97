//! Exchange REST client
//!
//! Used only when no cached tick is available: MARKET entries and the
//! manual-close price fallback. Requests carry a finite timeout; failures
//! surface to the caller and the next request simply retries.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

#[derive(Debug, Clone)]
pub struct ExchangeRest {
    client: reqwest::Client,
    base_url: String,
}

impl ExchangeRest {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch the current price for a symbol
    pub async fn ticker_price(&self, symbol: &str) -> Result<Decimal, AppError> {
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("price request failed: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Upstream(format!("price request rejected: {e}")))?;

        let ticker: TickerPrice = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed price response: {e}")))?;

        Decimal::from_str(&ticker.price)
            .map_err(|_| AppError::Upstream(format!("unparseable price '{}'", ticker.price)))
    }
}
