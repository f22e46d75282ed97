//! Application configuration
//!
//! Environment-driven with sensible local defaults; every value can be
//! overridden without a config file.

use std::net::SocketAddr;

/// Runtime configuration for the simulator process
#[derive(Debug, Clone)]
pub struct Config {
    /// Exchange WebSocket endpoint for mark-price streams
    pub ws_url: String,
    /// Exchange REST base URL (price fallback)
    pub rest_url: String,
    /// Path to the SQLite database
    pub database_path: String,
    /// HTTP listen address for the API and the event stream
    pub bind_addr: SocketAddr,
    /// Quote asset every traded symbol must end in
    pub quote_asset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "wss://fstream.binance.com/ws".to_string(),
            rest_url: "https://fapi.binance.com".to_string(),
            database_path: "data/paper-perps.db".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8090)),
            quote_asset: "USDT".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("BINANCE_WS_URL") {
            if !v.is_empty() {
                config.ws_url = v;
            }
        }
        if let Ok(v) = std::env::var("BINANCE_REST_URL") {
            if !v.is_empty() {
                config.rest_url = v;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_PATH") {
            if !v.is_empty() {
                config.database_path = v;
            }
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            if let Ok(addr) = v.parse() {
                config.bind_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("QUOTE_ASSET") {
            if !v.is_empty() {
                config.quote_asset = v.to_uppercase();
            }
        }

        config
    }
}
