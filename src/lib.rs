//! paper-perps — local paper-trading simulator for perpetual futures
//!
//! Single binary coupling:
//! - **PriceFeed**: resilient WebSocket to the exchange mark-price stream
//! - **TriggerEngine**: per-tick SL/TP evaluation with at-most-once closure
//! - **Store**: SQLite persistence with restart recovery
//! - **Broker**: position operations for the UI
//! - **LiveStream**: SSE fan-out of PnL updates to connected clients
//!
//! No real orders are placed; market fills happen at the latest mark
//! price and funding accrual is not simulated.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod parser;
pub mod rest;
pub mod stream;
pub mod websocket;

pub use api::{create_router, AppState};
pub use config::Config;
pub use engine::broker::Broker;
pub use engine::models::{Position, PositionStatus, Settings, Side};
pub use engine::storage::Store;
pub use engine::{PriceUpdate, TriggerEngine, TriggerExecuted};
pub use error::AppError;
pub use metrics::EngineMetrics;
pub use parser::MarkPriceTick;
pub use rest::ExchangeRest;
pub use websocket::{FeedStatus, PriceFeed};
