//! Automated order execution against the Kiwoom REST brokerage API.
//!
//! Pipeline: market-hours scheduler -> trading engine -> strategy signal ->
//! risk gate -> order coordinator -> rate-limited authenticated gateway.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod notify;
pub mod scheduler;
pub mod storage;
pub mod strategy;

pub use config::AppConfig;
pub use engine::TradingEngine;
pub use error::{ApiError, TradingError};
pub use scheduler::{MarketCalendar, TradingScheduler};
