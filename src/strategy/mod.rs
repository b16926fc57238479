//! Trading strategies
//!
//! A strategy turns recent bars plus the current position into exactly one
//! [`Signal`] per invocation. Hold is a first-class outcome, never an absent
//! value. The trait has one required operation and two optional lifecycle
//! hooks with no-op defaults.

pub mod rsi;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::models::OhlcvBar;
use crate::error::TradingError;
use crate::execution::positions::Position;

pub use rsi::RsiStrategy;

/// Signal kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Immutable trading signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub symbol: String,
    /// Human-readable reason for the log and notification trail
    pub reason: String,
    /// Order quantity; zero for Hold
    pub quantity: i64,
    /// Limit price; None means market order
    pub limit_price: Option<f64>,
    /// Indicator values and other audit context
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Signal {
    pub fn hold(symbol: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Hold,
            symbol: symbol.to_string(),
            reason: reason.into(),
            quantity: 0,
            limit_price: None,
            metadata: HashMap::new(),
        }
    }

    pub fn buy(symbol: &str, quantity: i64, reason: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Buy,
            symbol: symbol.to_string(),
            reason: reason.into(),
            quantity,
            limit_price: None,
            metadata: HashMap::new(),
        }
    }

    pub fn sell(symbol: &str, quantity: i64, reason: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Sell,
            symbol: symbol.to_string(),
            reason: reason.into(),
            quantity,
            limit_price: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Price used for notional estimates: the limit price, else the current
    /// price a strategy recorded in metadata.
    pub fn price_estimate(&self) -> Option<f64> {
        self.limit_price.or_else(|| {
            self.metadata
                .get("current_price")
                .and_then(|value| value.as_f64())
        })
    }
}

/// Capability interface for signal generation.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Produce exactly one signal for the symbol. Bars arrive newest first.
    async fn generate_signal(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
        position: Option<&Position>,
    ) -> Result<Signal, TradingError>;

    /// Called once at bot startup.
    async fn initialize(&self) -> Result<(), TradingError> {
        Ok(())
    }

    /// Called after a signal from this strategy resulted in a fill.
    async fn on_order_filled(&self, _symbol: &str, _signal: &Signal) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_estimate_prefers_limit_price() {
        let mut signal = Signal::buy("005930", 10, "test").with_metadata("current_price", 70_000.0);
        assert_eq!(signal.price_estimate(), Some(70_000.0));

        signal.limit_price = Some(69_500.0);
        assert_eq!(signal.price_estimate(), Some(69_500.0));
    }

    #[test]
    fn test_hold_carries_zero_quantity() {
        let signal = Signal::hold("005930", "neutral");
        assert_eq!(signal.kind, SignalKind::Hold);
        assert_eq!(signal.quantity, 0);
        assert!(signal.price_estimate().is_none());
    }
}
