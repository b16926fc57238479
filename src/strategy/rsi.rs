//! RSI reverse-trend strategy
//!
//! Buys when the Wilder-smoothed RSI drops below the oversold threshold and
//! sells the whole held quantity when it rises above the overbought
//! threshold. Everything else, including insufficient history, is a Hold.

use async_trait::async_trait;
use tracing::debug;

use crate::api::models::OhlcvBar;
use crate::error::TradingError;
use crate::execution::positions::Position;
use crate::strategy::{Signal, Strategy};

pub struct RsiStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
    /// Notional budget per buy order, in KRW. Quantity is the budget divided
    /// by the latest close, floored, at least one share.
    order_budget: f64,
}

impl RsiStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64, order_budget: f64) -> Self {
        Self {
            period,
            oversold,
            overbought,
            order_budget,
        }
    }

    fn buy_quantity(&self, price: f64) -> i64 {
        ((self.order_budget / price).floor() as i64).max(1)
    }
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self::new(14, 30.0, 70.0, 500_000.0)
    }
}

#[async_trait]
impl Strategy for RsiStrategy {
    async fn generate_signal(
        &self,
        symbol: &str,
        bars: &[OhlcvBar],
        position: Option<&Position>,
    ) -> Result<Signal, TradingError> {
        if bars.len() < self.period + 1 {
            return Ok(Signal::hold(
                symbol,
                format!(
                    "insufficient history: {} bars, need {}",
                    bars.len(),
                    self.period + 1
                ),
            ));
        }

        // Bars arrive newest first; the indicator wants chronological closes.
        let closes: Vec<f64> = bars.iter().rev().map(|bar| bar.close).collect();
        let rsi = match wilder_rsi(&closes, self.period) {
            Some(rsi) => rsi,
            None => {
                return Err(TradingError::Strategy(format!(
                    "RSI undefined for {symbol} over {} closes",
                    closes.len()
                )))
            }
        };
        let current_price = bars[0].close;
        debug!(symbol, rsi, current_price, "indicator evaluated");

        if rsi < self.oversold {
            let quantity = self.buy_quantity(current_price);
            return Ok(Signal::buy(
                symbol,
                quantity,
                format!("RSI oversold ({rsi:.1} < {:.0})", self.oversold),
            )
            .with_metadata("rsi", rsi)
            .with_metadata("current_price", current_price));
        }

        if rsi > self.overbought {
            let held = position.map(|p| p.quantity).unwrap_or(0);
            if held > 0 {
                return Ok(Signal::sell(
                    symbol,
                    held,
                    format!("RSI overbought ({rsi:.1} > {:.0})", self.overbought),
                )
                .with_metadata("rsi", rsi)
                .with_metadata("current_price", current_price));
            }
            return Ok(Signal::hold(
                symbol,
                format!("RSI overbought ({rsi:.1}) but nothing held"),
            ));
        }

        Ok(Signal::hold(symbol, format!("RSI neutral ({rsi:.1})")))
    }
}

/// Wilder-smoothed RSI over chronologically ordered closes. Returns None when
/// fewer than `period + 1` closes are available.
fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in closes[..=period].windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    for pair in closes[period..].windows(2) {
        let delta = pair[1] - pair[0];
        let (gain, loss) = if delta > 0.0 {
            (delta, 0.0)
        } else {
            (0.0, -delta)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
