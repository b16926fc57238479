//! Risk gate
//!
//! Validates a proposed order against per-symbol and aggregate exposure
//! limits before submission. Pure function of the signal, the cached
//! position, and the read-only limits; checks run in order and the first
//! failure short-circuits with a specific reason string.

use tracing::debug;

use crate::config::RiskLimits;
use crate::execution::positions::Position;
use crate::strategy::{Signal, SignalKind};

/// Outcome of a risk check.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Allow,
    Reject(String),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allow)
    }
}

pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    /// Validate a signal against the limits. `position` is the cached
    /// holding for the signal's symbol; `aggregate_exposure` is the live sum
    /// over all cached positions. Stale-cache uncertainty resolves toward
    /// rejection, never toward permitting an over-limit order.
    pub fn validate(
        &self,
        signal: &Signal,
        position: Option<&Position>,
        aggregate_exposure: f64,
    ) -> RiskDecision {
        match signal.kind {
            SignalKind::Hold => RiskDecision::Allow,
            SignalKind::Buy => self.validate_buy(signal, position, aggregate_exposure),
            SignalKind::Sell => self.validate_sell(signal, position),
        }
    }

    fn validate_buy(
        &self,
        signal: &Signal,
        position: Option<&Position>,
        aggregate_exposure: f64,
    ) -> RiskDecision {
        if signal.quantity <= 0 {
            return RiskDecision::Reject(format!(
                "order quantity must be positive, got {}",
                signal.quantity
            ));
        }

        let price = match signal.price_estimate() {
            Some(price) if price > 0.0 => price,
            // No usable price means the notional cannot be bounded.
            _ => return RiskDecision::Reject("no price available for notional check".into()),
        };
        let order_notional = signal.quantity as f64 * price;

        let held_notional = position.map(Position::notional).unwrap_or(0.0);
        if held_notional + order_notional > self.limits.max_position_notional {
            return RiskDecision::Reject(format!(
                "per-symbol limit exceeded: {} held {:.0} + order {:.0} > limit {:.0}",
                signal.symbol, held_notional, order_notional, self.limits.max_position_notional
            ));
        }

        if aggregate_exposure + order_notional > self.limits.max_total_exposure {
            return RiskDecision::Reject(format!(
                "aggregate exposure limit exceeded: current {:.0} + order {:.0} > limit {:.0}",
                aggregate_exposure, order_notional, self.limits.max_total_exposure
            ));
        }

        debug!(
            symbol = %signal.symbol,
            order_notional,
            held_notional,
            aggregate_exposure,
            "risk checks passed"
        );
        RiskDecision::Allow
    }

    fn validate_sell(&self, signal: &Signal, position: Option<&Position>) -> RiskDecision {
        if signal.quantity <= 0 {
            return RiskDecision::Reject(format!(
                "order quantity must be positive, got {}",
                signal.quantity
            ));
        }

        let held = position.map(|p| p.quantity).unwrap_or(0);
        if signal.quantity > held {
            return RiskDecision::Reject(format!(
                "sell exceeds held quantity: selling {} but holding {}",
                signal.quantity, held
            ));
        }

        RiskDecision::Allow
    }
}
