//! Position cache
//!
//! In-memory view of holdings per symbol. Authoritative until the next
//! reconciliation: fills update it optimistically, `reconcile` replaces it
//! with the broker snapshot, and the broker always wins on conflict.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::models::{Holding, OrderSide};

/// One held symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    /// Average cost basis per share
    pub avg_price: f64,
    /// Current valuation; broker-reported after a sync, estimated from the
    /// last fill price between syncs
    pub market_value: f64,
    pub last_synced: DateTime<Utc>,
}

impl Position {
    /// Exposure this position contributes to risk checks.
    pub fn notional(&self) -> f64 {
        self.market_value
    }
}

impl From<&Holding> for Position {
    fn from(holding: &Holding) -> Self {
        Self {
            symbol: holding.symbol.clone(),
            quantity: holding.quantity,
            avg_price: holding.avg_price,
            market_value: holding.market_value,
            last_synced: Utc::now(),
        }
    }
}

#[derive(Default)]
struct CacheState {
    positions: HashMap<String, Position>,
    last_synced: Option<DateTime<Utc>>,
}

/// Shared holdings cache. Lock is never held across an await point; fills
/// and reconciliations serialize through it so neither update is lost, with
/// reconciliation simply overwriting as the newer authoritative value.
#[derive(Default)]
pub struct PositionCache {
    inner: RwLock<CacheState>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.inner
            .read()
            .expect("position cache lock poisoned")
            .positions
            .get(symbol)
            .cloned()
    }

    /// All positions with a nonzero holding.
    pub fn all(&self) -> Vec<Position> {
        self.inner
            .read()
            .expect("position cache lock poisoned")
            .positions
            .values()
            .filter(|p| p.quantity > 0)
            .cloned()
            .collect()
    }

    /// Sum of held notionals, read live for every risk check so no separate
    /// running total can drift.
    pub fn total_exposure(&self) -> f64 {
        self.inner
            .read()
            .expect("position cache lock poisoned")
            .positions
            .values()
            .filter(|p| p.quantity > 0)
            .map(|p| p.market_value)
            .sum()
    }

    /// Optimistic local update right after a confirmed fill. Approximate
    /// until the next reconciliation.
    pub fn apply_fill(&self, symbol: &str, side: OrderSide, quantity: i64, price: f64) {
        let mut state = self.inner.write().expect("position cache lock poisoned");
        let now = Utc::now();

        match side {
            OrderSide::Buy => {
                let position = state
                    .positions
                    .entry(symbol.to_string())
                    .or_insert_with(|| Position {
                        symbol: symbol.to_string(),
                        quantity: 0,
                        avg_price: 0.0,
                        market_value: 0.0,
                        last_synced: now,
                    });
                let old_cost = position.avg_price * position.quantity as f64;
                position.quantity += quantity;
                if position.quantity > 0 {
                    position.avg_price =
                        (old_cost + price * quantity as f64) / position.quantity as f64;
                }
                position.market_value = position.quantity as f64 * price;
                debug!(%symbol, quantity = position.quantity, "buy fill applied to cache");
            }
            OrderSide::Sell => {
                let remove = match state.positions.get_mut(symbol) {
                    Some(position) => {
                        if quantity > position.quantity {
                            warn!(
                                %symbol,
                                held = position.quantity,
                                sold = quantity,
                                "sell fill exceeds cached holding, zeroing position"
                            );
                        }
                        position.quantity -= quantity.min(position.quantity);
                        position.market_value = position.quantity as f64 * price;
                        position.quantity == 0
                    }
                    None => {
                        warn!(%symbol, "sell fill for symbol not in cache, ignoring");
                        false
                    }
                };
                if remove {
                    state.positions.remove(symbol);
                    debug!(%symbol, "position closed, removed from cache");
                }
            }
        }
    }

    /// Replace the cache with the broker snapshot. Symbols absent from the
    /// snapshot are dropped: the remote ledger is the source of truth.
    pub fn reconcile(&self, holdings: &[Holding]) {
        let now = Utc::now();
        let fresh: HashMap<String, Position> = holdings
            .iter()
            .filter(|h| h.quantity > 0)
            .map(|h| (h.symbol.clone(), Position::from(h)))
            .collect();

        let mut state = self.inner.write().expect("position cache lock poisoned");
        for symbol in state.positions.keys() {
            if !fresh.contains_key(symbol) {
                debug!(%symbol, "symbol absent from broker snapshot, dropping");
            }
        }
        state.positions = fresh;
        state.last_synced = Some(now);
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .expect("position cache lock poisoned")
            .last_synced
    }

    /// True when the cache has never synced or the last sync is older than
    /// the freshness threshold.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        match self.last_synced() {
            Some(synced) => Utc::now() - synced > threshold,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(symbol: &str, quantity: i64, avg_price: f64, current_price: f64) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            name: String::new(),
            quantity,
            avg_price,
            current_price,
            market_value: quantity as f64 * current_price,
        }
    }

    #[test]
    fn test_buy_fill_creates_and_averages() {
        let cache = PositionCache::new();

        cache.apply_fill("005930", OrderSide::Buy, 10, 70_000.0);
        let position = cache.get("005930").unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(position.avg_price, 70_000.0);

        cache.apply_fill("005930", OrderSide::Buy, 10, 80_000.0);
        let position = cache.get("005930").unwrap();
        assert_eq!(position.quantity, 20);
        assert_eq!(position.avg_price, 75_000.0);
        assert_eq!(position.market_value, 20.0 * 80_000.0);
    }

    #[test]
    fn test_full_sell_removes_position() {
        let cache = PositionCache::new();
        cache.apply_fill("005930", OrderSide::Buy, 10, 70_000.0);
        cache.apply_fill("005930", OrderSide::Sell, 10, 71_000.0);
        assert!(cache.get("005930").is_none());
        assert_eq!(cache.total_exposure(), 0.0);
    }

    #[test]
    fn test_reconcile_replaces_and_drops_absent_symbols() {
        let cache = PositionCache::new();
        cache.apply_fill("005930", OrderSide::Buy, 10, 70_000.0);
        cache.apply_fill("000660", OrderSide::Buy, 5, 120_000.0);

        cache.reconcile(&[holding("005930", 12, 69_500.0, 70_500.0)]);

        let position = cache.get("005930").unwrap();
        assert_eq!(position.quantity, 12);
        assert_eq!(position.avg_price, 69_500.0);
        // Absent from the snapshot, so the remote view wins and it is gone.
        assert!(cache.get("000660").is_none());
        assert!(cache.last_synced().is_some());
    }

    #[test]
    fn test_fill_then_matching_reconcile_converges() {
        let cache = PositionCache::new();
        cache.apply_fill("005930", OrderSide::Buy, 10, 70_000.0);
        let before = cache.get("005930").unwrap();

        // Broker snapshot agreeing with the optimistic update.
        cache.reconcile(&[holding("005930", 10, 70_000.0, 70_000.0)]);
        let after = cache.get("005930").unwrap();

        assert_eq!(before.quantity, after.quantity);
        assert_eq!(before.avg_price, after.avg_price);
        assert_eq!(before.market_value, after.market_value);
    }

    #[test]
    fn test_staleness() {
        let cache = PositionCache::new();
        assert!(cache.is_stale(Duration::seconds(300)));

        cache.reconcile(&[]);
        assert!(!cache.is_stale(Duration::seconds(300)));
        assert!(cache.is_stale(Duration::seconds(-1)));
    }

    #[test]
    fn test_total_exposure_sums_nonzero_holdings() {
        let cache = PositionCache::new();
        cache.reconcile(&[
            holding("005930", 10, 70_000.0, 70_000.0),
            holding("000660", 5, 120_000.0, 130_000.0),
        ]);
        assert_eq!(cache.total_exposure(), 700_000.0 + 650_000.0);
    }
}
