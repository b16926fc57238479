//! Trading engine
//!
//! Drives one execution cycle over the tracked symbols: reconcile the
//! position cache when stale, then for each symbol fetch bars, ask the
//! strategy for a signal, and hand it to the coordinator. Symbols are
//! processed with bounded concurrency and one symbol's failure never aborts
//! the rest of the cycle.

use std::sync::Arc;

use chrono::Duration;
use futures::{stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::api::BrokerApi;
use crate::error::TradingError;
use crate::execution::coordinator::{ExecutionReport, ExecutionStatus, OrderCoordinator};
use crate::execution::positions::PositionCache;
use crate::notify::{Notifier, NotifyEvent};
use crate::strategy::{SignalKind, Strategy};

/// Daily bars handed to the strategy each evaluation.
const BAR_HISTORY: usize = 60;

pub struct TradingEngine {
    gateway: Arc<dyn BrokerApi>,
    strategy: Arc<dyn Strategy>,
    coordinator: Arc<OrderCoordinator>,
    positions: Arc<PositionCache>,
    notifier: Arc<dyn Notifier>,
    symbols: Vec<String>,
    max_concurrent_symbols: usize,
    position_staleness: Duration,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn BrokerApi>,
        strategy: Arc<dyn Strategy>,
        coordinator: Arc<OrderCoordinator>,
        positions: Arc<PositionCache>,
        notifier: Arc<dyn Notifier>,
        symbols: Vec<String>,
        max_concurrent_symbols: usize,
        position_staleness: Duration,
    ) -> Self {
        Self {
            gateway,
            strategy,
            coordinator,
            positions,
            notifier,
            symbols,
            max_concurrent_symbols,
            position_staleness,
        }
    }

    /// One full cycle over the tracked symbols. Per-symbol failures are
    /// logged and notified, never propagated.
    pub async fn run_cycle(&self) {
        if let Err(err) = self.sync_positions_if_stale().await {
            // Risk checks still run against the last good snapshot.
            warn!(%err, "position reconciliation failed, continuing with cached state");
        }

        stream::iter(self.symbols.clone())
            .for_each_concurrent(self.max_concurrent_symbols, |symbol| async move {
                if let Err(err) = self.run_symbol(&symbol).await {
                    error!(%symbol, %err, "symbol cycle failed");
                    self.notifier
                        .notify(NotifyEvent::Error {
                            context: format!("cycle for {symbol}"),
                            message: err.to_string(),
                        })
                        .await;
                }
            })
            .await;
    }

    /// Evaluate and execute a single symbol outside the scheduler, e.g. for
    /// manual runs. Reconciles first so risk checks see fresh state.
    pub async fn run_once(&self, symbol: &str) -> Result<ExecutionReport, TradingError> {
        self.sync_positions_if_stale().await?;
        self.run_symbol(symbol).await
    }

    async fn run_symbol(&self, symbol: &str) -> Result<ExecutionReport, TradingError> {
        let bars = self.gateway.fetch_bars(symbol, BAR_HISTORY).await?;
        let position = self.positions.get(symbol);

        let signal = self
            .strategy
            .generate_signal(symbol, &bars, position.as_ref())
            .await?;
        debug!(%symbol, kind = %signal.kind, reason = %signal.reason, "signal generated");

        if signal.kind != SignalKind::Hold {
            self.notifier
                .notify(NotifyEvent::Signal(signal.clone()))
                .await;
        }

        let report = self.coordinator.execute(signal.clone()).await;
        if report.status == ExecutionStatus::Filled {
            self.strategy.on_order_filled(symbol, &signal).await;
        }
        Ok(report)
    }

    /// Replace the cache with the broker's holdings snapshot.
    pub async fn sync_positions(&self) -> Result<(), TradingError> {
        let holdings = self.gateway.fetch_holdings().await?;
        self.positions.reconcile(&holdings);
        info!(
            positions = holdings.len(),
            exposure = self.positions.total_exposure(),
            "position cache reconciled"
        );
        Ok(())
    }

    async fn sync_positions_if_stale(&self) -> Result<(), TradingError> {
        if self.positions.is_stale(self.position_staleness) {
            self.sync_positions().await?;
        }
        Ok(())
    }

    /// End-of-day account summary notification.
    pub async fn daily_summary(&self) {
        match self.gateway.account_balance().await {
            Ok(balance) => {
                self.notifier
                    .notify(NotifyEvent::DailySummary(balance))
                    .await;
            }
            Err(err) => warn!(%err, "daily summary skipped, balance fetch failed"),
        }
    }
}
