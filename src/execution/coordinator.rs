//! Order Execution Coordinator
//!
//! Turns one trading signal into zero-or-one submitted order:
//! risk validation, submission, cache update, persistence, notification.
//!
//! Terminal states per signal are Filled, Rejected, Skipped, and Failed. At
//! most one order per symbol is in flight at a time; a second signal for the
//! same symbol is skipped, never queued. A submission timeout is an unknown
//! outcome resolved by polling order status — resubmitting could duplicate a
//! fill that already happened.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::api::models::{Order, OrderRequest, OrderResponse, OrderSide, OrderStatus};
use crate::api::BrokerApi;
use crate::error::ApiError;
use crate::execution::positions::{Position, PositionCache};
use crate::execution::risk::{RiskDecision, RiskGate};
use crate::notify::{Notifier, NotifyEvent};
use crate::storage::Repository;
use crate::strategy::{Signal, SignalKind};

/// Terminal outcome of one signal execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Filled,
    Rejected,
    Skipped,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filled => write!(f, "FILLED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of executing one signal.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub symbol: String,
    pub status: ExecutionStatus,
    pub reason: String,
    /// Absent for skips that never created an order
    pub order: Option<Order>,
}

/// Bounds for resolving an unknown submission outcome by status polling.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Removes the symbol from the in-flight set when the execution attempt
/// finishes, whatever the outcome.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    symbol: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight set lock poisoned")
            .remove(&self.symbol);
    }
}

pub struct OrderCoordinator {
    gateway: Arc<dyn BrokerApi>,
    positions: Arc<PositionCache>,
    risk: RiskGate,
    repository: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    in_flight: Mutex<HashSet<String>>,
    account_number: String,
    dry_run: bool,
    poll: PollPolicy,
}

impl OrderCoordinator {
    pub fn new(
        gateway: Arc<dyn BrokerApi>,
        positions: Arc<PositionCache>,
        risk: RiskGate,
        repository: Arc<dyn Repository>,
        notifier: Arc<dyn Notifier>,
        account_number: String,
        dry_run: bool,
    ) -> Self {
        Self {
            gateway,
            positions,
            risk,
            repository,
            notifier,
            in_flight: Mutex::new(HashSet::new()),
            account_number,
            dry_run,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Execute one signal to a terminal state.
    pub async fn execute(&self, signal: Signal) -> ExecutionReport {
        if signal.kind == SignalKind::Hold {
            debug!(symbol = %signal.symbol, reason = %signal.reason, "hold signal, nothing to do");
            return ExecutionReport {
                symbol: signal.symbol,
                status: ExecutionStatus::Skipped,
                reason: signal.reason,
                order: None,
            };
        }

        // One in-flight order per symbol. A competing signal is skipped,
        // never queued behind the running one.
        let _guard = match self.claim(&signal.symbol) {
            Some(guard) => guard,
            None => {
                info!(symbol = %signal.symbol, "skipping signal, order already in flight");
                let report = ExecutionReport {
                    symbol: signal.symbol,
                    status: ExecutionStatus::Skipped,
                    reason: "order already in flight".to_string(),
                    order: None,
                };
                self.notifier
                    .notify(NotifyEvent::Execution(report.clone()))
                    .await;
                return report;
            }
        };

        // Risk validation against the live cache state.
        let position = self.positions.get(&signal.symbol);
        let aggregate_exposure = self.positions.total_exposure();
        if let RiskDecision::Reject(reason) =
            self.risk
                .validate(&signal, position.as_ref(), aggregate_exposure)
        {
            warn!(symbol = %signal.symbol, %reason, "risk gate rejected signal");
            let mut order = Order::new(
                &signal.symbol,
                side_of(&signal),
                signal.quantity,
                signal.limit_price,
            );
            order.transition(OrderStatus::Rejected, reason.clone());
            self.persist_order(&order).await;
            return self
                .finish(ExecutionStatus::Rejected, reason, Some(order))
                .await;
        }

        // Submission.
        let mut order = Order::new(
            &signal.symbol,
            side_of(&signal),
            signal.quantity,
            signal.limit_price,
        );
        self.persist_order(&order).await;

        let request = OrderRequest {
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.price,
            account_number: self.account_number.clone(),
            client_order_id: order.correlation_id,
        };

        let submission = if self.dry_run {
            info!(
                symbol = %request.symbol,
                side = %request.side,
                quantity = request.quantity,
                "[dry-run] order filled locally, not submitted"
            );
            Ok(self.dry_run_fill(&request, &signal))
        } else {
            self.gateway.place_order(&request).await
        };

        match submission {
            Ok(response) => self.handle_response(order, response, &signal).await,
            Err(ApiError::Rejected(reason)) => {
                order.transition(OrderStatus::Rejected, reason.clone());
                self.persist_order(&order).await;
                self.finish(ExecutionStatus::Rejected, reason, Some(order))
                    .await
            }
            Err(ApiError::UnknownOutcome(detail)) => {
                self.resolve_unknown(order, &signal, detail).await
            }
            Err(err) => {
                // Retry budget already spent inside the gateway.
                let reason = format!("submission failed: {err}");
                order.transition(OrderStatus::FailedUnknown, reason.clone());
                self.persist_order(&order).await;
                self.finish(ExecutionStatus::Failed, reason, Some(order))
                    .await
            }
        }
    }

    /// Apply a broker response: fills update the cache optimistically and
    /// are persisted together with the resulting position.
    async fn handle_response(
        &self,
        mut order: Order,
        response: OrderResponse,
        signal: &Signal,
    ) -> ExecutionReport {
        order.apply_response(&response);

        match response.status {
            OrderStatus::Rejected => {
                let reason = "rejected by broker".to_string();
                order.reason = reason.clone();
                self.persist_order(&order).await;
                self.finish(ExecutionStatus::Rejected, reason, Some(order))
                    .await
            }
            OrderStatus::FailedUnknown => {
                let reason = "broker reported unknown outcome".to_string();
                order.reason = reason.clone();
                self.persist_order(&order).await;
                self.finish(ExecutionStatus::Failed, reason, Some(order))
                    .await
            }
            // Accepted and pending market orders are treated as filled at
            // the estimated price until reconciliation corrects the cache.
            OrderStatus::Accepted
            | OrderStatus::Pending
            | OrderStatus::Filled
            | OrderStatus::PartiallyFilled => {
                self.apply_fill(&mut order, signal).await;
                let reason = format!("order {}", order.status);
                order.reason = reason.clone();
                self.persist_order(&order).await;
                self.finish(ExecutionStatus::Filled, reason, Some(order))
                    .await
            }
        }
    }

    /// Resolve a timed-out submission by polling order status with bounded
    /// attempts and backoff. Exhaustion marks the order for manual
    /// reconciliation instead of silently dropping it.
    async fn resolve_unknown(
        &self,
        mut order: Order,
        signal: &Signal,
        detail: String,
    ) -> ExecutionReport {
        warn!(
            symbol = %order.symbol,
            correlation_id = %order.correlation_id,
            %detail,
            "submission outcome unknown, polling order status"
        );
        order.transition(OrderStatus::FailedUnknown, detail);
        self.persist_order(&order).await;

        let correlation_id = order.correlation_id.to_string();
        let mut backoff = self.poll.initial_backoff;

        for attempt in 1..=self.poll.max_attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.poll.max_backoff);

            match self.gateway.order_status(&correlation_id).await {
                Ok(response) if response.status.has_fill() => {
                    info!(
                        symbol = %order.symbol,
                        attempt,
                        status = %response.status,
                        "unknown outcome resolved to a fill"
                    );
                    order.apply_response(&response);
                    self.apply_fill(&mut order, signal).await;
                    let reason = format!("resolved to {} after status poll", order.status);
                    order.reason = reason.clone();
                    self.persist_order(&order).await;
                    return self
                        .finish(ExecutionStatus::Filled, reason, Some(order))
                        .await;
                }
                Ok(response) if response.status == OrderStatus::Rejected => {
                    order.apply_response(&response);
                    let reason = "resolved to rejection after status poll".to_string();
                    order.reason = reason.clone();
                    self.persist_order(&order).await;
                    return self
                        .finish(ExecutionStatus::Rejected, reason, Some(order))
                        .await;
                }
                Ok(response) => {
                    debug!(attempt, status = %response.status, "order not terminal yet");
                }
                Err(err) => {
                    debug!(attempt, %err, "status poll failed");
                }
            }
        }

        let reason = "unresolved submission outcome, manual reconciliation required".to_string();
        order.transition(OrderStatus::FailedUnknown, reason.clone());
        order.manual_reconciliation_required = true;
        self.persist_order(&order).await;
        error!(
            symbol = %order.symbol,
            correlation_id = %order.correlation_id,
            "order outcome still unknown after polling, flagged for manual reconciliation"
        );
        self.finish(ExecutionStatus::Failed, reason, Some(order))
            .await
    }

    /// Update the cache with the confirmed fill and persist it.
    async fn apply_fill(&self, order: &mut Order, signal: &Signal) {
        let quantity = if order.filled_quantity > 0 {
            order.filled_quantity
        } else {
            order.quantity
        };
        let price = order.filled_price.or_else(|| signal.price_estimate());

        match price {
            Some(price) => {
                self.positions
                    .apply_fill(&order.symbol, order.side, quantity, price);
                order.filled_quantity = quantity;
                order.filled_price = Some(price);
            }
            None => {
                warn!(
                    symbol = %order.symbol,
                    "fill confirmed without any usable price, cache left untouched"
                );
            }
        }

        let position = self
            .positions
            .get(&order.symbol)
            .unwrap_or_else(|| Position {
                symbol: order.symbol.clone(),
                quantity: 0,
                avg_price: 0.0,
                market_value: 0.0,
                last_synced: chrono::Utc::now(),
            });
        if let Err(err) = self.repository.save_fill(order, &position).await {
            error!(correlation_id = %order.correlation_id, %err, "failed to persist fill");
        }
    }

    async fn finish(
        &self,
        status: ExecutionStatus,
        reason: String,
        order: Option<Order>,
    ) -> ExecutionReport {
        let symbol = order
            .as_ref()
            .map(|o| o.symbol.clone())
            .unwrap_or_default();
        let report = ExecutionReport {
            symbol,
            status,
            reason,
            order,
        };
        self.notifier
            .notify(NotifyEvent::Execution(report.clone()))
            .await;
        report
    }

    async fn persist_order(&self, order: &Order) {
        if let Err(err) = self.repository.save_order(order).await {
            error!(correlation_id = %order.correlation_id, %err, "failed to persist order");
        }
    }

    fn claim(&self, symbol: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().expect("in-flight set lock poisoned");
        if !set.insert(symbol.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            symbol: symbol.to_string(),
        })
    }

    /// Synthesized fill for paper trading, mirroring a broker FILLED
    /// response at the signal's estimated price.
    fn dry_run_fill(&self, request: &OrderRequest, signal: &Signal) -> OrderResponse {
        let price = signal.price_estimate().unwrap_or(1.0);
        OrderResponse {
            order_id: format!("DRY-{}", &request.client_order_id.to_string()[..8]),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            filled_price: Some(price),
        }
    }
}

fn side_of(signal: &Signal) -> OrderSide {
    match signal.kind {
        SignalKind::Sell => OrderSide::Sell,
        // Hold never reaches order creation.
        _ => OrderSide::Buy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{AccountBalance, Holding, OhlcvBar};
    use crate::config::RiskLimits;
    use crate::storage::MemoryRepository;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    enum SubmitBehavior {
        Fill(f64),
        Reject(String),
        Timeout,
    }

    enum StatusBehavior {
        Unreachable,
        Pending,
        Filled(f64),
    }

    struct MockGateway {
        submit: AsyncMutex<VecDeque<SubmitBehavior>>,
        statuses: AsyncMutex<VecDeque<StatusBehavior>>,
        submissions: AtomicUsize,
        status_polls: AtomicUsize,
        submit_delay: Duration,
        last_request: AsyncMutex<Option<OrderRequest>>,
    }

    impl MockGateway {
        fn new(submit: Vec<SubmitBehavior>, statuses: Vec<StatusBehavior>) -> Self {
            Self {
                submit: AsyncMutex::new(submit.into()),
                statuses: AsyncMutex::new(statuses.into()),
                submissions: AtomicUsize::new(0),
                status_polls: AtomicUsize::new(0),
                submit_delay: Duration::ZERO,
                last_request: AsyncMutex::new(None),
            }
        }

        fn with_submit_delay(mut self, delay: Duration) -> Self {
            self.submit_delay = delay;
            self
        }

        fn response_from(request: &OrderRequest, status: OrderStatus, price: f64) -> OrderResponse {
            OrderResponse {
                order_id: "KW-1".to_string(),
                symbol: request.symbol.clone(),
                side: request.side,
                order_type: request.order_type,
                quantity: request.quantity,
                price: request.price,
                status,
                filled_quantity: if status.has_fill() { request.quantity } else { 0 },
                filled_price: if status.has_fill() { Some(price) } else { None },
            }
        }
    }

    #[async_trait::async_trait]
    impl BrokerApi for MockGateway {
        async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, ApiError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().await = Some(request.clone());
            if !self.submit_delay.is_zero() {
                tokio::time::sleep(self.submit_delay).await;
            }
            match self.submit.lock().await.pop_front() {
                Some(SubmitBehavior::Fill(price)) => {
                    Ok(Self::response_from(request, OrderStatus::Filled, price))
                }
                Some(SubmitBehavior::Reject(reason)) => Err(ApiError::Rejected(reason)),
                Some(SubmitBehavior::Timeout) => {
                    Err(ApiError::UnknownOutcome("submission timed out".into()))
                }
                None => panic!("unexpected submission"),
            }
        }

        async fn order_status(&self, _order_id: &str) -> Result<OrderResponse, ApiError> {
            self.status_polls.fetch_add(1, Ordering::SeqCst);
            let request = self
                .last_request
                .lock()
                .await
                .clone()
                .expect("status poll before submission");
            match self.statuses.lock().await.pop_front() {
                Some(StatusBehavior::Filled(price)) => {
                    Ok(Self::response_from(&request, OrderStatus::Filled, price))
                }
                Some(StatusBehavior::Pending) => {
                    Ok(Self::response_from(&request, OrderStatus::Pending, 0.0))
                }
                Some(StatusBehavior::Unreachable) | None => {
                    Err(ApiError::Transient("status endpoint unreachable".into()))
                }
            }
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn fetch_holdings(&self) -> Result<Vec<Holding>, ApiError> {
            Ok(Vec::new())
        }

        async fn fetch_bars(&self, _symbol: &str, _count: usize) -> Result<Vec<OhlcvBar>, ApiError> {
            Ok(Vec::new())
        }

        async fn account_balance(&self) -> Result<AccountBalance, ApiError> {
            Err(ApiError::Transient("not implemented".into()))
        }
    }

    struct Harness {
        gateway: Arc<MockGateway>,
        positions: Arc<PositionCache>,
        repository: Arc<MemoryRepository>,
        coordinator: OrderCoordinator,
    }

    fn harness(gateway: MockGateway, dry_run: bool) -> Harness {
        let gateway = Arc::new(gateway);
        let positions = Arc::new(PositionCache::new());
        let repository = Arc::new(MemoryRepository::new());
        let coordinator = OrderCoordinator::new(
            Arc::clone(&gateway) as Arc<dyn BrokerApi>,
            Arc::clone(&positions),
            RiskGate::new(RiskLimits::default()),
            Arc::clone(&repository) as Arc<dyn Repository>,
            Arc::new(crate::notify::LogNotifier),
            "12345678".to_string(),
            dry_run,
        )
        .with_poll_policy(PollPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        });
        Harness {
            gateway,
            positions,
            repository,
            coordinator,
        }
    }

    fn buy_signal(quantity: i64, price: f64) -> Signal {
        Signal::buy("005930", quantity, "test buy").with_metadata("current_price", price)
    }

    #[tokio::test]
    async fn test_hold_signal_is_skipped_without_submission() {
        let h = harness(MockGateway::new(vec![], vec![]), false);
        let report = h.coordinator.execute(Signal::hold("005930", "neutral")).await;

        assert_eq!(report.status, ExecutionStatus::Skipped);
        assert_eq!(h.gateway.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(h.repository.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_risk_rejection_blocks_submission() {
        let h = harness(MockGateway::new(vec![], vec![]), false);
        // 20 x 70,000 = 1.4M against the 1M per-symbol default.
        let report = h.coordinator.execute(buy_signal(20, 70_000.0)).await;

        assert_eq!(report.status, ExecutionStatus::Rejected);
        assert!(report.reason.starts_with("per-symbol limit exceeded"));
        assert_eq!(h.gateway.submissions.load(Ordering::SeqCst), 0);
        // The rejection is still persisted for the audit trail.
        assert_eq!(h.repository.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_fill_updates_cache_and_persists() {
        let h = harness(
            MockGateway::new(vec![SubmitBehavior::Fill(70_000.0)], vec![]),
            false,
        );
        let report = h.coordinator.execute(buy_signal(10, 70_000.0)).await;

        assert_eq!(report.status, ExecutionStatus::Filled);
        let position = h.positions.get("005930").unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(h.repository.fill_count().await, 1);

        let order = report.order.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, 10);
    }

    #[tokio::test]
    async fn test_broker_rejection_is_terminal() {
        let h = harness(
            MockGateway::new(
                vec![SubmitBehavior::Reject("insufficient funds".into())],
                vec![],
            ),
            false,
        );
        let report = h.coordinator.execute(buy_signal(10, 70_000.0)).await;

        assert_eq!(report.status, ExecutionStatus::Rejected);
        assert_eq!(h.gateway.submissions.load(Ordering::SeqCst), 1);
        assert!(h.positions.get("005930").is_none());
        assert_eq!(report.order.unwrap().status, OrderStatus::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_to_fill_via_status_poll() {
        let h = harness(
            MockGateway::new(
                vec![SubmitBehavior::Timeout],
                vec![StatusBehavior::Pending, StatusBehavior::Filled(70_500.0)],
            ),
            false,
        );
        let report = h.coordinator.execute(buy_signal(10, 70_000.0)).await;

        assert_eq!(report.status, ExecutionStatus::Filled);
        assert_eq!(h.gateway.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(h.gateway.status_polls.load(Ordering::SeqCst), 2);

        // Exactly one fill applied.
        let position = h.positions.get("005930").unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(position.avg_price, 70_500.0);
        assert_eq!(h.repository.fill_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_timeout_flags_manual_reconciliation() {
        let h = harness(
            MockGateway::new(
                vec![SubmitBehavior::Timeout],
                vec![
                    StatusBehavior::Unreachable,
                    StatusBehavior::Pending,
                    StatusBehavior::Unreachable,
                ],
            ),
            false,
        );
        let report = h.coordinator.execute(buy_signal(10, 70_000.0)).await;

        assert_eq!(report.status, ExecutionStatus::Failed);
        let order = report.order.unwrap();
        assert_eq!(order.status, OrderStatus::FailedUnknown);
        assert!(order.manual_reconciliation_required);
        // Nothing was optimistically applied for an unconfirmed order.
        assert!(h.positions.get("005930").is_none());

        let stored = h.repository.order(&order.correlation_id).await.unwrap();
        assert!(stored.manual_reconciliation_required);
    }

    #[tokio::test]
    async fn test_concurrent_signals_for_same_symbol_submit_once() {
        let h = harness(
            MockGateway::new(vec![SubmitBehavior::Fill(70_000.0)], vec![])
                .with_submit_delay(Duration::from_millis(50)),
            false,
        );

        let (first, second) = tokio::join!(
            h.coordinator.execute(buy_signal(5, 70_000.0)),
            h.coordinator.execute(buy_signal(5, 70_000.0)),
        );

        assert_eq!(h.gateway.submissions.load(Ordering::SeqCst), 1);
        let mut statuses = [first.status, second.status];
        statuses.sort_by_key(|s| format!("{s}"));
        assert_eq!(statuses, [ExecutionStatus::Filled, ExecutionStatus::Skipped]);

        let skipped = if first.status == ExecutionStatus::Skipped {
            &first
        } else {
            &second
        };
        assert_eq!(skipped.reason, "order already in flight");
    }

    #[tokio::test]
    async fn test_dry_run_fills_locally_without_gateway() {
        let h = harness(MockGateway::new(vec![], vec![]), true);
        let report = h.coordinator.execute(buy_signal(10, 70_000.0)).await;

        assert_eq!(report.status, ExecutionStatus::Filled);
        assert_eq!(h.gateway.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(h.positions.get("005930").unwrap().quantity, 10);

        let order = report.order.unwrap();
        assert!(order.broker_order_id.unwrap().starts_with("DRY-"));
    }

    #[tokio::test]
    async fn test_sell_without_holding_rejected_before_submission() {
        let h = harness(MockGateway::new(vec![], vec![]), false);
        let report = h
            .coordinator
            .execute(Signal::sell("005930", 5, "take profit"))
            .await;

        assert_eq!(report.status, ExecutionStatus::Rejected);
        assert!(report.reason.starts_with("sell exceeds held quantity"));
        assert_eq!(h.gateway.submissions.load(Ordering::SeqCst), 0);
    }
}
