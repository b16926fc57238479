//! Persistence contract
//!
//! The pipeline only depends on a CRUD contract: orders are saved after
//! every status transition and fills are saved with the resulting position.
//! Both operations are idempotent on the order's correlation id, so a retry
//! or an unknown-outcome resolution never produces duplicate rows.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::models::Order;
use crate::error::TradingError;
use crate::execution::positions::Position;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Upsert an order keyed by its correlation id.
    async fn save_order(&self, order: &Order) -> Result<(), TradingError>;

    /// Record a fill and the resulting position. Idempotent on the order's
    /// correlation id.
    async fn save_fill(&self, order: &Order, position: &Position) -> Result<(), TradingError>;
}

/// Fill row kept by the in-memory repository.
#[derive(Debug, Clone)]
pub struct FillRecord {
    pub order: Order,
    pub position: Position,
}

/// In-memory repository used by the binary in paper mode and by tests.
#[derive(Default)]
pub struct MemoryRepository {
    orders: Mutex<HashMap<Uuid, Order>>,
    fills: Mutex<HashMap<Uuid, FillRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order(&self, correlation_id: &Uuid) -> Option<Order> {
        self.orders.lock().await.get(correlation_id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.orders.lock().await.len()
    }

    pub async fn fill_count(&self) -> usize {
        self.fills.lock().await.len()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_order(&self, order: &Order) -> Result<(), TradingError> {
        self.orders
            .lock()
            .await
            .insert(order.correlation_id, order.clone());
        Ok(())
    }

    async fn save_fill(&self, order: &Order, position: &Position) -> Result<(), TradingError> {
        self.fills.lock().await.insert(
            order.correlation_id,
            FillRecord {
                order: order.clone(),
                position: position.clone(),
            },
        );
        Ok(())
    }
}
