//! Kiwoom REST API Integration
//!
//! Everything outbound to the broker passes through this module: the
//! sliding-window rate limiter, bearer-token lifecycle, and the HTTP client
//! with its retry policy.
//!
//! # Components
//!
//! - [`rate_limiter`] - sliding-window TR request limiter
//! - [`auth`] - credential cache with single-flight renewal
//! - [`models`] - request/response data types and the local order record
//! - [`client`] - HTTP client implementing [`BrokerApi`]

pub mod auth;
pub mod client;
pub mod models;
pub mod rate_limiter;

use async_trait::async_trait;

use crate::error::ApiError;
use models::{AccountBalance, Holding, OhlcvBar, OrderRequest, OrderResponse};

/// Gateway operations the execution pipeline depends on.
///
/// The seam between the pipeline and the transport: implemented over HTTP by
/// [`client::KiwoomClient`] and by in-memory mocks in tests.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Submit an order. A timeout here surfaces as
    /// [`ApiError::UnknownOutcome`] and must be reconciled by
    /// [`BrokerApi::order_status`], never by resubmitting.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse, ApiError>;

    /// Look up an order by the client-generated correlation id.
    async fn order_status(&self, order_id: &str) -> Result<OrderResponse, ApiError>;

    /// Cancel a working order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError>;

    /// Current holdings from the broker ledger (the authoritative view).
    async fn fetch_holdings(&self) -> Result<Vec<Holding>, ApiError>;

    /// Recent OHLCV bars for a symbol, newest first.
    async fn fetch_bars(&self, symbol: &str, count: usize) -> Result<Vec<OhlcvBar>, ApiError>;

    /// Account balance summary.
    async fn account_balance(&self) -> Result<AccountBalance, ApiError>;
}

// Re-export commonly used types
pub use auth::{Credential, TokenManager, TokenSource};
pub use client::KiwoomClient;
pub use models::{Order, OrderSide, OrderStatus, OrderType};
pub use rate_limiter::RateLimiter;
