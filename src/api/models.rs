//! Kiwoom REST API Data Models
//!
//! Request and response types for the brokerage REST API, plus the local
//! order record the execution pipeline persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Order vocabulary
// ============================================================================

/// Buy/sell side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order pricing type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order lifecycle status. Transitions are driven only by gateway responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Rejected,
    Filled,
    PartiallyFilled,
    /// Submission outcome could not be confirmed within the max wait.
    FailedUnknown,
}

impl OrderStatus {
    /// Whether a fill (full or partial) has been confirmed.
    pub fn has_fill(&self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Filled | Self::FailedUnknown)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Filled => write!(f, "FILLED"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::FailedUnknown => write!(f, "FAILED_UNKNOWN"),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Request body for token issuance
#[derive(Debug, Serialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub appkey: String,
    pub appsecret: String,
}

impl TokenRequest {
    pub fn client_credentials(appkey: &str, appsecret: &str) -> Self {
        Self {
            grant_type: "client_credentials".to_string(),
            appkey: appkey.to_string(),
            appsecret: appsecret.to_string(),
        }
    }
}

/// Response from the token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    pub expires_in: i64,
}

// ============================================================================
// Market data
// ============================================================================

/// One OHLCV bar. The broker returns bars newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Envelope for the OHLCV endpoint
#[derive(Debug, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: Vec<OhlcvBar>,
}

// ============================================================================
// Account
// ============================================================================

/// Account balance summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total_assets: f64,
    pub available_cash: f64,
    pub total_invested: f64,
    pub total_profit_loss: f64,
    pub profit_loss_rate: f64,
}

/// One holding row from the broker's ledger. The authoritative view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub quantity: i64,
    pub avg_price: f64,
    pub current_price: f64,
    pub market_value: f64,
}

/// Envelope for the holdings endpoint
#[derive(Debug, Deserialize)]
pub struct HoldingsResponse {
    #[serde(default)]
    pub positions: Vec<Holding>,
}

// ============================================================================
// Orders
// ============================================================================

/// Order submission request
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub account_number: String,
    /// Locally generated idempotency/correlation identifier. Also the key
    /// for status lookups when the submission outcome is unknown.
    pub client_order_id: Uuid,
}

/// Order state as reported by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<f64>,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_quantity: i64,
    #[serde(default)]
    pub filled_price: Option<f64>,
}

/// Local order record, persisted after every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Locally generated idempotency/correlation identifier
    pub correlation_id: Uuid,
    /// Broker-assigned id, absent until the broker acknowledges
    pub broker_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    /// Limit price; None means market order
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub filled_price: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reason string for the latest transition (audit/notification)
    pub reason: String,
    /// Set when an unknown submission outcome stayed unresolved and a human
    /// must reconcile against the broker ledger.
    pub manual_reconciliation_required: bool,
}

impl Order {
    /// New local order in `Pending` state, not yet submitted.
    pub fn new(symbol: &str, side: OrderSide, quantity: i64, price: Option<f64>) -> Self {
        let now = Utc::now();
        Self {
            correlation_id: Uuid::new_v4(),
            broker_order_id: None,
            symbol: symbol.to_string(),
            side,
            order_type: if price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            quantity,
            price,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            filled_price: None,
            submitted_at: now,
            updated_at: now,
            reason: String::new(),
            manual_reconciliation_required: false,
        }
    }

    /// Apply a broker response to this record.
    pub fn apply_response(&mut self, response: &OrderResponse) {
        self.broker_order_id = Some(response.order_id.clone());
        self.status = response.status;
        self.filled_quantity = response.filled_quantity;
        self.filled_price = response.filled_price;
        self.updated_at = Utc::now();
    }

    /// Move to a terminal status with an audit reason.
    pub fn transition(&mut self, status: OrderStatus, reason: impl Into<String>) {
        self.status = status;
        self.reason = reason.into();
        self.updated_at = Utc::now();
    }
}
