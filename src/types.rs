//! Core value types shared across the pipeline.
//!
//! Everything here is an immutable value: state changes are expressed by
//! building a new record and swapping it into the owning container.

use serde::{Deserialize, Serialize};

use crate::util::now_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Partial,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(OrderStatus::Pending),
            "FILLED" => Some(OrderStatus::Filled),
            "PARTIAL" => Some(OrderStatus::Partial),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REJECTED" => Some(OrderStatus::Rejected),
            "FAILED" => Some(OrderStatus::Failed),
            _ => None,
        }
    }

    /// Terminal non-success states carry an error message on the result.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Fok,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Fok => "fok",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Signals and orders
// ─────────────────────────────────────────────────────────

/// Parser output: an intent to trade `size_usdc` of `token_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub token_id: String,
    pub side: Side,
    pub size_usdc: f64,
    pub reason: String,
    pub generated_at: f64,
}

impl TradeSignal {
    pub fn new(token_id: impl Into<String>, side: Side, size_usdc: f64, reason: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            side,
            size_usdc,
            reason: reason.into(),
            generated_at: now_ts(),
        }
    }
}

/// A concrete order. `client_order_id` is the idempotency key across
/// retries and process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub token_id: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub reason: String,
    pub created_at: f64,
}

impl Order {
    /// Build a FOK order from a parser signal.
    ///
    /// The final quantity is only known after the executor derives a price
    /// from the live book, so the order carries the worst-case share count
    /// (`size_usdc` shares at price 1.0). Cash validation stays conservative.
    pub fn from_signal(signal: &TradeSignal) -> Self {
        Self {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            token_id: signal.token_id.clone(),
            side: signal.side,
            quantity: signal.size_usdc,
            order_type: OrderType::Fok,
            limit_price: None,
            time_in_force: TimeInForce::Fok,
            reason: signal.reason.clone(),
            created_at: now_ts(),
        }
    }
}

/// Normalized outcome of one submission attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_price: f64,
    pub filled_size: f64,
    pub fees_paid: f64,
    pub executed_at: f64,
    pub error_message: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Positions
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
            PositionSide::Flat => "flat",
        }
    }

    pub fn parse(s: &str) -> Option<PositionSide> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            "flat" => Some(PositionSide::Flat),
            _ => None,
        }
    }
}

/// One position per token. `quantity == 0` ⇔ the token is absent from the
/// live ledger (the portfolio deletes closed positions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token_id: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub opened_at: f64,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        let sign = match self.side {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
            PositionSide::Flat => return 0.0,
        };
        sign * self.quantity * (self.current_price - self.avg_entry_price)
    }

    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    /// Same position marked at a new price.
    pub fn with_current_price(&self, price: f64) -> Position {
        Position {
            current_price: price,
            ..self.clone()
        }
    }
}
