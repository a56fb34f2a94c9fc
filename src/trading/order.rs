//! Order types and leg state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum Side {
    /// Buy order.
    #[strum(serialize = "BUY")]
    Buy,
    /// Sell order.
    #[strum(serialize = "SELL")]
    Sell,
}

/// Order time-in-force.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum TimeInForce {
    /// Fill-or-kill: must fill entirely or cancel.
    #[default]
    #[strum(serialize = "FOK")]
    FOK,
    /// Fill-and-kill: fill what's available, cancel rest.
    #[strum(serialize = "FAK")]
    FAK,
    /// Good-till-cancelled: stays on book until filled or cancelled.
    #[strum(serialize = "GTC")]
    GTC,
}

/// Order parameters for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderParams {
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Order size.
    pub size: Decimal,
    /// Time-in-force.
    pub tif: TimeInForce,
}

impl OrderParams {
    /// Create a new buy order.
    pub fn buy(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: Side::Buy,
            price,
            size,
            tif: TimeInForce::FOK,
        }
    }

    /// Create a new sell order.
    pub fn sell(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: Side::Sell,
            price,
            size,
            tif: TimeInForce::FOK,
        }
    }

    /// Set time-in-force.
    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.is_empty() {
            return Err("token_id is required".to_string());
        }
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            return Err(format!("price must be in (0, 1), got {}", self.price));
        }
        if self.size <= Decimal::ZERO {
            return Err("size must be positive".to_string());
        }
        Ok(())
    }
}

/// Normalized order status.
///
/// Exchanges report these inconsistently; parsing is case-insensitive and
/// folds the known synonyms. Anything unrecognised is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum OrderStatus {
    /// Accepted and resting or being processed.
    #[strum(
        to_string = "submitted",
        serialize = "live",
        serialize = "open",
        serialize = "pending",
        serialize = "unmatched",
        serialize = "delayed"
    )]
    Submitted,
    /// Some but not all of the size matched.
    #[strum(to_string = "partially_filled", serialize = "partial")]
    PartiallyFilled,
    /// Fully matched.
    #[strum(to_string = "filled", serialize = "matched")]
    Filled,
    /// Order was cancelled.
    #[strum(to_string = "canceled", serialize = "cancelled")]
    Canceled,
    /// Order was rejected.
    #[strum(serialize = "rejected")]
    Rejected,
    /// Order expired.
    #[strum(serialize = "expired")]
    Expired,
    /// Unrecognised status string.
    #[strum(serialize = "unknown")]
    Unknown,
}

impl OrderStatus {
    /// Parse any exchange status string.
    pub fn from_exchange(raw: &str) -> Self {
        raw.trim().parse().unwrap_or(OrderStatus::Unknown)
    }

    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Check if order was filled.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// State of one submitted leg, updated only by polling the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLegState {
    /// Order ID.
    pub order_id: String,
    /// Last observed status.
    pub status: OrderStatus,
    /// Last observed filled quantity.
    pub filled_quantity: Decimal,
    /// Quantity the leg asked for.
    pub requested_quantity: Decimal,
}

impl OrderLegState {
    /// Freshly submitted leg.
    pub fn submitted(order_id: impl Into<String>, requested_quantity: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            status: OrderStatus::Submitted,
            filled_quantity: Decimal::ZERO,
            requested_quantity,
        }
    }

    /// Filled if the exchange says so or the matched size covers the request.
    pub fn is_filled(&self) -> bool {
        self.status.is_filled() || self.filled_quantity >= self.requested_quantity
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.is_filled()
    }
}
