//! Position tracking.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::market::Market;
use crate::utils::decimal_from_json;

/// Position in a single token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    /// Token ID.
    pub token_id: String,
    /// Number of shares owned.
    pub size: Decimal,
    /// Average entry price.
    pub avg_price: Decimal,
}

impl Position {
    /// Calculate the cost basis.
    pub fn cost_basis(&self) -> Decimal {
        self.size * self.avg_price
    }
}

/// Positions for both outcomes in a market.
#[derive(Debug, Clone, Default)]
pub struct MarketPositions {
    /// UP position.
    pub up: Position,
    /// DOWN position.
    pub down: Position,
}

impl MarketPositions {
    /// Pick the two outcome positions of `market` out of a token map.
    pub fn from_map(market: &Market, positions: &HashMap<String, Position>) -> Self {
        let pick = |token_id: &str| {
            positions.get(token_id).cloned().unwrap_or_else(|| Position {
                token_id: token_id.to_string(),
                ..Default::default()
            })
        };

        Self {
            up: pick(&market.up_token_id),
            down: pick(&market.down_token_id),
        }
    }

    /// Get the imbalance (positive = more UP, negative = more DOWN).
    pub fn imbalance(&self) -> Decimal {
        self.up.size - self.down.size
    }

    /// Guaranteed payout at settlement: one dollar per matched pair.
    pub fn expected_payout(&self) -> Decimal {
        self.up.size.min(self.down.size)
    }

    /// Guaranteed profit on the matched pairs.
    pub fn expected_profit(&self) -> Decimal {
        let pairs = self.expected_payout();
        pairs - (self.up.avg_price + self.down.avg_price) * pairs
    }
}

/// Position entry from the data API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPosition {
    /// Token ID.
    #[serde(alias = "asset_id", alias = "token_id")]
    pub asset: Option<String>,
    /// Position size.
    #[serde(default)]
    pub size: Value,
    /// Average entry price.
    #[serde(default, alias = "avg_price")]
    #[serde(rename = "avgPrice")]
    pub avg_price: Value,
}

impl ApiPosition {
    /// Convert to Position struct.
    pub fn to_position(&self) -> Option<Position> {
        Some(Position {
            token_id: self.asset.clone()?,
            size: decimal_from_json(&self.size)?,
            avg_price: decimal_from_json(&self.avg_price).unwrap_or(Decimal::ZERO),
        })
    }
}
