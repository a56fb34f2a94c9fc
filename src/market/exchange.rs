//! Exchange boundary used by the scanner and execution engine.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::Outcome;
use crate::error::{MarketError, TradingError};
use crate::orderbook::OutcomeBook;
use crate::trading::{OrderParams, OrderStatusReport, Position};

/// Everything the engine needs from the venue.
///
/// Signing and authentication live entirely behind this trait.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit legs together, returning one result per leg in input order.
    async fn submit_orders(&self, legs: &[OrderParams]) -> Vec<Result<String, TradingError>>;

    /// Current status and filled quantity of an order.
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatusReport, TradingError>;

    /// Cancel orders (best effort; already-terminal orders are not an error).
    async fn cancel_orders(&self, order_ids: &[String]) -> Result<(), TradingError>;

    /// Available collateral balance.
    async fn get_balance(&self) -> Result<Decimal, TradingError>;

    /// Positions keyed by token ID, restricted to `token_ids`.
    async fn get_positions(
        &self,
        token_ids: &[String],
    ) -> Result<HashMap<String, Position>, TradingError>;

    /// One-shot order book fetch.
    async fn get_order_book(
        &self,
        token_id: &str,
        outcome: Outcome,
    ) -> Result<OutcomeBook, MarketError>;
}
