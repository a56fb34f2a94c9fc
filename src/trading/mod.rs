//! Trading module for order management and execution.
//!
//! This module handles:
//! - Order types and leg state
//! - Order-status normalization and fill polling
//! - Position tracking

pub mod execution;
pub mod order;
pub mod position;

pub use execution::{
    extract_order_id, normalize_order_status, wait_for_fill, OrderStatusReport,
    DEFAULT_ORDER_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
pub use order::{OrderLegState, OrderParams, OrderStatus, Side, TimeInForce};
pub use position::{ApiPosition, MarketPositions, Position};
