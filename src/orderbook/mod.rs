//! Order book module for managing market data.
//!
//! This module handles:
//! - The L2 book state machine (snapshots and deltas)
//! - Liquidity-aware fill costing
//! - The streaming feed that keeps books current

pub mod book;
pub mod fill;
pub mod stream;
pub mod types;

pub use book::OrderBook;
pub use fill::{cost_fill, mid_price};
pub use stream::{MarketDataStream, StreamConfig};
pub use types::{BookEventKind, BookSide, BookUpdate, FillQuote, OutcomeBook, PriceLevel};
