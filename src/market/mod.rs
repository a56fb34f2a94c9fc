//! Market module for UP/DOWN 15-minute prediction markets.
//!
//! This module handles:
//! - Market types and data structures
//! - Resolving the current and next market instance
//! - The exchange boundary and its Polymarket client
//! - In-memory doubles for testing

pub mod client;
pub mod discovery;
pub mod exchange;
pub mod mock;
pub mod types;

pub use client::PolymarketClient;
pub use discovery::{next_slug, GammaMarketResolver, MarketResolver};
pub use exchange::ExchangeClient;
pub use mock::{MockBookBuilder, MockExchange, MockResolver};
pub use types::{GammaMarket, Market, MarketResult, Outcome};
