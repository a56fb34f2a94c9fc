//! Paired UP/DOWN arbitrage for Polymarket 15-minute markets.
//!
//! Each instance settles exactly one of its two outcomes at $1.00 per
//! share. When the worst-case cost of buying `order_size` shares of both
//! outcomes is at or below the target pair cost, buying both locks in the
//! difference regardless of the result:
//!
//! ```text
//! UP worst ask:   $0.47
//! DOWN worst ask: $0.50
//! ─────────────────────
//! Pair cost:      $0.97 <= $0.99
//! Profit:         $0.03 per share
//! ```
//!
//! # Modules
//!
//! - [`orderbook`]: L2 book state, fill costing and the streaming feed
//! - [`arbitrage`]: Opportunity detection and paired execution
//! - [`scheduler`]: Polling/streaming scan loop and instance rollover
//! - [`market`]: Market types, exchange boundary and market resolution
//! - [`trading`]: Order types, status normalization and positions
//! - [`session`], [`risk`], [`recorder`]: Engine collaborators
//! - [`api`], [`metrics`]: Status API and Prometheus metrics
//! - [`config`], [`error`], [`signing`], [`utils`]: Ambient plumbing

pub mod api;
pub mod arbitrage;
pub mod config;
pub mod error;
pub mod market;
pub mod metrics;
pub mod orderbook;
pub mod recorder;
pub mod risk;
pub mod scheduler;
pub mod session;
pub mod signing;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
