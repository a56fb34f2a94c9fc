//! Error types, one enum per concern.
//!
//! Expected outcomes (no liquidity, no opportunity, cooldown, partial
//! fill) are values elsewhere; the enums here are for real failures and
//! for data-quality abstentions.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::market::Outcome;

/// Top-level error for startup and the binary edge.
#[derive(Error, Debug)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Environment parsed but values are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("market error: {0}")]
    Market(#[from] MarketError),

    #[error("arbitrage error: {0}")]
    Arbitrage(#[from] ArbitrageError),

    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    #[error("market stream error: {0}")]
    Stream(#[from] WsError),

    #[error("trade log error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Market resolution and book fetch failures.
#[derive(Error, Debug)]
pub enum MarketError {
    /// The resolver found no open instance.
    #[error("no active 15min market found")]
    NoActiveMarketFound,

    #[error("failed to fetch market {slug}: {reason}")]
    FetchFailed { slug: String, reason: String },

    #[error("failed to fetch order book for {token_id}: {reason}")]
    BookFetchFailed { token_id: String, reason: String },

    /// Gamma payload or slug could not be interpreted.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Reasons to abstain from scanning a pair of books this cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbitrageError {
    #[error("invalid order size: {0}")]
    InvalidSize(Decimal),

    /// Ask below bid on one outcome; the feed is mid-update or broken.
    #[error("order book inverted for {side}: best_ask={best_ask} < best_bid={best_bid}")]
    BookInverted {
        side: Outcome,
        best_ask: Decimal,
        best_bid: Decimal,
    },
}

/// Failures behind the exchange boundary.
#[derive(Error, Debug)]
pub enum TradingError {
    #[error("order submission failed: {0}")]
    SubmissionFailed(String),

    #[error("failed to cancel orders {order_ids:?}: {reason}")]
    CancelFailed {
        order_ids: Vec<String>,
        reason: String,
    },

    #[error("failed to get order status for {order_id}: {reason}")]
    StatusFailed { order_id: String, reason: String },

    /// Balance or positions could not be read.
    #[error("failed to fetch account data: {0}")]
    AccountFailed(String),

    /// Rejected locally before anything was sent.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    #[error("signing error: {0}")]
    SigningError(String),

    /// Missing or refused credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Market stream transport failures. All of them lead to a reconnect.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("market stream connection failed: {0}")]
    ConnectionFailed(String),

    #[error("market stream closed: code={code:?}, reason={reason}")]
    ConnectionClosed { code: Option<u16>, reason: String },

    #[error("unparseable market stream message: {0}")]
    ParseError(String),

    #[error("failed to send on market stream: {0}")]
    SendFailed(String),

    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Trade log persistence failures.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("trade log io error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("trade log json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result.
pub type Result<T> = std::result::Result<T, BotError>;
