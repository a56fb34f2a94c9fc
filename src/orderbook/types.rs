//! Order book types and data structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::market::Outcome;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total size available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Side of the book a level belongs to.
///
/// Parses the wire tags used by price-change messages: `BUY` updates bids,
/// `SELL` updates asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum BookSide {
    #[strum(to_string = "bid", serialize = "BUY", serialize = "bids")]
    Bid,
    #[strum(to_string = "ask", serialize = "SELL", serialize = "asks")]
    Ask,
}

/// Materialized L2 book for one outcome.
#[derive(Debug, Clone)]
pub struct OutcomeBook {
    /// Token ID this book represents.
    pub token_id: String,
    /// Which outcome (Up or Down).
    pub outcome: Outcome,
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
    /// When this book was materialized.
    pub updated_at: OffsetDateTime,
}

impl OutcomeBook {
    /// Empty book for a token.
    pub fn empty(token_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            token_id: token_id.into(),
            outcome,
            bids: Vec::new(),
            asks: Vec::new(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Get the best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Get the best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Get size available at best ask.
    pub fn ask_size(&self) -> Decimal {
        self.asks.first().map(|l| l.size).unwrap_or(Decimal::ZERO)
    }

    /// Check if the book is inverted (best_ask < best_bid).
    pub fn is_inverted(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask < bid,
            _ => false,
        }
    }

    /// Get total liquidity on the ask side.
    pub fn total_ask_liquidity(&self) -> Decimal {
        self.asks.iter().map(|l| l.size).sum()
    }
}

/// Cost of filling a target quantity against one side of a book.
///
/// Only produced when the full target can be filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillQuote {
    /// Quantity filled (equals the target).
    pub filled_quantity: Decimal,
    /// Total cost of the fill.
    pub total_cost: Decimal,
    /// Volume-weighted average price, `None` when nothing was filled.
    pub volume_weighted_price: Option<Decimal>,
    /// Price of the last (most expensive) level consumed.
    pub worst_price: Decimal,
    /// Price of the first level consumed.
    pub best_price: Decimal,
}

/// Kind of stream message that changed a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BookEventKind {
    /// Full book snapshot.
    Snapshot,
    /// Incremental price change.
    Delta,
}

/// Book change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookUpdate {
    /// Asset ID that was updated.
    pub asset_id: String,
    /// Type of event.
    pub kind: BookEventKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn book_side_parses_wire_tags() {
        assert_eq!("BUY".parse::<BookSide>().unwrap(), BookSide::Bid);
        assert_eq!("sell".parse::<BookSide>().unwrap(), BookSide::Ask);
        assert!("HOLD".parse::<BookSide>().is_err());
        assert_eq!(BookSide::Bid.to_string(), "bid");
        assert_eq!(BookSide::Ask.to_string(), "ask");
    }

    #[test]
    fn outcome_book_detects_inverted() {
        let mut book = OutcomeBook::empty("test", Outcome::Up);
        book.bids = vec![PriceLevel::new(dec!(0.52), dec!(50))];
        book.asks = vec![PriceLevel::new(dec!(0.50), dec!(50))];
        assert!(book.is_inverted());

        book.bids = vec![PriceLevel::new(dec!(0.48), dec!(50))];
        assert!(!book.is_inverted());
        assert_eq!(book.best_ask(), Some(dec!(0.50)));
        assert_eq!(book.ask_size(), dec!(50));
    }

    #[test]
    fn empty_book_has_no_prices() {
        let book = OutcomeBook::empty("test", Outcome::Down);
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.total_ask_liquidity(), Decimal::ZERO);
        assert!(!book.is_inverted());
    }
}
