//! L2 order book maintained from snapshots and incremental deltas.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::trace;

use super::types::{BookSide, OutcomeBook, PriceLevel};
use crate::market::Outcome;

/// Price-indexed ladder for one instrument.
///
/// Levels with a non-positive size are never stored. Best prices are read
/// from the ends of the ordered maps, so they cost O(log n).
#[derive(Debug, Clone)]
pub struct OrderBook {
    token_id: String,
    outcome: Outcome,
    /// Bid levels: price -> size.
    bids: BTreeMap<Decimal, Decimal>,
    /// Ask levels: price -> size.
    asks: BTreeMap<Decimal, Decimal>,
    /// Timestamp (ms) of the last applied snapshot or delta.
    last_timestamp_ms: Option<i64>,
    /// Last hash seen, for debugging.
    last_hash: Option<String>,
    /// Malformed entries dropped so far.
    defects: u64,
}

impl OrderBook {
    /// Create an empty book.
    pub fn new(token_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            token_id: token_id.into(),
            outcome,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_timestamp_ms: None,
            last_hash: None,
            defects: 0,
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn last_timestamp_ms(&self) -> Option<i64> {
        self.last_timestamp_ms
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Number of malformed entries dropped.
    pub fn defects(&self) -> u64 {
        self.defects
    }

    /// Count a malformed entry that never made it into the book.
    pub fn record_defect(&mut self) {
        self.defects += 1;
    }

    /// True when both sides are empty (fresh, or stale after a reconnect).
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Replace both sides with a full snapshot.
    ///
    /// Snapshots are always accepted, whatever their timestamp. Entries
    /// with a non-positive price are counted as defects; zero sizes are
    /// simply absent levels.
    pub fn apply_snapshot<B, A>(
        &mut self,
        bids: B,
        asks: A,
        timestamp_ms: Option<i64>,
        hash: Option<String>,
    ) where
        B: IntoIterator<Item = PriceLevel>,
        A: IntoIterator<Item = PriceLevel>,
    {
        self.bids.clear();
        self.asks.clear();

        for level in bids {
            self.insert_snapshot_level(BookSide::Bid, level);
        }
        for level in asks {
            self.insert_snapshot_level(BookSide::Ask, level);
        }

        self.last_timestamp_ms = timestamp_ms;
        self.last_hash = hash;
    }

    fn insert_snapshot_level(&mut self, side: BookSide, level: PriceLevel) {
        if level.price <= Decimal::ZERO || level.size < Decimal::ZERO {
            self.defects += 1;
            return;
        }
        if level.size.is_zero() {
            return;
        }
        self.side_mut(side).insert(level.price, level.size);
    }

    /// Apply one incremental level change.
    ///
    /// A size of zero removes the level. Deltas older than the last applied
    /// update are ignored; equal timestamps are accepted because one batched
    /// message carries several changes under a single timestamp. Returns
    /// whether the delta was applied.
    pub fn apply_delta(
        &mut self,
        side: BookSide,
        price: Decimal,
        size: Decimal,
        timestamp_ms: Option<i64>,
    ) -> bool {
        if price <= Decimal::ZERO || size < Decimal::ZERO {
            self.defects += 1;
            return false;
        }

        if let (Some(ts), Some(last)) = (timestamp_ms, self.last_timestamp_ms) {
            if ts < last {
                trace!(token = %self.token_id, ts, last, "Ignoring stale delta");
                return false;
            }
        }

        let levels = self.side_mut(side);
        if size.is_zero() {
            levels.remove(&price);
        } else {
            levels.insert(price, size);
        }

        if timestamp_ms.is_some() {
            self.last_timestamp_ms = timestamp_ms;
        }
        true
    }

    /// Record the hash carried by the latest message.
    pub fn set_hash(&mut self, hash: Option<String>) {
        if hash.is_some() {
            self.last_hash = hash;
        }
    }

    /// Drop all levels; the book stays subscribed but is stale until the
    /// next snapshot.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_timestamp_ms = None;
        self.last_hash = None;
    }

    /// Highest bid.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &size)| PriceLevel::new(price, size))
    }

    /// Lowest ask.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &size)| PriceLevel::new(price, size))
    }

    /// Bids, best (highest) first.
    pub fn bids(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.bids
            .iter()
            .rev()
            .map(|(&price, &size)| PriceLevel::new(price, size))
    }

    /// Asks, best (lowest) first.
    pub fn asks(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.asks
            .iter()
            .map(|(&price, &size)| PriceLevel::new(price, size))
    }

    /// Depth of one side in price priority. Every call reflects current state.
    pub fn depth(&self, side: BookSide) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        match side {
            BookSide::Bid => Box::new(self.bids()),
            BookSide::Ask => Box::new(self.asks()),
        }
    }

    /// Best bid above best ask.
    pub fn is_inverted(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price > ask.price,
            _ => false,
        }
    }

    /// Materialize into sorted level vectors.
    pub fn to_outcome_book(&self) -> OutcomeBook {
        OutcomeBook {
            token_id: self.token_id.clone(),
            outcome: self.outcome,
            bids: self.bids().collect(),
            asks: self.asks().collect(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn side_mut(&mut self, side: BookSide) -> &mut BTreeMap<Decimal, Decimal> {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    fn seeded() -> OrderBook {
        let mut book = OrderBook::new("up", Outcome::Up);
        book.apply_snapshot(
            vec![level(dec!(0.47), dec!(50)), level(dec!(0.48), dec!(100))],
            vec![level(dec!(0.51), dec!(100)), level(dec!(0.50), dec!(50))],
            Some(1_000),
            Some("h1".to_string()),
        );
        book
    }

    #[test]
    fn snapshot_replaces_state_and_sorts() {
        let mut book = seeded();
        assert_eq!(book.best_bid(), Some(level(dec!(0.48), dec!(100))));
        assert_eq!(book.best_ask(), Some(level(dec!(0.50), dec!(50))));

        book.apply_snapshot(vec![], vec![level(dec!(0.60), dec!(10))], Some(900), None);

        assert_eq!(book.best_bid(), None);
        assert_eq!(book.asks().collect::<Vec<_>>(), vec![level(dec!(0.60), dec!(10))]);
        // Snapshots are accepted even with an older timestamp.
        assert_eq!(book.last_timestamp_ms(), Some(900));
    }

    #[test]
    fn snapshot_drops_zero_and_malformed_levels() {
        let mut book = OrderBook::new("up", Outcome::Up);
        book.apply_snapshot(
            vec![level(dec!(0.40), dec!(0)), level(dec!(0), dec!(5))],
            vec![level(dec!(0.55), dec!(-1)), level(dec!(0.56), dec!(3))],
            None,
            None,
        );

        assert_eq!(book.bids().count(), 0);
        assert_eq!(book.asks().collect::<Vec<_>>(), vec![level(dec!(0.56), dec!(3))]);
        assert_eq!(book.defects(), 2);
    }

    #[test]
    fn delta_inserts_overwrites_and_removes() {
        let mut book = seeded();

        assert!(book.apply_delta(BookSide::Bid, dec!(0.49), dec!(20), Some(1_001)));
        assert_eq!(book.best_bid(), Some(level(dec!(0.49), dec!(20))));

        assert!(book.apply_delta(BookSide::Ask, dec!(0.50), dec!(75), Some(1_002)));
        assert_eq!(book.best_ask(), Some(level(dec!(0.50), dec!(75))));

        assert!(book.apply_delta(BookSide::Ask, dec!(0.50), dec!(0), Some(1_003)));
        assert_eq!(book.best_ask(), Some(level(dec!(0.51), dec!(100))));

        // Removing an absent level is a no-op.
        assert!(book.apply_delta(BookSide::Ask, dec!(0.99), dec!(0), Some(1_004)));
        assert_eq!(book.asks().count(), 1);
    }

    #[test]
    fn delta_is_idempotent() {
        let mut once = seeded();
        once.apply_delta(BookSide::Bid, dec!(0.46), dec!(30), Some(1_001));

        let mut twice = seeded();
        twice.apply_delta(BookSide::Bid, dec!(0.46), dec!(30), Some(1_001));
        twice.apply_delta(BookSide::Bid, dec!(0.46), dec!(30), Some(1_001));

        assert_eq!(once.bids().collect::<Vec<_>>(), twice.bids().collect::<Vec<_>>());
        assert_eq!(once.asks().collect::<Vec<_>>(), twice.asks().collect::<Vec<_>>());
    }

    #[test]
    fn stale_delta_is_ignored() {
        let mut book = seeded();
        assert!(!book.apply_delta(BookSide::Ask, dec!(0.40), dec!(10), Some(999)));
        assert_eq!(book.best_ask(), Some(level(dec!(0.50), dec!(50))));

        // Same timestamp as the snapshot is still applied.
        assert!(book.apply_delta(BookSide::Ask, dec!(0.40), dec!(10), Some(1_000)));
        assert_eq!(book.best_ask(), Some(level(dec!(0.40), dec!(10))));
    }

    #[test]
    fn malformed_delta_counts_defect() {
        let mut book = seeded();
        assert!(!book.apply_delta(BookSide::Bid, dec!(-0.1), dec!(10), None));
        assert!(!book.apply_delta(BookSide::Bid, dec!(0.45), dec!(-3), None));
        assert_eq!(book.defects(), 2);
        assert_eq!(book.bids().count(), 2);
    }

    #[test]
    fn deltas_match_full_ladder_reconstruction() {
        let mut book = OrderBook::new("down", Outcome::Down);
        book.apply_snapshot(vec![], vec![], Some(0), None);

        let deltas = [
            (BookSide::Ask, dec!(0.55), dec!(10)),
            (BookSide::Ask, dec!(0.53), dec!(5)),
            (BookSide::Bid, dec!(0.50), dec!(8)),
            (BookSide::Ask, dec!(0.53), dec!(0)),
            (BookSide::Bid, dec!(0.51), dec!(2)),
            (BookSide::Ask, dec!(0.54), dec!(7)),
            (BookSide::Bid, dec!(0.51), dec!(0)),
        ];

        let mut reference_bids = BTreeMap::new();
        let mut reference_asks = BTreeMap::new();
        for (i, (side, price, size)) in deltas.iter().enumerate() {
            book.apply_delta(*side, *price, *size, Some(i as i64 + 1));
            let target = match side {
                BookSide::Bid => &mut reference_bids,
                BookSide::Ask => &mut reference_asks,
            };
            if size.is_zero() {
                target.remove(price);
            } else {
                target.insert(*price, *size);
            }
        }

        let best_bid = reference_bids.iter().next_back().map(|(p, _)| *p);
        let best_ask = reference_asks.iter().next().map(|(p, _)| *p);
        assert_eq!(book.best_bid().map(|l| l.price), best_bid);
        assert_eq!(book.best_ask().map(|l| l.price), best_ask);
        assert_eq!(best_bid, Some(dec!(0.50)));
        assert_eq!(best_ask, Some(dec!(0.54)));
    }

    #[test]
    fn depth_is_ordered_and_restartable() {
        let mut book = seeded();
        let first: Vec<_> = book.depth(BookSide::Bid).map(|l| l.price).collect();
        assert_eq!(first, vec![dec!(0.48), dec!(0.47)]);

        book.apply_delta(BookSide::Bid, dec!(0.485), dec!(1), None);
        let second: Vec<_> = book.depth(BookSide::Bid).map(|l| l.price).collect();
        assert_eq!(second, vec![dec!(0.485), dec!(0.48), dec!(0.47)]);
    }

    #[test]
    fn inversion_and_clear() {
        let mut book = seeded();
        assert!(!book.is_inverted());
        book.apply_delta(BookSide::Bid, dec!(0.52), dec!(1), None);
        assert!(book.is_inverted());

        book.clear();
        assert!(book.is_empty());
        assert_eq!(book.last_timestamp_ms(), None);
        assert!(!book.is_inverted());
    }

    #[test]
    fn materializes_outcome_book() {
        let book = seeded();
        let outcome = book.to_outcome_book();
        assert_eq!(outcome.token_id, "up");
        assert_eq!(outcome.best_bid(), Some(dec!(0.48)));
        assert_eq!(outcome.best_ask(), Some(dec!(0.50)));
        assert_eq!(outcome.total_ask_liquidity(), dec!(150));
    }
}
