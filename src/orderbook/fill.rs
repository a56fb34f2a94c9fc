//! Liquidity-aware fill costing.

use rust_decimal::Decimal;
use tracing::instrument;

use super::types::{FillQuote, PriceLevel};

/// Cost a buy of `target` shares by walking asks from cheapest up.
///
/// Returns `None` when the levels run out before the target is reached;
/// an under-filled estimate is never returned. `levels` must be in price
/// priority (ascending for asks).
#[instrument(skip(levels), fields(target = %target))]
pub fn cost_fill<I>(levels: I, target: Decimal) -> Option<FillQuote>
where
    I: IntoIterator<Item = PriceLevel>,
{
    if target <= Decimal::ZERO {
        return None;
    }

    let mut filled = Decimal::ZERO;
    let mut total_cost = Decimal::ZERO;
    let mut best_price = None;
    let mut worst_price = Decimal::ZERO;

    for level in levels {
        if filled >= target {
            break;
        }
        if level.size <= Decimal::ZERO {
            continue;
        }

        let take = level.size.min(target - filled);
        total_cost += take * level.price;
        filled += take;
        worst_price = level.price;
        best_price.get_or_insert(level.price);
    }

    if filled < target {
        return None;
    }

    Some(FillQuote {
        filled_quantity: filled,
        total_cost,
        volume_weighted_price: Some(total_cost / filled),
        worst_price,
        best_price: best_price?,
    })
}

/// Mid price from the best bid and ask.
pub fn mid_price(best_bid: Option<Decimal>, best_ask: Option<Decimal>) -> Option<Decimal> {
    match (best_bid, best_ask) {
        (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ladder(levels: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
        levels.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect()
    }

    #[test]
    fn walks_multiple_levels() {
        let asks = ladder(&[(dec!(0.40), dec!(100)), (dec!(0.42), dec!(50))]);

        let quote = cost_fill(asks, dec!(120)).unwrap();

        assert_eq!(quote.filled_quantity, dec!(120));
        assert_eq!(quote.worst_price, dec!(0.42));
        assert_eq!(quote.best_price, dec!(0.40));
        assert_eq!(quote.total_cost, dec!(48.40));
        let vwap = quote.volume_weighted_price.unwrap();
        assert_eq!(vwap.round_dp(4), dec!(0.4033));
    }

    #[test]
    fn insufficient_liquidity_is_none() {
        let asks = ladder(&[(dec!(0.40), dec!(100)), (dec!(0.42), dec!(50))]);
        assert!(cost_fill(asks, dec!(200)).is_none());
    }

    #[test]
    fn single_level_exact_fill() {
        let asks = ladder(&[(dec!(0.48), dec!(5)), (dec!(0.49), dec!(100))]);

        let quote = cost_fill(asks, dec!(5)).unwrap();

        assert_eq!(quote.worst_price, dec!(0.48));
        assert_eq!(quote.volume_weighted_price, Some(dec!(0.48)));
        assert_eq!(quote.total_cost, dec!(2.40));
    }

    #[test]
    fn empty_book_and_bad_target() {
        assert!(cost_fill(Vec::new(), dec!(5)).is_none());
        assert!(cost_fill(ladder(&[(dec!(0.5), dec!(10))]), dec!(0)).is_none());
    }

    #[test]
    fn mid_price_needs_both_sides() {
        assert_eq!(mid_price(Some(dec!(0.48)), Some(dec!(0.52))), Some(dec!(0.50)));
        assert_eq!(mid_price(None, Some(dec!(0.52))), None);
    }
}
