//! Profit and cost calculations for arbitrage opportunities.

use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::market::Market;
use crate::orderbook::FillQuote;

/// A pair of fills whose combined worst price clears the threshold.
///
/// Immutable once built; consumed by exactly one execution attempt.
#[derive(Debug, Clone)]
pub struct ArbitrageOpportunity {
    pub market: Market,
    /// UP limit price: the worst level the fill reaches.
    pub up_price: Decimal,
    /// DOWN limit price: the worst level the fill reaches.
    pub down_price: Decimal,
    /// `up_price + down_price`.
    pub total_cost: Decimal,
    /// `1 - total_cost`, locked in per share pair.
    pub profit_per_share: Decimal,
    pub profit_pct: Decimal,
    /// Shares bought on each leg.
    pub order_size: Decimal,
    pub total_investment: Decimal,
    /// One outcome settles at $1, so the payout equals the share count.
    pub expected_payout: Decimal,
    pub expected_profit: Decimal,
    pub best_ask_up: Decimal,
    pub best_ask_down: Decimal,
    pub vwap_up: Option<Decimal>,
    pub vwap_down: Option<Decimal>,
    pub detected_at: OffsetDateTime,
}

impl ArbitrageOpportunity {
    /// Expected profit over investment, in percent.
    pub fn roi(&self) -> Decimal {
        if self.total_investment.is_zero() {
            return Decimal::ZERO;
        }
        self.expected_profit / self.total_investment * Decimal::ONE_HUNDRED
    }

    /// Cash that must be available before submitting, with `margin` headroom.
    pub fn required_balance(&self, margin: Decimal) -> Decimal {
        self.total_investment * margin
    }
}

/// Price a pair from two complete fill quotes.
///
/// The pair qualifies when `up.worst + down.worst <= threshold`; anything
/// above is `None`.
pub fn calculate_opportunity(
    market: &Market,
    up_fill: &FillQuote,
    down_fill: &FillQuote,
    target_size: Decimal,
    threshold: Decimal,
) -> Option<ArbitrageOpportunity> {
    let (up_price, down_price) = (up_fill.worst_price, down_fill.worst_price);
    let total_cost = up_price + down_price;
    if total_cost > threshold {
        return None;
    }

    let profit_per_share = Decimal::ONE - total_cost;
    let profit_pct = if total_cost > Decimal::ZERO {
        profit_per_share / total_cost * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };
    let total_investment = total_cost * target_size;

    Some(ArbitrageOpportunity {
        market: market.clone(),
        up_price,
        down_price,
        total_cost,
        profit_per_share,
        profit_pct,
        order_size: target_size,
        total_investment,
        expected_payout: target_size,
        expected_profit: target_size - total_investment,
        best_ask_up: up_fill.best_price,
        best_ask_down: down_fill.best_price,
        vwap_up: up_fill.volume_weighted_price,
        vwap_down: down_fill.volume_weighted_price,
        detected_at: OffsetDateTime::now_utc(),
    })
}
