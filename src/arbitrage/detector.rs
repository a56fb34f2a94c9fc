//! Arbitrage opportunity detection.

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use super::calculator::{calculate_opportunity, ArbitrageOpportunity};
use crate::config::Config;
use crate::error::ArbitrageError;
use crate::market::Market;
use crate::orderbook::{cost_fill, OutcomeBook};

/// Scan parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    /// Shares per leg.
    pub order_size: Decimal,
    /// Maximum combined worst price per pair.
    pub threshold: Decimal,
}

impl From<&Config> for ScanParams {
    fn from(config: &Config) -> Self {
        Self {
            order_size: config.order_size,
            threshold: config.target_pair_cost,
        }
    }
}

fn ensure_not_inverted(book: &OutcomeBook) -> Result<(), ArbitrageError> {
    match (book.best_bid(), book.best_ask()) {
        (Some(best_bid), Some(best_ask)) if best_ask < best_bid => {
            warn!(
                side = %book.outcome,
                best_ask = %best_ask,
                best_bid = %best_bid,
                "Order book inverted"
            );
            Err(ArbitrageError::BookInverted {
                side: book.outcome,
                best_ask,
                best_bid,
            })
        }
        _ => Ok(()),
    }
}

/// Check for arbitrage opportunity given order books.
///
/// `Err` means the books were unreliable this cycle; `Ok(None)` means
/// they were fine but either too thin or too expensive.
#[instrument(skip(up_book, down_book, params), fields(market = %market.slug))]
pub fn check_arbitrage(
    market: &Market,
    up_book: &OutcomeBook,
    down_book: &OutcomeBook,
    params: &ScanParams,
) -> Result<Option<ArbitrageOpportunity>, ArbitrageError> {
    if params.order_size <= Decimal::ZERO {
        return Err(ArbitrageError::InvalidSize(params.order_size));
    }

    ensure_not_inverted(up_book)?;
    ensure_not_inverted(down_book)?;

    let up_fill = cost_fill(up_book.asks.iter().copied(), params.order_size);
    let down_fill = cost_fill(down_book.asks.iter().copied(), params.order_size);
    let (Some(up_fill), Some(down_fill)) = (up_fill, down_fill) else {
        debug!(
            up_liquidity = %up_book.total_ask_liquidity(),
            down_liquidity = %down_book.total_ask_liquidity(),
            size = %params.order_size,
            "Insufficient liquidity"
        );
        return Ok(None);
    };

    let opportunity = calculate_opportunity(
        market,
        &up_fill,
        &down_fill,
        params.order_size,
        params.threshold,
    );

    if let Some(ref opp) = opportunity {
        info!(
            total_cost = %opp.total_cost,
            profit_per_share = %opp.profit_per_share,
            profit_pct = %opp.profit_pct,
            "Arbitrage opportunity detected"
        );
    } else {
        debug!(
            fill_total = %(up_fill.worst_price + down_fill.worst_price),
            threshold = %params.threshold,
            "No arbitrage opportunity"
        );
    }

    Ok(opportunity)
}

/// Get diagnostic information about why there's no opportunity.
pub fn diagnose_no_opportunity(
    up_book: &OutcomeBook,
    down_book: &OutcomeBook,
    params: &ScanParams,
) -> NoOpportunityDiagnosis {
    let best_ask_up = up_book.best_ask();
    let best_ask_down = down_book.best_ask();

    let best_total = match (best_ask_up, best_ask_down) {
        (Some(up), Some(down)) => Some(up + down),
        _ => None,
    };

    let up_liquidity = up_book.total_ask_liquidity();
    let down_liquidity = down_book.total_ask_liquidity();
    let has_sufficient_liquidity =
        up_liquidity >= params.order_size && down_liquidity >= params.order_size;

    let up_fill = cost_fill(up_book.asks.iter().copied(), params.order_size);
    let down_fill = cost_fill(down_book.asks.iter().copied(), params.order_size);
    let fill_total = match (up_fill, down_fill) {
        (Some(u), Some(d)) => Some(u.worst_price + d.worst_price),
        _ => None,
    };

    NoOpportunityDiagnosis {
        best_ask_up,
        best_ask_down,
        best_total,
        fill_total,
        threshold: params.threshold,
        up_liquidity,
        down_liquidity,
        has_sufficient_liquidity,
    }
}

/// Diagnostic information for near-miss logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoOpportunityDiagnosis {
    /// Best ask price for UP.
    pub best_ask_up: Option<Decimal>,
    /// Best ask price for DOWN.
    pub best_ask_down: Option<Decimal>,
    /// Sum of best asks.
    pub best_total: Option<Decimal>,
    /// Sum of worst fill prices for target size.
    pub fill_total: Option<Decimal>,
    /// Cost threshold.
    pub threshold: Decimal,
    /// Total ask liquidity for UP.
    pub up_liquidity: Decimal,
    /// Total ask liquidity for DOWN.
    pub down_liquidity: Decimal,
    /// Whether there's enough liquidity for target size.
    pub has_sufficient_liquidity: bool,
}

fn or_na(value: Option<Decimal>) -> String {
    value.map(|d| d.to_string()).unwrap_or_else(|| "N/A".to_string())
}

impl std::fmt::Display for NoOpportunityDiagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UP=${} + DOWN=${} = ${} (threshold=${}) | fill=${} | liq: UP={}, DOWN={}",
            or_na(self.best_ask_up),
            or_na(self.best_ask_down),
            or_na(self.best_total),
            self.threshold,
            or_na(self.fill_total),
            self.up_liquidity,
            self.down_liquidity,
        )
    }
}
