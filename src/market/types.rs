//! Market-related types for 15-minute UP/DOWN prediction markets.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Market outcome for binary UP/DOWN markets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Outcome {
    /// Price goes up (YES token).
    #[strum(to_string = "UP", serialize = "yes")]
    #[default]
    Up,
    /// Price goes down (NO token).
    #[strum(to_string = "DOWN", serialize = "no")]
    Down,
}

impl Outcome {
    /// Get the opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }
}

/// One 15-minute market instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    /// Market slug (e.g., "btc-updown-15m-1765301400").
    pub slug: String,
    /// Unique market identifier.
    pub id: String,
    /// UP (YES) token ID for CLOB.
    pub up_token_id: String,
    /// DOWN (NO) token ID for CLOB.
    pub down_token_id: String,
    /// Unix timestamp when market opened.
    pub start_timestamp: i64,
    /// Unix timestamp when market closes.
    pub end_timestamp: i64,
    /// Market question text.
    pub question: Option<String>,
}

impl Market {
    /// Duration of a 15-minute market in seconds.
    pub const WINDOW_SECONDS: i64 = 900;

    /// Get the token ID for a given outcome.
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Which outcome a token belongs to.
    pub fn outcome_of(&self, token_id: &str) -> Option<Outcome> {
        if token_id == self.up_token_id {
            Some(Outcome::Up)
        } else if token_id == self.down_token_id {
            Some(Outcome::Down)
        } else {
            None
        }
    }

    /// Check if the market is closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed_at(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Check if the market is closed at a given unix time.
    pub fn is_closed_at(&self, now: i64) -> bool {
        now >= self.end_timestamp
    }

    /// Get remaining time until market closes.
    pub fn time_remaining(&self) -> Option<std::time::Duration> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let remaining = self.end_timestamp - now;
        if remaining <= 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(remaining as u64))
        }
    }

    /// Format remaining time as "Xm Ys" string.
    pub fn time_remaining_str(&self) -> String {
        match self.time_remaining() {
            Some(duration) => {
                let secs = duration.as_secs();
                format!("{}m {}s", secs / 60, secs % 60)
            }
            None => "CLOSED".to_string(),
        }
    }
}

/// Settlement view of a closed instance, from its final prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketResult {
    /// UP traded at or above the settlement threshold.
    UpWon,
    /// DOWN traded at or above the settlement threshold.
    DownWon,
    /// Not yet settled; the side with the higher price and that price.
    Leading(Outcome, Decimal),
    /// No prices available.
    Unknown,
}

impl MarketResult {
    /// Price at which a side is considered to have won.
    pub const SETTLED_PRICE: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

    /// Derive the result from final UP/DOWN prices.
    pub fn from_prices(up: Option<Decimal>, down: Option<Decimal>) -> Self {
        match (up, down) {
            (Some(up), _) if up >= Self::SETTLED_PRICE => MarketResult::UpWon,
            (_, Some(down)) if down >= Self::SETTLED_PRICE => MarketResult::DownWon,
            (Some(up), Some(down)) if up >= down => MarketResult::Leading(Outcome::Up, up),
            (Some(_), Some(down)) => MarketResult::Leading(Outcome::Down, down),
            (Some(up), None) => MarketResult::Leading(Outcome::Up, up),
            (None, Some(down)) => MarketResult::Leading(Outcome::Down, down),
            (None, None) => MarketResult::Unknown,
        }
    }
}

impl fmt::Display for MarketResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketResult::UpWon => write!(f, "UP won"),
            MarketResult::DownWon => write!(f, "DOWN won"),
            MarketResult::Leading(outcome, price) => write!(f, "{} leading (${})", outcome, price),
            MarketResult::Unknown => write!(f, "unknown"),
        }
    }
}

/// Market entry from the Gamma API.
///
/// `clobTokenIds` and `outcomes` arrive either as arrays or as
/// JSON-encoded strings, so they are kept raw.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    /// Market slug.
    pub slug: Option<String>,
    /// Market ID (string or number).
    #[serde(default)]
    pub id: Value,
    /// Market question.
    pub question: Option<String>,
    /// Whether market is closed.
    pub closed: Option<bool>,
    /// CLOB token IDs.
    #[serde(rename = "clobTokenIds", default)]
    pub clob_token_ids: Value,
    /// Outcome labels, aligned with `clob_token_ids`.
    #[serde(default)]
    pub outcomes: Value,
    /// End date (RFC 3339).
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market {
            slug: "btc-updown-15m-123".to_string(),
            id: "market-id".to_string(),
            up_token_id: "up-token".to_string(),
            down_token_id: "down-token".to_string(),
            start_timestamp: 0,
            end_timestamp: 900,
            question: None,
        }
    }

    #[test]
    fn outcome_from_string_works() {
        use std::str::FromStr;
        assert_eq!(Outcome::from_str("up").unwrap(), Outcome::Up);
        assert_eq!(Outcome::from_str("Down").unwrap(), Outcome::Down);
        assert_eq!(Outcome::from_str("YES").unwrap(), Outcome::Up);
        assert_eq!(Outcome::from_str("no").unwrap(), Outcome::Down);
        assert_eq!(Outcome::Up.opposite(), Outcome::Down);
        assert_eq!(Outcome::Up.to_string(), "UP");
        assert_eq!(Outcome::Down.to_string(), "DOWN");
    }

    #[test]
    fn market_token_lookup() {
        let market = market();
        assert_eq!(market.token_id(Outcome::Up), "up-token");
        assert_eq!(market.token_id(Outcome::Down), "down-token");
        assert_eq!(market.outcome_of("down-token"), Some(Outcome::Down));
        assert_eq!(market.outcome_of("other"), None);
    }

    #[test]
    fn closes_at_end_timestamp() {
        let market = market();
        assert!(!market.is_closed_at(899));
        assert!(market.is_closed_at(900));
        assert!(market.is_closed());
        assert_eq!(market.time_remaining_str(), "CLOSED");
    }

    #[test]
    fn market_result_from_final_prices() {
        assert_eq!(MarketResult::from_prices(Some(dec!(0.99)), Some(dec!(0.01))), MarketResult::UpWon);
        assert_eq!(MarketResult::from_prices(Some(dec!(0.02)), Some(dec!(1))), MarketResult::DownWon);
        assert_eq!(
            MarketResult::from_prices(Some(dec!(0.40)), Some(dec!(0.62))),
            MarketResult::Leading(Outcome::Down, dec!(0.62))
        );
        assert_eq!(MarketResult::from_prices(None, None), MarketResult::Unknown);
        assert_eq!(MarketResult::SETTLED_PRICE, dec!(0.99));
        assert_eq!(
            MarketResult::Leading(Outcome::Up, dec!(0.7)).to_string(),
            "UP leading ($0.7)"
        );
    }
}
