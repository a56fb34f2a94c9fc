//! Trade history and performance statistics.

use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::arbitrage::ArbitrageOpportunity;
use crate::error::RecorderError;
use crate::market::MarketResult;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// One executed paired trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(default)]
    pub id: u64,
    pub timestamp: String,
    pub market_slug: String,
    pub price_up: Decimal,
    pub price_down: Decimal,
    pub total_cost: Decimal,
    pub order_size: Decimal,
    pub total_investment: Decimal,
    pub expected_payout: Decimal,
    pub expected_profit: Decimal,
    pub profit_percentage: Decimal,
    #[serde(default)]
    pub order_ids: Vec<String>,
    #[serde(default)]
    pub filled: bool,
    #[serde(default)]
    pub market_result: Option<String>,
    #[serde(default)]
    pub actual_profit: Option<Decimal>,
}

impl TradeRecord {
    /// Record for a filled pair. `order_ids` is empty in dry-run.
    pub fn from_opportunity(opportunity: &ArbitrageOpportunity, order_ids: Vec<String>) -> Self {
        Self {
            id: 0,
            timestamp: now_rfc3339(),
            market_slug: opportunity.market.slug.clone(),
            price_up: opportunity.up_price,
            price_down: opportunity.down_price,
            total_cost: opportunity.total_cost,
            order_size: opportunity.order_size,
            total_investment: opportunity.total_investment,
            expected_payout: opportunity.expected_payout,
            expected_profit: opportunity.expected_profit,
            profit_percentage: opportunity.profit_pct,
            order_ids,
            filled: true,
            market_result: None,
            actual_profit: None,
        }
    }
}

/// Aggregated performance statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub successful_trades: usize,
    pub total_invested: Decimal,
    pub total_expected_profit: Decimal,
    pub total_actual_profit: Decimal,
    pub total_opportunities_found: usize,
    pub win_rate: Decimal,
    pub average_profit_per_trade: Decimal,
    pub average_profit_percentage: Decimal,
    pub total_shares_traded: Decimal,
    pub start_time: Option<String>,
    pub last_trade_time: Option<String>,
}

/// Persists executed trades.
pub trait TradeRecorder {
    /// Append a trade, returning its assigned id.
    fn record(&mut self, trade: TradeRecord) -> Result<u64, RecorderError>;

    /// Stamp every trade of `slug` with the instance's result.
    /// Returns the number of trades updated.
    fn update_market_result(
        &mut self,
        slug: &str,
        result: &MarketResult,
    ) -> Result<usize, RecorderError>;

    fn stats(&self) -> PerformanceStats;
}

/// On-disk layout of the trade log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeHistory {
    pub start_time: String,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
}

impl Default for TradeHistory {
    fn default() -> Self {
        Self {
            start_time: now_rfc3339(),
            trades: Vec::new(),
        }
    }
}

impl TradeHistory {
    fn push(&mut self, mut trade: TradeRecord) -> u64 {
        let id = self.trades.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        trade.id = id;
        self.trades.push(trade);
        id
    }

    fn stamp(&mut self, slug: &str, result: &MarketResult) -> usize {
        let settled = matches!(result, MarketResult::UpWon | MarketResult::DownWon);
        let label = result.to_string();
        let mut updated = 0;

        for trade in self.trades.iter_mut().filter(|t| t.market_slug == slug) {
            trade.market_result = Some(label.clone());
            // A settled pair pays $1 per share whichever side won.
            if settled && trade.filled {
                trade.actual_profit = Some(trade.expected_profit);
            }
            updated += 1;
        }
        updated
    }

    /// Aggregate statistics over the history.
    pub fn stats(&self) -> PerformanceStats {
        let filled: Vec<&TradeRecord> = self.trades.iter().filter(|t| t.filled).collect();
        let settled: Vec<Decimal> = filled.iter().filter_map(|t| t.actual_profit).collect();

        let total_invested: Decimal = filled.iter().map(|t| t.total_investment).sum();
        let total_expected_profit = filled.iter().map(|t| t.expected_profit).sum();
        let total_actual_profit: Decimal = settled.iter().copied().sum();
        let total_shares_traded = filled.iter().map(|t| t.order_size * Decimal::TWO).sum();
        let successful_trades = settled.iter().filter(|p| **p > Decimal::ZERO).count();

        let average_profit_per_trade = if settled.is_empty() {
            Decimal::ZERO
        } else {
            total_actual_profit / Decimal::from(settled.len())
        };
        let average_profit_percentage = if total_invested > Decimal::ZERO {
            total_actual_profit / total_invested * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        let win_rate = if settled.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(successful_trades) / Decimal::from(settled.len()) * Decimal::ONE_HUNDRED
        };

        PerformanceStats {
            total_trades: filled.len(),
            successful_trades,
            total_invested,
            total_expected_profit,
            total_actual_profit,
            total_opportunities_found: self.trades.len(),
            win_rate,
            average_profit_per_trade,
            average_profit_percentage,
            total_shares_traded,
            start_time: Some(self.start_time.clone()),
            last_trade_time: self.trades.iter().map(|t| t.timestamp.clone()).max(),
        }
    }
}

/// Trade log kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryTradeLog {
    history: TradeHistory,
}

impl MemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.history.trades
    }
}

impl TradeRecorder for MemoryTradeLog {
    fn record(&mut self, trade: TradeRecord) -> Result<u64, RecorderError> {
        Ok(self.history.push(trade))
    }

    fn update_market_result(
        &mut self,
        slug: &str,
        result: &MarketResult,
    ) -> Result<usize, RecorderError> {
        Ok(self.history.stamp(slug, result))
    }

    fn stats(&self) -> PerformanceStats {
        self.history.stats()
    }
}

/// Trade log persisted as JSON, rewritten atomically on every change.
#[derive(Debug)]
pub struct JsonTradeLog {
    path: PathBuf,
    history: TradeHistory,
}

impl JsonTradeLog {
    /// Open the log, loading existing history if the file exists.
    ///
    /// An unreadable or corrupt file is logged and replaced by a fresh
    /// history on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let history = match Self::load(&path) {
            Ok(Some(history)) => {
                info!(path = %path.display(), trades = history.trades.len(), "Loaded trade history");
                history
            }
            Ok(None) => TradeHistory::default(),
            Err(e) => {
                warn!(error = %e, "Could not load trade history");
                TradeHistory::default()
            }
        };
        Self { path, history }
    }

    fn load(path: &Path) -> Result<Option<TradeHistory>, RecorderError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| RecorderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.history.trades
    }

    fn persist(&self) -> Result<(), RecorderError> {
        let io_err = |source| RecorderError::Io {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let body = serde_json::to_string_pretty(&self.history)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), "Trade history saved");
        Ok(())
    }
}

impl TradeRecorder for JsonTradeLog {
    fn record(&mut self, trade: TradeRecord) -> Result<u64, RecorderError> {
        let id = self.history.push(trade);
        self.persist()?;
        Ok(id)
    }

    fn update_market_result(
        &mut self,
        slug: &str,
        result: &MarketResult,
    ) -> Result<usize, RecorderError> {
        let updated = self.history.stamp(slug, result);
        if updated > 0 {
            self.persist()?;
        }
        Ok(updated)
    }

    fn stats(&self) -> PerformanceStats {
        self.history.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Outcome;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn trade(slug: &str, total_cost: Decimal, size: Decimal) -> TradeRecord {
        TradeRecord {
            id: 0,
            timestamp: "2025-12-09T17:30:00Z".to_string(),
            market_slug: slug.to_string(),
            price_up: dec!(0.47),
            price_down: total_cost - dec!(0.47),
            total_cost,
            order_size: size,
            total_investment: total_cost * size,
            expected_payout: size,
            expected_profit: size - total_cost * size,
            profit_percentage: dec!(0),
            order_ids: vec!["a".to_string(), "b".to_string()],
            filled: true,
            market_result: None,
            actual_profit: None,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("updown-arb-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn ids_are_sequential() {
        let mut log = MemoryTradeLog::new();
        assert_eq!(log.record(trade("m-1", dec!(0.97), dec!(10))).unwrap(), 1);
        assert_eq!(log.record(trade("m-1", dec!(0.97), dec!(10))).unwrap(), 2);
        assert_eq!(log.trades()[1].id, 2);
    }

    #[test]
    fn stats_before_and_after_settlement() {
        let mut log = MemoryTradeLog::new();
        log.record(trade("m-1", dec!(0.97), dec!(10))).unwrap();
        log.record(trade("m-2", dec!(0.98), dec!(5))).unwrap();

        let stats = log.stats();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.total_invested, dec!(14.60));
        assert_eq!(stats.total_expected_profit, dec!(0.40));
        assert_eq!(stats.total_shares_traded, dec!(30));
        assert_eq!(stats.win_rate, dec!(0));

        assert_eq!(log.update_market_result("m-1", &MarketResult::UpWon).unwrap(), 1);
        let stats = log.stats();
        assert_eq!(stats.successful_trades, 1);
        assert_eq!(stats.total_actual_profit, dec!(0.30));
        assert_eq!(stats.win_rate, dec!(100));
        assert_eq!(log.trades()[0].market_result.as_deref(), Some("UP won"));
    }

    #[test]
    fn leading_result_does_not_settle() {
        let mut log = MemoryTradeLog::new();
        log.record(trade("m-1", dec!(0.97), dec!(10))).unwrap();

        log.update_market_result("m-1", &MarketResult::Leading(Outcome::Down, dec!(0.7)))
            .unwrap();
        assert!(log.trades()[0].market_result.is_some());
        assert_eq!(log.trades()[0].actual_profit, None);
    }

    #[test]
    fn json_log_round_trips_through_disk() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_file(&path);

        let mut log = JsonTradeLog::open(&path);
        log.record(trade("m-1", dec!(0.97), dec!(10))).unwrap();
        log.update_market_result("m-1", &MarketResult::DownWon).unwrap();

        let reopened = JsonTradeLog::open(&path);
        assert_eq!(reopened.trades(), log.trades());
        assert_eq!(reopened.stats().start_time, log.stats().start_time);

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("start_time").is_some());
        assert_eq!(raw["trades"].as_array().map(Vec::len), Some(1));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let path = temp_path("corrupt");
        fs::write(&path, "not json").unwrap();

        let log = JsonTradeLog::open(&path);
        assert!(log.trades().is_empty());

        fs::remove_file(&path).unwrap();
    }
}
