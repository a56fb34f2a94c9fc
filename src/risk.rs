//! Pre-trade risk limits and daily bookkeeping.

use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;

/// Why a trade was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskViolation {
    #[error("balance ${balance} below minimum ${minimum}")]
    BelowMinimumBalance { balance: Decimal, minimum: Decimal },

    #[error("trade size ${size} exceeds maximum ${maximum}")]
    PositionTooLarge { size: Decimal, maximum: Decimal },

    #[error("trade size ${size} exceeds {utilization} of balance (${allowed})")]
    UtilizationExceeded {
        size: Decimal,
        utilization: Decimal,
        allowed: Decimal,
    },

    #[error("daily trade limit ({limit}) reached")]
    DailyTradeLimit { limit: u32 },

    #[error("daily loss limit (${limit}) reached")]
    DailyLossLimit { limit: Decimal },
}

/// Outcome of a pre-trade check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Allow,
    Deny(RiskViolation),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allow)
    }
}

/// Daily risk counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub trades_count: u32,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
}

impl DailyStats {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            trades_count: 0,
            total_profit: Decimal::ZERO,
            total_loss: Decimal::ZERO,
        }
    }

    pub fn net_pnl(&self) -> Decimal {
        self.total_profit - self.total_loss
    }
}

/// Accept or refuse a prospective trade, and learn from results.
pub trait RiskGate {
    /// Check a trade of `size` (USDC) against the current `balance`.
    fn can_trade(&mut self, size: Decimal, balance: Decimal) -> RiskDecision;

    /// Book the profit (negative for a loss) of a completed trade.
    fn record_result(&mut self, profit: Decimal);

    /// Counters for today.
    fn daily_stats(&mut self) -> DailyStats;
}

/// Configured limits; zero disables an optional limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskLimits {
    pub max_daily_loss: Decimal,
    pub max_position_size: Decimal,
    pub max_trades_per_day: u32,
    pub min_balance_required: Decimal,
    pub max_balance_utilization: Decimal,
}

impl RiskLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_daily_loss: config.max_daily_loss,
            max_position_size: config.max_position_size,
            max_trades_per_day: config.max_trades_per_day,
            min_balance_required: config.min_balance_required,
            max_balance_utilization: config.max_balance_utilization,
        }
    }
}

/// Default [`RiskGate`] keyed by the local calendar date.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    daily: DailyStats,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self::starting_on(limits, Local::now().date_naive())
    }

    pub fn starting_on(limits: RiskLimits, date: NaiveDate) -> Self {
        Self {
            limits,
            daily: DailyStats::new(date),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    fn roll_date(&mut self, today: NaiveDate) {
        if self.daily.date != today {
            self.daily = DailyStats::new(today);
            info!(date = %today, "Daily risk limits reset for new day");
        }
    }

    pub fn can_trade_on(&mut self, today: NaiveDate, size: Decimal, balance: Decimal) -> RiskDecision {
        self.roll_date(today);
        let limits = &self.limits;

        let violation = if balance < limits.min_balance_required {
            Some(RiskViolation::BelowMinimumBalance {
                balance,
                minimum: limits.min_balance_required,
            })
        } else if limits.max_position_size > Decimal::ZERO && size > limits.max_position_size {
            Some(RiskViolation::PositionTooLarge {
                size,
                maximum: limits.max_position_size,
            })
        } else if size > balance * limits.max_balance_utilization {
            Some(RiskViolation::UtilizationExceeded {
                size,
                utilization: limits.max_balance_utilization,
                allowed: balance * limits.max_balance_utilization,
            })
        } else if limits.max_trades_per_day > 0
            && self.daily.trades_count >= limits.max_trades_per_day
        {
            Some(RiskViolation::DailyTradeLimit {
                limit: limits.max_trades_per_day,
            })
        } else if limits.max_daily_loss > Decimal::ZERO
            && -self.daily.net_pnl() >= limits.max_daily_loss
        {
            Some(RiskViolation::DailyLossLimit {
                limit: limits.max_daily_loss,
            })
        } else {
            None
        };

        match violation {
            Some(v) => {
                warn!(reason = %v, "Risk check failed");
                RiskDecision::Deny(v)
            }
            None => RiskDecision::Allow,
        }
    }

    pub fn record_result_on(&mut self, today: NaiveDate, profit: Decimal) {
        self.roll_date(today);
        self.daily.trades_count += 1;
        if profit > Decimal::ZERO {
            self.daily.total_profit += profit;
        } else {
            self.daily.total_loss += profit.abs();
        }
    }
}

impl RiskGate for RiskManager {
    fn can_trade(&mut self, size: Decimal, balance: Decimal) -> RiskDecision {
        self.can_trade_on(Local::now().date_naive(), size, balance)
    }

    fn record_result(&mut self, profit: Decimal) {
        self.record_result_on(Local::now().date_naive(), profit);
    }

    fn daily_stats(&mut self) -> DailyStats {
        self.roll_date(Local::now().date_naive());
        self.daily.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            max_daily_loss: dec!(5),
            max_position_size: dec!(50),
            max_trades_per_day: 2,
            min_balance_required: dec!(10),
            max_balance_utilization: dec!(0.8),
        }
    }

    #[test]
    fn allows_normal_trade() {
        let mut risk = RiskManager::starting_on(limits(), day(1));
        assert_eq!(risk.can_trade_on(day(1), dec!(9.7), dec!(100)), RiskDecision::Allow);
    }

    #[test]
    fn checks_run_in_order() {
        let mut risk = RiskManager::starting_on(limits(), day(1));

        // Below minimum wins over everything else.
        assert!(matches!(
            risk.can_trade_on(day(1), dec!(500), dec!(5)),
            RiskDecision::Deny(RiskViolation::BelowMinimumBalance { .. })
        ));
        assert!(matches!(
            risk.can_trade_on(day(1), dec!(60), dec!(1000)),
            RiskDecision::Deny(RiskViolation::PositionTooLarge { .. })
        ));
        assert_eq!(
            risk.can_trade_on(day(1), dec!(20), dec!(20)),
            RiskDecision::Deny(RiskViolation::UtilizationExceeded {
                size: dec!(20),
                utilization: dec!(0.8),
                allowed: dec!(16.0),
            })
        );
    }

    #[test]
    fn daily_trade_limit_resets_next_day() {
        let mut risk = RiskManager::starting_on(limits(), day(1));
        risk.record_result_on(day(1), dec!(0.3));
        risk.record_result_on(day(1), dec!(0.3));

        assert_eq!(
            risk.can_trade_on(day(1), dec!(5), dec!(100)),
            RiskDecision::Deny(RiskViolation::DailyTradeLimit { limit: 2 })
        );
        assert!(risk.can_trade_on(day(2), dec!(5), dec!(100)).is_allowed());
        assert_eq!(risk.daily.trades_count, 0);
    }

    #[test]
    fn daily_loss_limit_uses_net_pnl() {
        let mut risk = RiskManager::starting_on(
            RiskLimits {
                max_trades_per_day: 0,
                ..limits()
            },
            day(1),
        );
        risk.record_result_on(day(1), dec!(-6));
        risk.record_result_on(day(1), dec!(2));
        assert!(risk.can_trade_on(day(1), dec!(5), dec!(100)).is_allowed());

        risk.record_result_on(day(1), dec!(-1));
        assert_eq!(
            risk.can_trade_on(day(1), dec!(5), dec!(100)),
            RiskDecision::Deny(RiskViolation::DailyLossLimit { limit: dec!(5) })
        );
        assert_eq!(risk.daily.net_pnl(), dec!(-5));
    }

    #[test]
    fn zero_limits_are_disabled() {
        let mut risk = RiskManager::starting_on(
            RiskLimits {
                max_daily_loss: dec!(0),
                max_position_size: dec!(0),
                max_trades_per_day: 0,
                min_balance_required: dec!(0),
                max_balance_utilization: dec!(1),
            },
            day(1),
        );
        for _ in 0..10 {
            risk.record_result_on(day(1), dec!(-100));
        }
        assert!(risk.can_trade_on(day(1), dec!(1000), dec!(1000)).is_allowed());
    }
}
