//! Mutable trading session: cooldown, cached balance, simulated cash and
//! per-instance counters.
//!
//! Owned by the scheduler and lent to the execution engine, which is the
//! only writer.

use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::arbitrage::ArbitrageOpportunity;
use crate::config::Config;

/// Counters for the current market instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceStats {
    /// Opportunities detected.
    pub opportunities: u64,
    /// Paired trades filled (or simulated).
    pub trades_executed: u64,
    /// Total investment.
    pub total_invested: Decimal,
    /// Shares bought across both legs.
    pub total_shares_bought: Decimal,
    /// Payout owed at settlement.
    pub expected_payout: Decimal,
}

impl InstanceStats {
    pub fn expected_profit(&self) -> Decimal {
        self.expected_payout - self.total_invested
    }

    pub fn profit_pct(&self) -> Decimal {
        if self.total_invested.is_zero() {
            Decimal::ZERO
        } else {
            self.expected_profit() / self.total_invested * Decimal::ONE_HUNDRED
        }
    }
}

#[derive(Debug)]
pub struct Session {
    dry_run: bool,
    cooldown: Duration,
    last_execution: Option<Instant>,
    cached_balance: Option<Decimal>,
    sim_start_balance: Decimal,
    sim_balance: Decimal,
    instance: InstanceStats,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        Self::with(config.dry_run, config.cooldown(), config.sim_balance)
    }

    pub fn with(dry_run: bool, cooldown: Duration, sim_balance: Decimal) -> Self {
        Self {
            dry_run,
            cooldown,
            last_execution: None,
            cached_balance: None,
            sim_start_balance: sim_balance,
            sim_balance,
            instance: InstanceStats::default(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Time left before another execution attempt is allowed.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let elapsed = self.last_execution?.elapsed();
        self.cooldown.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Start the cooldown window.
    pub fn mark_execution(&mut self) {
        self.last_execution = Some(Instant::now());
    }

    pub fn cached_balance(&self) -> Option<Decimal> {
        self.cached_balance
    }

    pub fn cache_balance(&mut self, balance: Decimal) {
        debug!(balance = %balance, "Balance cached");
        self.cached_balance = Some(balance);
    }

    pub fn invalidate_balance(&mut self) {
        self.cached_balance = None;
    }

    pub fn sim_balance(&self) -> Decimal {
        self.sim_balance
    }

    pub fn sim_start_balance(&self) -> Decimal {
        self.sim_start_balance
    }

    /// Take `amount` from simulated cash; `false` if there is not enough.
    pub fn debit_sim(&mut self, amount: Decimal) -> bool {
        if self.sim_balance < amount {
            return false;
        }
        self.sim_balance -= amount;
        true
    }

    pub fn note_opportunity(&mut self) {
        self.instance.opportunities += 1;
    }

    /// Book a filled (or simulated) pair.
    pub fn record_fill(&mut self, opportunity: &ArbitrageOpportunity) {
        self.instance.trades_executed += 1;
        self.instance.total_invested += opportunity.total_investment;
        self.instance.total_shares_bought += opportunity.order_size * Decimal::TWO;
        self.instance.expected_payout += opportunity.expected_payout;
    }

    pub fn instance(&self) -> &InstanceStats {
        &self.instance
    }

    /// Close the current instance.
    ///
    /// Clears counters and the cooldown and, in dry-run, claims the
    /// expected payout into simulated cash. Returns the finished counters.
    pub fn reset_instance(&mut self) -> InstanceStats {
        let finished = std::mem::take(&mut self.instance);
        if self.dry_run && !finished.expected_payout.is_zero() {
            self.sim_balance += finished.expected_payout;
            info!(
                claimed = %finished.expected_payout,
                sim_balance = %self.sim_balance,
                "Simulated payout claimed"
            );
        }
        self.last_execution = None;
        self.invalidate_balance();
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::calculate_opportunity;
    use crate::market::Market;
    use crate::orderbook::{cost_fill, PriceLevel};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn opportunity() -> ArbitrageOpportunity {
        let market = Market {
            slug: "btc-updown-15m-900".to_string(),
            id: "1".to_string(),
            up_token_id: "up".to_string(),
            down_token_id: "down".to_string(),
            start_timestamp: 900,
            end_timestamp: 1800,
            question: None,
        };
        let up = cost_fill([PriceLevel::new(dec!(0.47), dec!(100))], dec!(10)).unwrap();
        let down = cost_fill([PriceLevel::new(dec!(0.50), dec!(100))], dec!(10)).unwrap();
        calculate_opportunity(&market, &up, &down, dec!(10), dec!(0.99)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires() {
        let mut session = Session::with(true, Duration::from_secs(10), dec!(100));
        assert_eq!(session.cooldown_remaining(), None);

        session.mark_execution();
        assert!(session.cooldown_remaining().is_some());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(session.cooldown_remaining(), None);
    }

    #[test]
    fn balance_cache_is_explicit() {
        let mut session = Session::with(false, Duration::ZERO, dec!(0));
        assert_eq!(session.cached_balance(), None);
        session.cache_balance(dec!(42));
        assert_eq!(session.cached_balance(), Some(dec!(42)));
        session.invalidate_balance();
        assert_eq!(session.cached_balance(), None);
    }

    #[test]
    fn sim_cash_carries_over_with_claim() {
        let mut session = Session::with(true, Duration::ZERO, dec!(100));
        let opp = opportunity();

        assert!(session.debit_sim(opp.total_investment));
        session.note_opportunity();
        session.record_fill(&opp);
        assert_eq!(session.sim_balance(), dec!(90.3));

        let finished = session.reset_instance();
        assert_eq!(finished.trades_executed, 1);
        assert_eq!(finished.total_shares_bought, dec!(20));
        assert_eq!(finished.expected_profit(), dec!(0.3));
        assert_eq!(session.sim_balance(), dec!(100.3));
        assert_eq!(session.instance(), &InstanceStats::default());
    }

    #[test]
    fn debit_refuses_overdraft() {
        let mut session = Session::with(true, Duration::ZERO, dec!(5));
        assert!(!session.debit_sim(dec!(9.7)));
        assert_eq!(session.sim_balance(), dec!(5));
    }
}
