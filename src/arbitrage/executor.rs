//! Paired order execution with partial-fill recovery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use strum::Display;
use tracing::{debug, error, info, instrument, warn};

use super::calculator::ArbitrageOpportunity;
use crate::config::Config;
use crate::error::TradingError;
use crate::market::{ExchangeClient, Market, Outcome};
use crate::metrics;
use crate::recorder::{TradeRecord, TradeRecorder};
use crate::risk::{RiskDecision, RiskGate, RiskViolation};
use crate::session::Session;
use crate::trading::{
    wait_for_fill, MarketPositions, OrderLegState, OrderParams, TimeInForce,
    DEFAULT_ORDER_TIMEOUT, DEFAULT_POLL_INTERVAL,
};

/// Where the engine is in handling one opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ExecState {
    Idle,
    CooldownCheck,
    Submitting,
    AwaitingFills,
    BothFilled,
    PartialFill,
    Unwinding,
    BothUnfilled,
    Done,
}

/// What happened to the sell order flattening a lone filled leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwindOutcome {
    /// Sell order accepted by the exchange.
    Submitted {
        order_id: String,
        price: Decimal,
        size: Decimal,
    },
    /// No bids to sell into; the leg is stranded.
    NoBid,
    /// The unwind could not be placed; the leg is stranded.
    Failed(String),
}

impl UnwindOutcome {
    pub fn is_stranded(&self) -> bool {
        !matches!(self, UnwindOutcome::Submitted { .. })
    }
}

/// A leg that ended recovery holding shares, and the sell sent to flatten it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegUnwind {
    pub outcome: Outcome,
    pub filled_size: Decimal,
    pub unwind: UnwindOutcome,
}

/// Result of attempting to execute an arbitrage.
#[derive(Debug)]
pub enum ExecutionResult {
    /// Both legs filled successfully.
    BothFilled {
        up_order_id: String,
        down_order_id: String,
        up_filled_size: Decimal,
        down_filled_size: Decimal,
        /// Trade log id, if recording succeeded.
        record_id: Option<u64>,
    },
    /// The pair did not complete. Open orders were cancelled and every leg
    /// holding shares, fully or partly filled, was unwound.
    PartialFill { unwinds: Vec<LegUnwind> },
    /// Neither leg filled (or could be submitted).
    BothUnfilled {
        reason: String,
    },
    /// Simulation mode - no real orders.
    Simulated {
        would_invest: Decimal,
        would_profit: Decimal,
    },
    /// Skipped due to cooldown.
    CooldownActive {
        remaining: Duration,
    },
    /// Skipped due to insufficient balance.
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
    /// Refused by the risk gate.
    RiskRejected(RiskViolation),
}

impl ExecutionResult {
    /// Legs whose unwind could not be placed.
    pub fn stranded_legs(&self) -> usize {
        match self {
            ExecutionResult::PartialFill { unwinds } => {
                unwinds.iter().filter(|leg| leg.unwind.is_stranded()).count()
            }
            _ => 0,
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub dry_run: bool,
    pub tif: TimeInForce,
    pub balance_margin: Decimal,
    pub order_timeout: Duration,
    pub poll_interval: Duration,
}

impl ExecutionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.dry_run,
            tif: config.time_in_force().unwrap_or_default(),
            balance_margin: config.balance_margin,
            order_timeout: config.order_timeout(),
            poll_interval: config.order_poll_interval(),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            tif: TimeInForce::FOK,
            balance_margin: Decimal::new(12, 1),
            order_timeout: DEFAULT_ORDER_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Executes one opportunity at a time as a bounded transaction.
pub struct PairedExecutionEngine {
    client: Arc<dyn ExchangeClient>,
    risk: Box<dyn RiskGate + Send>,
    recorder: Box<dyn TradeRecorder + Send>,
    settings: ExecutionSettings,
    state: ExecState,
}

impl PairedExecutionEngine {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        risk: Box<dyn RiskGate + Send>,
        recorder: Box<dyn TradeRecorder + Send>,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            client,
            risk,
            recorder,
            settings,
            state: ExecState::Idle,
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn client(&self) -> &Arc<dyn ExchangeClient> {
        &self.client
    }

    pub fn recorder(&self) -> &(dyn TradeRecorder + Send) {
        self.recorder.as_ref()
    }

    pub fn recorder_mut(&mut self) -> &mut (dyn TradeRecorder + Send) {
        self.recorder.as_mut()
    }

    pub fn risk_mut(&mut self) -> &mut (dyn RiskGate + Send) {
        self.risk.as_mut()
    }

    fn transition(&mut self, next: ExecState) {
        debug!(from = %self.state, to = %next, "Execution state");
        self.state = next;
    }

    fn finish(&mut self, result: ExecutionResult) -> Result<ExecutionResult, TradingError> {
        self.transition(ExecState::Done);
        self.state = ExecState::Idle;
        Ok(result)
    }

    /// Execute an arbitrage opportunity.
    #[instrument(skip(self, session, opportunity), fields(market = %opportunity.market.slug))]
    pub async fn execute(
        &mut self,
        session: &mut Session,
        opportunity: &ArbitrageOpportunity,
    ) -> Result<ExecutionResult, TradingError> {
        self.transition(ExecState::CooldownCheck);
        if let Some(remaining) = session.cooldown_remaining() {
            info!(remaining_ms = remaining.as_millis() as u64, "Cooldown active, skipping");
            return self.finish(ExecutionResult::CooldownActive { remaining });
        }
        session.mark_execution();
        session.note_opportunity();
        log_opportunity(opportunity);

        if self.settings.dry_run {
            let result = self.execute_simulated(session, opportunity);
            return self.finish(result);
        }

        let balance = match session.cached_balance() {
            Some(balance) => balance,
            None => match self.client.get_balance().await {
                Ok(balance) => {
                    session.cache_balance(balance);
                    balance
                }
                Err(e) => {
                    self.state = ExecState::Idle;
                    return Err(e);
                }
            },
        };

        if let RiskDecision::Deny(violation) =
            self.risk.can_trade(opportunity.total_investment, balance)
        {
            return self.finish(ExecutionResult::RiskRejected(violation));
        }

        let required = opportunity.required_balance(self.settings.balance_margin);
        if balance < required {
            warn!(required = %required, available = %balance, "Insufficient balance");
            return self.finish(ExecutionResult::InsufficientBalance {
                required,
                available: balance,
            });
        }

        let result = self.execute_live(session, opportunity).await;
        if result.is_err() {
            self.state = ExecState::Idle;
        }
        self.finish(result?)
    }

    fn execute_simulated(
        &mut self,
        session: &mut Session,
        opportunity: &ArbitrageOpportunity,
    ) -> ExecutionResult {
        info!("SIMULATION MODE - No real orders will be executed");

        if !session.debit_sim(opportunity.total_investment) {
            error!(
                required = %opportunity.total_investment,
                available = %session.sim_balance(),
                "Insufficient simulated balance"
            );
            return ExecutionResult::InsufficientBalance {
                required: opportunity.total_investment,
                available: session.sim_balance(),
            };
        }

        session.record_fill(opportunity);
        self.record_trade(opportunity, Vec::new());

        info!(
            sim_balance = %session.sim_balance(),
            deducted = %opportunity.total_investment,
            "Simulated trade executed"
        );

        ExecutionResult::Simulated {
            would_invest: opportunity.total_investment,
            would_profit: opportunity.expected_profit,
        }
    }

    async fn execute_live(
        &mut self,
        session: &mut Session,
        opportunity: &ArbitrageOpportunity,
    ) -> Result<ExecutionResult, TradingError> {
        self.transition(ExecState::Submitting);
        let market = &opportunity.market;
        let legs = [
            OrderParams::buy(&market.up_token_id, opportunity.up_price, opportunity.order_size)
                .with_tif(self.settings.tif),
            OrderParams::buy(&market.down_token_id, opportunity.down_price, opportunity.order_size)
                .with_tif(self.settings.tif),
        ];
        for leg in &legs {
            leg.validate().map_err(TradingError::InvalidParams)?;
        }

        info!(
            up_price = %opportunity.up_price,
            down_price = %opportunity.down_price,
            size = %opportunity.order_size,
            tif = %self.settings.tif,
            "Submitting paired orders"
        );

        let started = Instant::now();
        let results = self.client.submit_orders(&legs).await;
        metrics::record_order_submit_latency(started);

        let mut results = results.into_iter();
        let up_submit = results.next().unwrap_or_else(|| missing_result("UP"));
        let down_submit = results.next().unwrap_or_else(|| missing_result("DOWN"));
        let accepted = [&up_submit, &down_submit].iter().filter(|r| r.is_ok()).count();
        metrics::inc_orders_submitted(accepted as u64);
        if let Err(e) = &up_submit {
            error!(error = %e, "UP order submission failed");
        }
        if let Err(e) = &down_submit {
            error!(error = %e, "DOWN order submission failed");
        }

        self.transition(ExecState::AwaitingFills);
        let (up_leg, down_leg) = tokio::join!(
            self.await_leg(&up_submit, opportunity.order_size),
            self.await_leg(&down_submit, opportunity.order_size),
        );

        let up_filled = up_leg.as_ref().is_some_and(OrderLegState::is_filled);
        let down_filled = down_leg.as_ref().is_some_and(OrderLegState::is_filled);

        if let (true, true, Some(up), Some(down)) = (up_filled, down_filled, &up_leg, &down_leg) {
            self.transition(ExecState::BothFilled);
            return Ok(self.complete(session, opportunity, up, down).await);
        }

        // Recovery: nothing may stay resting, and a lone fill must be flattened.
        let open_ids: Vec<String> = [&up_submit, &down_submit]
            .into_iter()
            .filter_map(|r| r.as_ref().ok().cloned())
            .collect();
        self.cancel_best_effort(&open_ids).await;
        metrics::inc_orders_failed(2 - up_filled as u64 - down_filled as u64);

        let held: Vec<(Outcome, Decimal)> = [(Outcome::Up, &up_leg), (Outcome::Down, &down_leg)]
            .into_iter()
            .filter_map(|(outcome, leg)| leg.as_ref().map(|leg| (outcome, held_quantity(leg))))
            .filter(|(_, size)| *size > Decimal::ZERO)
            .collect();

        if held.is_empty() {
            self.transition(ExecState::BothUnfilled);
            let reason = describe_failure(&up_submit, &down_submit);
            warn!(reason = %reason, "Neither order filled");
            return Ok(ExecutionResult::BothUnfilled { reason });
        }

        // Cash went into at least one leg.
        session.invalidate_balance();
        self.transition(ExecState::PartialFill);
        for (outcome, size) in &held {
            warn!(
                filled_leg = %outcome,
                filled = %size,
                requested = %opportunity.order_size,
                "Partial fill: leg holds shares without a complete pair"
            );
        }

        self.transition(ExecState::Unwinding);
        let mut unwinds = Vec::with_capacity(held.len());
        for (outcome, filled_size) in held {
            let unwind = self.unwind(market, outcome, filled_size).await;
            unwinds.push(LegUnwind {
                outcome,
                filled_size,
                unwind,
            });
        }
        Ok(ExecutionResult::PartialFill { unwinds })
    }

    async fn await_leg(
        &self,
        submitted: &Result<String, TradingError>,
        requested: Decimal,
    ) -> Option<OrderLegState> {
        let order_id = submitted.as_ref().ok()?;
        Some(
            wait_for_fill(
                self.client.as_ref(),
                order_id,
                requested,
                self.settings.order_timeout,
                self.settings.poll_interval,
            )
            .await,
        )
    }

    async fn complete(
        &mut self,
        session: &mut Session,
        opportunity: &ArbitrageOpportunity,
        up: &OrderLegState,
        down: &OrderLegState,
    ) -> ExecutionResult {
        metrics::inc_orders_filled(2);
        metrics::inc_opportunities_executed();

        let up_filled_size = held_quantity(up);
        let down_filled_size = held_quantity(down);
        info!(
            up_filled = %up_filled_size,
            down_filled = %down_filled_size,
            investment = %opportunity.total_investment,
            "ARBITRAGE EXECUTED SUCCESSFULLY"
        );

        session.record_fill(opportunity);
        let record_id =
            self.record_trade(opportunity, vec![up.order_id.clone(), down.order_id.clone()]);
        self.risk.record_result(opportunity.expected_profit);

        session.invalidate_balance();
        match self.client.get_balance().await {
            Ok(balance) => {
                session.cache_balance(balance);
                info!(balance = %balance, "Updated balance");
            }
            Err(e) => warn!(error = %e, "Could not refresh balance"),
        }
        self.log_positions(&opportunity.market).await;

        ExecutionResult::BothFilled {
            up_order_id: up.order_id.clone(),
            down_order_id: down.order_id.clone(),
            up_filled_size,
            down_filled_size,
            record_id,
        }
    }

    fn record_trade(&mut self, opportunity: &ArbitrageOpportunity, order_ids: Vec<String>) -> Option<u64> {
        match self
            .recorder
            .record(TradeRecord::from_opportunity(opportunity, order_ids))
        {
            Ok(id) => {
                debug!(record_id = id, "Trade recorded");
                Some(id)
            }
            Err(e) => {
                error!(error = %e, "Failed to record trade");
                None
            }
        }
    }

    async fn cancel_best_effort(&self, order_ids: &[String]) {
        if order_ids.is_empty() {
            return;
        }
        if let Err(e) = self.client.cancel_orders(order_ids).await {
            warn!(error = %e, "Cancel failed; continuing recovery");
        }
    }

    /// Sell a lone filled leg into the best bid, fill-and-kill.
    async fn unwind(&self, market: &Market, outcome: Outcome, size: Decimal) -> UnwindOutcome {
        let token_id = market.token_id(outcome);
        info!(outcome = %outcome, size = %size, "Attempting to unwind partial fill");

        let outcome_of_unwind = match self.client.get_order_book(token_id, outcome).await {
            Err(e) => UnwindOutcome::Failed(format!("order book unavailable: {}", e)),
            Ok(book) => match book.best_bid() {
                None => UnwindOutcome::NoBid,
                Some(best_bid) => {
                    let order = OrderParams::sell(token_id, best_bid, size).with_tif(TimeInForce::FAK);
                    match self.client.submit_orders(&[order]).await.into_iter().next() {
                        Some(Ok(order_id)) => UnwindOutcome::Submitted {
                            order_id,
                            price: best_bid,
                            size,
                        },
                        Some(Err(e)) => UnwindOutcome::Failed(e.to_string()),
                        None => UnwindOutcome::Failed("no submission result".to_string()),
                    }
                }
            },
        };

        match &outcome_of_unwind {
            UnwindOutcome::Submitted { order_id, price, .. } => {
                metrics::inc_unwinds();
                info!(order_id = %order_id, price = %price, "Unwind sell order submitted");
            }
            stranded => {
                metrics::inc_stranded();
                error!(
                    market = %market.slug,
                    outcome = %outcome,
                    token_id = %token_id,
                    size = %size,
                    detail = ?stranded,
                    "STRANDED: unwind failed, unhedged position left open"
                );
            }
        }
        outcome_of_unwind
    }

    async fn log_positions(&self, market: &Market) {
        let tokens = [market.up_token_id.clone(), market.down_token_id.clone()];
        match self.client.get_positions(&tokens).await {
            Ok(map) => {
                let positions = MarketPositions::from_map(market, &map);
                info!(
                    up_shares = %positions.up.size,
                    down_shares = %positions.down.size,
                    imbalance = %positions.imbalance(),
                    "Current positions"
                );
            }
            Err(e) => warn!(error = %e, "Could not fetch positions"),
        }
    }
}

fn missing_result(leg: &str) -> Result<String, TradingError> {
    Err(TradingError::SubmissionFailed(format!("no result for {} leg", leg)))
}

/// Shares a leg ended up with. A fill reported without a size counts as
/// the full request.
fn held_quantity(leg: &OrderLegState) -> Decimal {
    if leg.filled_quantity > Decimal::ZERO {
        leg.filled_quantity
    } else if leg.is_filled() {
        leg.requested_quantity
    } else {
        Decimal::ZERO
    }
}

fn describe_failure(
    up: &Result<String, TradingError>,
    down: &Result<String, TradingError>,
) -> String {
    match (up, down) {
        (Err(u), Err(d)) => format!("both submissions failed: UP: {}; DOWN: {}", u, d),
        (Err(u), Ok(_)) => format!("UP submission failed: {}", u),
        (Ok(_), Err(d)) => format!("DOWN submission failed: {}", d),
        (Ok(_), Ok(_)) => "no leg filled before timeout".to_string(),
    }
}

/// Log opportunity details.
fn log_opportunity(opportunity: &ArbitrageOpportunity) {
    info!("========================================");
    info!("ARBITRAGE OPPORTUNITY DETECTED");
    info!("========================================");
    info!("UP limit price:       ${}", opportunity.up_price);
    info!("DOWN limit price:     ${}", opportunity.down_price);
    if let (Some(vwap_up), Some(vwap_down)) = (opportunity.vwap_up, opportunity.vwap_down) {
        info!("UP VWAP (est):        ${}", vwap_up.round_dp(4));
        info!("DOWN VWAP (est):      ${}", vwap_down.round_dp(4));
    }
    info!("Total cost:           ${}", opportunity.total_cost);
    info!("Profit per share:     ${}", opportunity.profit_per_share);
    info!("Profit %:             {}%", opportunity.profit_pct.round_dp(2));
    info!("----------------------------------------");
    info!("Order size:           {} shares each side", opportunity.order_size);
    info!("Total investment:     ${}", opportunity.total_investment);
    info!("Expected payout:      ${}", opportunity.expected_payout);
    info!("EXPECTED PROFIT:      ${}", opportunity.expected_profit);
    info!("========================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::calculate_opportunity;
    use crate::market::{MockBookBuilder, MockExchange};
    use crate::orderbook::{cost_fill, PriceLevel};
    use crate::recorder::MemoryTradeLog;
    use crate::risk::{RiskLimits, RiskManager};
    use crate::trading::{OrderStatus, OrderStatusReport, Side};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market {
            slug: "btc-updown-15m-900".to_string(),
            id: "1".to_string(),
            up_token_id: "up".to_string(),
            down_token_id: "down".to_string(),
            start_timestamp: 900,
            end_timestamp: 1800,
            question: None,
        }
    }

    fn opportunity() -> ArbitrageOpportunity {
        let up = cost_fill([PriceLevel::new(dec!(0.47), dec!(100))], dec!(10)).unwrap();
        let down = cost_fill([PriceLevel::new(dec!(0.50), dec!(100))], dec!(10)).unwrap();
        calculate_opportunity(&market(), &up, &down, dec!(10), dec!(0.99)).unwrap()
    }

    fn engine(exchange: &MockExchange, dry_run: bool) -> PairedExecutionEngine {
        let limits = RiskLimits {
            max_daily_loss: dec!(0),
            max_position_size: dec!(0),
            max_trades_per_day: 0,
            min_balance_required: dec!(10),
            max_balance_utilization: dec!(0.8),
        };
        PairedExecutionEngine::new(
            Arc::new(exchange.clone()),
            Box::new(RiskManager::new(limits)),
            Box::new(MemoryTradeLog::new()),
            ExecutionSettings {
                dry_run,
                ..ExecutionSettings::default()
            },
        )
    }

    fn session(dry_run: bool) -> Session {
        Session::with(dry_run, Duration::from_secs(10), dec!(100))
    }

    #[tokio::test]
    async fn simulated_trade_debits_sim_cash() {
        let exchange = MockExchange::new();
        let mut engine = engine(&exchange, true);
        let mut session = session(true);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        assert!(matches!(result, ExecutionResult::Simulated { .. }));
        assert_eq!(session.sim_balance(), dec!(90.3));
        assert_eq!(engine.recorder().stats().total_trades, 1);
        assert!(exchange.submitted().is_empty());
        assert_eq!(engine.state(), ExecState::Idle);
    }

    #[tokio::test]
    async fn cooldown_applies_in_dry_run() {
        let exchange = MockExchange::new();
        let mut engine = engine(&exchange, true);
        let mut session = session(true);

        engine.execute(&mut session, &opportunity()).await.unwrap();
        let second = engine.execute(&mut session, &opportunity()).await.unwrap();

        assert!(matches!(second, ExecutionResult::CooldownActive { .. }));
        assert_eq!(session.instance().trades_executed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn both_legs_fill() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(100));
        let mut engine = engine(&exchange, false);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        match result {
            ExecutionResult::BothFilled {
                up_filled_size,
                down_filled_size,
                record_id,
                ..
            } => {
                assert_eq!(up_filled_size, dec!(10));
                assert_eq!(down_filled_size, dec!(10));
                assert_eq!(record_id, Some(1));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let submitted = exchange.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].price, dec!(0.47));
        assert_eq!(submitted[1].price, dec!(0.50));
        assert!(submitted.iter().all(|o| o.side == Side::Buy && o.tif == TimeInForce::FOK));
        assert!(exchange.cancelled().is_empty());
        assert_eq!(session.cached_balance(), Some(dec!(100)));
        assert_eq!(engine.risk_mut().daily_stats().trades_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_fill_cancels_and_unwinds_at_best_bid() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(100));
        exchange.script_fills("down", vec![OrderStatusReport::new(OrderStatus::Submitted, dec!(0))]);
        exchange.set_book(
            MockBookBuilder::new("up", Outcome::Up)
                .bid(dec!(0.45), dec!(50))
                .ask(dec!(0.47), dec!(50))
                .build(),
        );
        let mut engine = engine(&exchange, false);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        match &result {
            ExecutionResult::PartialFill { unwinds } => {
                assert_eq!(unwinds.len(), 1);
                assert_eq!(unwinds[0].outcome, Outcome::Up);
                assert_eq!(unwinds[0].filled_size, dec!(10));
                assert!(matches!(unwinds[0].unwind, UnwindOutcome::Submitted { price, .. } if price == dec!(0.45)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(result.stranded_legs(), 0);
        assert_eq!(session.cached_balance(), None);

        assert_eq!(exchange.cancelled().len(), 2);
        let unwind = exchange.submitted().pop().unwrap();
        assert_eq!(unwind.side, Side::Sell);
        assert_eq!(unwind.token_id, "up");
        assert_eq!(unwind.tif, TimeInForce::FAK);
        assert_eq!(engine.recorder().stats().total_trades, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unwind_without_bids_is_stranded() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(100));
        exchange.script_fills("up", vec![OrderStatusReport::new(OrderStatus::Canceled, dec!(0))]);
        let mut engine = engine(&exchange, false);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        match &result {
            ExecutionResult::PartialFill { unwinds } => {
                assert_eq!(unwinds.len(), 1);
                assert_eq!(unwinds[0].outcome, Outcome::Down);
                assert_eq!(unwinds[0].unwind, UnwindOutcome::NoBid);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(result.stranded_legs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partly_filled_leg_is_unwound_alongside_full_leg() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(100));
        exchange.script_fills("down", vec![OrderStatusReport::new(OrderStatus::Canceled, dec!(6))]);
        exchange.set_book(MockBookBuilder::new("up", Outcome::Up).bid(dec!(0.45), dec!(50)).build());
        exchange.set_book(MockBookBuilder::new("down", Outcome::Down).bid(dec!(0.48), dec!(50)).build());
        let mut engine = engine(&exchange, false);
        engine.settings.tif = TimeInForce::FAK;
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        let sells: Vec<(String, Decimal, Decimal)> = exchange
            .submitted()
            .into_iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| (o.token_id, o.size, o.price))
            .collect();
        assert_eq!(
            sells,
            vec![
                ("up".to_string(), dec!(10), dec!(0.45)),
                ("down".to_string(), dec!(6), dec!(0.48)),
            ]
        );
        assert_eq!(result.stranded_legs(), 0);
        assert_eq!(session.cached_balance(), None);
        assert_eq!(engine.recorder().stats().total_trades, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn both_partly_filled_legs_are_unwound() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(100));
        exchange.script_fills("up", vec![OrderStatusReport::new(OrderStatus::Canceled, dec!(4))]);
        exchange.script_fills("down", vec![OrderStatusReport::new(OrderStatus::Canceled, dec!(7))]);
        exchange.set_book(MockBookBuilder::new("up", Outcome::Up).bid(dec!(0.45), dec!(50)).build());
        let mut engine = engine(&exchange, false);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        match &result {
            ExecutionResult::PartialFill { unwinds } => {
                let held: Vec<(Outcome, Decimal)> =
                    unwinds.iter().map(|leg| (leg.outcome, leg.filled_size)).collect();
                assert_eq!(held, vec![(Outcome::Up, dec!(4)), (Outcome::Down, dec!(7))]);
                assert!(matches!(unwinds[0].unwind, UnwindOutcome::Submitted { .. }));
                assert_eq!(unwinds[1].unwind, UnwindOutcome::NoBid);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(result.stranded_legs(), 1);
        assert_eq!(exchange.cancelled().len(), 2);
        assert_eq!(session.cached_balance(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_leg_still_unwinds_the_other() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(100));
        exchange.reject_token("down");
        exchange.set_book(MockBookBuilder::new("up", Outcome::Up).bid(dec!(0.44), dec!(50)).build());
        let mut engine = engine(&exchange, false);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        assert!(matches!(
            &result,
            ExecutionResult::PartialFill { unwinds } if unwinds.len() == 1 && unwinds[0].outcome == Outcome::Up
        ));
        assert_eq!(exchange.cancelled(), vec!["mock-order-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn both_unfilled_cancels_everything() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(100));
        for token in ["up", "down"] {
            exchange.script_fills(token, vec![OrderStatusReport::new(OrderStatus::Submitted, dec!(0))]);
        }
        let mut engine = engine(&exchange, false);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        assert!(matches!(result, ExecutionResult::BothUnfilled { .. }));
        assert_eq!(exchange.cancelled().len(), 2);
        assert_eq!(session.cached_balance(), Some(dec!(100)));
        assert_eq!(exchange.submitted().len(), 2);
    }

    #[tokio::test]
    async fn insufficient_balance_blocks_submission() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(11));
        let mut engine = engine(&exchange, false);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        // 9.7 * 1.2 = 11.64 > 11; utilization 0.8 * 11 = 8.8 < 9.7 trips first.
        assert!(matches!(
            result,
            ExecutionResult::RiskRejected(RiskViolation::UtilizationExceeded { .. })
        ));
        assert!(exchange.submitted().is_empty());
    }

    #[tokio::test]
    async fn margin_check_after_risk() {
        let exchange = MockExchange::new();
        exchange.set_balance(dec!(12.5));
        let mut engine = engine(&exchange, false);
        engine.risk = Box::new(RiskManager::new(RiskLimits {
            max_daily_loss: dec!(0),
            max_position_size: dec!(0),
            max_trades_per_day: 0,
            min_balance_required: dec!(0),
            max_balance_utilization: dec!(1),
        }));
        engine.settings.balance_margin = dec!(1.3);
        let mut session = session(false);

        let result = engine.execute(&mut session, &opportunity()).await.unwrap();

        match result {
            ExecutionResult::InsufficientBalance { required, available } => {
                assert_eq!(required, dec!(12.61));
                assert_eq!(available, dec!(12.5));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
