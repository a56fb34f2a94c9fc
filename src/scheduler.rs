//! Scan/execute loop across consecutive market instances.
//!
//! Two drive modes share one cycle: polling fetches both books on a fixed
//! interval, streaming re-scans the in-memory books on feed notifications.
//! Both finalize an instance exactly once at expiry and then roll over to
//! the next one through the [`MarketResolver`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use strum::Display;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::api::StatusBoard;
use crate::arbitrage::{
    check_arbitrage, diagnose_no_opportunity, ExecutionResult, PairedExecutionEngine, ScanParams,
};
use crate::config::Config;
use crate::error::MarketError;
use crate::market::{ExchangeClient, Market, MarketResolver, MarketResult, Outcome};
use crate::metrics;
use crate::orderbook::{MarketDataStream, OutcomeBook, StreamConfig};
use crate::session::Session;
use crate::utils::Shutdown;

/// Unix-seconds clock used for expiry checks.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn wall_clock() -> Clock {
    Arc::new(|| OffsetDateTime::now_utc().unix_timestamp())
}

/// What drives re-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DriveMode {
    Polling,
    Streaming,
}

impl DriveMode {
    /// Wait before asking the resolver again when no successor is available.
    pub fn rollover_retry(&self) -> Duration {
        match self {
            DriveMode::Polling => Duration::from_secs(30),
            DriveMode::Streaming => Duration::from_secs(10),
        }
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub mode: DriveMode,
    /// Sleep between polling cycles.
    pub scan_interval: Duration,
    /// Minimum spacing between streaming re-evaluations.
    pub debounce: Duration,
    /// How often streaming mode checks expiry while the feed is quiet.
    pub expiry_check: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: if config.use_wss {
                DriveMode::Streaming
            } else {
                DriveMode::Polling
            },
            scan_interval: config.scan_interval(),
            debounce: config.debounce(),
            expiry_check: Duration::from_secs(1),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            mode: DriveMode::Polling,
            scan_interval: Duration::from_millis(100),
            debounce: Duration::from_millis(50),
            expiry_check: Duration::from_secs(1),
        }
    }
}

/// Drops re-evaluation requests that arrive closer together than `spacing`.
#[derive(Debug, Clone)]
pub struct Debounce {
    spacing: Duration,
    last: Option<tokio::time::Instant>,
}

impl Debounce {
    pub fn new(spacing: Duration) -> Self {
        Self { spacing, last: None }
    }

    /// `true` if a re-evaluation may run now; records it if so.
    pub fn ready(&mut self, now: tokio::time::Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.spacing => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// How one polling cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Books fetched and scanned.
    Scanned,
    /// Books could not be fetched even after the sequential retry.
    FetchFailed,
    /// The instance has expired; nothing was fetched.
    Expired,
}

/// Single logical worker driving scans and executions.
pub struct ScanScheduler {
    client: Arc<dyn ExchangeClient>,
    resolver: Arc<dyn MarketResolver>,
    engine: PairedExecutionEngine,
    session: Session,
    params: ScanParams,
    settings: SchedulerSettings,
    stream_config: Option<StreamConfig>,
    board: StatusBoard,
    shutdown: Shutdown,
    clock: Clock,
    finalized: HashSet<String>,
    last_asks: (Option<Decimal>, Option<Decimal>),
    scans: u64,
}

impl ScanScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        resolver: Arc<dyn MarketResolver>,
        engine: PairedExecutionEngine,
        session: Session,
        params: ScanParams,
        settings: SchedulerSettings,
        board: StatusBoard,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            resolver,
            engine,
            session,
            params,
            settings,
            stream_config: None,
            board,
            shutdown,
            clock: wall_clock(),
            finalized: HashSet::new(),
            last_asks: (None, None),
            scans: 0,
        }
    }

    /// Market feed settings for streaming mode.
    pub fn with_stream(mut self, config: StreamConfig) -> Self {
        self.stream_config = Some(config);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn engine(&self) -> &PairedExecutionEngine {
        &self.engine
    }

    pub fn finalized(&self) -> &HashSet<String> {
        &self.finalized
    }

    fn is_expired(&self, market: &Market) -> bool {
        market.is_closed_at((self.clock)())
    }

    /// Run until shutdown.
    pub async fn run(&mut self) {
        let mode = match (self.settings.mode, self.stream_config.clone()) {
            (DriveMode::Streaming, None) => {
                warn!("Streaming requested without feed settings, falling back to polling");
                DriveMode::Polling
            }
            (mode, _) => mode,
        };
        info!(mode = %mode, dry_run = self.session.is_dry_run(), "Scheduler started");

        let mut previous: Option<Market> = None;
        while let Some(market) = self.acquire_market(previous.as_ref(), mode).await {
            self.begin_instance(&market).await;

            match mode {
                DriveMode::Polling => self.drive_polling(&market).await,
                DriveMode::Streaming => self.drive_streaming(&market).await,
            }

            if self.shutdown.is_requested() && !self.is_expired(&market) {
                break;
            }
            self.finalize_instance(&market).await;
            previous = Some(market);
        }

        self.board.set_market(None).await;
        self.log_shutdown_summary();
    }

    /// Ask the resolver for an instance other than `previous`, waiting
    /// between attempts. `None` on shutdown.
    pub async fn acquire_market(
        &mut self,
        previous: Option<&Market>,
        mode: DriveMode,
    ) -> Option<Market> {
        loop {
            if self.shutdown.is_requested() {
                return None;
            }
            info!("Searching for next market instance...");

            match self.resolver.find_next(previous).await {
                Ok(market) if previous.is_some_and(|p| p.slug == market.slug) => {
                    info!(
                        slug = %market.slug,
                        retry_s = mode.rollover_retry().as_secs(),
                        "Next instance not available yet"
                    );
                }
                Ok(market) if self.finalized.contains(&market.slug) => {
                    info!(slug = %market.slug, "Resolver returned a finished instance");
                }
                Ok(market) => return Some(market),
                Err(MarketError::NoActiveMarketFound) => {
                    warn!(retry_s = mode.rollover_retry().as_secs(), "No active market found");
                }
                Err(e) => {
                    warn!(error = %e, retry_s = mode.rollover_retry().as_secs(), "Market lookup failed");
                }
            }

            self.board.set_market(None).await;
            if !self.shutdown.sleep(mode.rollover_retry()).await {
                return None;
            }
        }
    }

    async fn begin_instance(&mut self, market: &Market) {
        self.last_asks = (None, None);
        self.board.set_market(Some(market.slug.clone())).await;

        info!("========================================");
        info!("ARBITRAGE SCANNER STARTED");
        info!("========================================");
        info!("Market: {}", market.slug);
        info!("UP Token: {}", market.up_token_id);
        info!("DOWN Token: {}", market.down_token_id);
        info!("Time remaining: {}", market.time_remaining_str());
        info!(
            "Mode: {}",
            if self.session.is_dry_run() { "SIMULATION" } else { "LIVE TRADING" }
        );
        info!("========================================");
    }

    async fn drive_polling(&mut self, market: &Market) {
        while !self.shutdown.is_requested() {
            if self.poll_cycle(market).await == CycleOutcome::Expired {
                return;
            }
            if !self.shutdown.sleep(self.settings.scan_interval).await {
                return;
            }
        }
    }

    /// One polling cycle: fetch both books together, then scan.
    pub async fn poll_cycle(&mut self, market: &Market) -> CycleOutcome {
        if self.is_expired(market) {
            return CycleOutcome::Expired;
        }
        match self.fetch_books(market).await {
            Ok((up, down)) => {
                self.evaluate(market, &up, &down).await;
                CycleOutcome::Scanned
            }
            Err(e) => {
                metrics::inc_scan_failures();
                warn!(error = %e, "Order book fetch failed, skipping cycle");
                CycleOutcome::FetchFailed
            }
        }
    }

    /// Fetch both books concurrently; on failure retry once sequentially.
    async fn fetch_books(&self, market: &Market) -> Result<(OutcomeBook, OutcomeBook), MarketError> {
        let start = Instant::now();
        let (up, down) = tokio::join!(
            self.client.get_order_book(&market.up_token_id, Outcome::Up),
            self.client.get_order_book(&market.down_token_id, Outcome::Down),
        );

        let books = match (up, down) {
            (Ok(up), Ok(down)) => (up, down),
            (up, down) => {
                let reason = up.err().or(down.err()).map(|e| e.to_string()).unwrap_or_default();
                debug!(error = %reason, "Concurrent book fetch failed, retrying sequentially");
                let up = self
                    .client
                    .get_order_book(&market.up_token_id, Outcome::Up)
                    .await?;
                let down = self
                    .client
                    .get_order_book(&market.down_token_id, Outcome::Down)
                    .await?;
                (up, down)
            }
        };

        metrics::record_orderbook_fetch_latency(start);
        Ok(books)
    }

    async fn drive_streaming(&mut self, market: &Market) {
        let Some(stream_config) = self.stream_config.clone() else {
            return;
        };
        let feed = Arc::new(MarketDataStream::new(stream_config, market));

        // Stops this instance's feed at rollover as well as on shutdown.
        let feed_shutdown = Shutdown::new();
        let forward = {
            let global = self.shutdown.clone();
            let feed_shutdown = feed_shutdown.clone();
            tokio::spawn(async move {
                global.wait().await;
                feed_shutdown.trigger();
            })
        };
        let mut updates = feed.clone().spawn(feed_shutdown.clone());
        let mut debounce = Debounce::new(self.settings.debounce);
        let shutdown = self.shutdown.clone();

        info!("Market stream started, waiting for book updates...");

        while !shutdown.is_requested() && !self.is_expired(market) {
            tokio::select! {
                update = updates.recv() => {
                    let Some(update) = update else {
                        warn!("Market stream stopped");
                        break;
                    };
                    if !debounce.ready(tokio::time::Instant::now()) {
                        continue;
                    }
                    debug!(asset_id = %update.asset_id, kind = %update.kind, "Book update");

                    let up = feed.snapshot(&market.up_token_id);
                    let down = feed.snapshot(&market.down_token_id);
                    if let (Some(up), Some(down)) = (up, down) {
                        self.evaluate(market, &up, &down).await;
                    }
                }
                _ = shutdown.sleep(self.settings.expiry_check) => {}
            }
        }

        feed_shutdown.trigger();
        forward.abort();
        debug!(reconnects = feed.reconnects(), defects = feed.defects(), "Market stream finished");
    }

    /// Scan one pair of books and act on the result.
    #[instrument(skip_all, fields(market = %market.slug))]
    pub async fn evaluate(&mut self, market: &Market, up: &OutcomeBook, down: &OutcomeBook) {
        self.scans += 1;
        self.board.inc_scans();
        self.last_asks = (up.best_ask(), down.best_ask());

        let start = Instant::now();
        match check_arbitrage(market, up, down, &self.params) {
            Ok(Some(opportunity)) => {
                metrics::record_opportunity_detection_latency(start);
                metrics::inc_opportunities_detected();
                self.board.inc_opportunities();

                match self.engine.execute(&mut self.session, &opportunity).await {
                    Ok(result) => {
                        if matches!(
                            result,
                            ExecutionResult::BothFilled { .. } | ExecutionResult::Simulated { .. }
                        ) {
                            self.board.inc_trades();
                        }
                        self.board.add_stranded(result.stranded_legs() as u64);
                        info!(result = ?result, "Execution finished");
                    }
                    Err(e) => error!(error = %e, "Execution failed"),
                }
            }
            Ok(None) => {
                let diagnosis = diagnose_no_opportunity(up, down, &self.params);
                match self.settings.mode {
                    DriveMode::Polling => info!(
                        "[Scan #{}] No arbitrage: {} [Time: {}]",
                        self.scans,
                        diagnosis,
                        market.time_remaining_str()
                    ),
                    DriveMode::Streaming => debug!(scan = self.scans, "No arbitrage: {}", diagnosis),
                }
            }
            Err(e) => warn!(error = %e, "Books unusable this cycle"),
        }
    }

    /// Close out an expired instance. Runs at most once per slug.
    pub async fn finalize_instance(&mut self, market: &Market) {
        if !self.finalized.insert(market.slug.clone()) {
            debug!(slug = %market.slug, "Instance already finalized");
            return;
        }

        let (final_up, final_down) = self.last_asks;
        let result = MarketResult::from_prices(final_up, final_down);
        match self
            .engine
            .recorder_mut()
            .update_market_result(&market.slug, &result)
        {
            Ok(0) => {}
            Ok(updated) => debug!(updated, result = %result, "Trades stamped with market result"),
            Err(e) => warn!(error = %e, "Failed to store market result"),
        }

        let sim_before_claim = self.session.sim_balance();
        let finished = self.session.reset_instance();
        let recorder_stats = self.engine.recorder().stats();
        let daily = self.engine.risk_mut().daily_stats();

        info!("========================================");
        info!("MARKET CLOSED - FINAL SUMMARY");
        info!("========================================");
        info!("Market: {}", market.slug);
        info!("Result: {}", result);
        info!(
            "Mode: {}",
            if self.session.is_dry_run() { "SIMULATION" } else { "LIVE TRADING" }
        );
        info!("----------------------------------------");
        info!("Total opportunities detected: {}", finished.opportunities);
        info!("Total trades executed: {}", finished.trades_executed);
        info!("Total shares bought: {}", finished.total_shares_bought);
        info!("----------------------------------------");
        info!("Total invested: ${}", finished.total_invested);
        info!("Expected payout: ${}", finished.expected_payout);
        info!(
            "Expected profit: ${} ({:.2}%)",
            finished.expected_profit(),
            finished.profit_pct()
        );
        info!("----------------------------------------");
        info!(
            "Recorded trades: {} (win rate {:.1}%, avg profit ${:.4})",
            recorder_stats.total_trades,
            recorder_stats.win_rate,
            recorder_stats.average_profit_per_trade
        );
        info!(
            "Today: {} trades, net PnL ${}",
            daily.trades_count,
            daily.net_pnl()
        );
        if self.session.is_dry_run() {
            info!("----------------------------------------");
            info!("Sim start cash: ${}", self.session.sim_start_balance());
            info!("Sim cash remaining: ${}", sim_before_claim);
            info!("Sim cash after claim: ${}", self.session.sim_balance());
            info!(
                "Sim net change: ${}",
                self.session.sim_balance() - self.session.sim_start_balance()
            );
        }
        info!("========================================");

        metrics::inc_markets_finalized();
        self.board.inc_finalized();
        self.board.set_market(None).await;
    }

    fn log_shutdown_summary(&self) {
        let stats = self.engine.recorder().stats();
        info!(
            scans = self.scans,
            instances = self.finalized.len(),
            recorded_trades = stats.total_trades,
            expected_profit = %stats.total_expected_profit,
            "Scheduler stopped"
        );
        if self.session.is_dry_run() {
            info!(
                sim_start = %self.session.sim_start_balance(),
                sim_balance = %self.session.sim_balance(),
                "Simulated cash"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::ExecutionSettings;
    use crate::market::{MockBookBuilder, MockExchange, MockResolver};
    use crate::recorder::MemoryTradeLog;
    use crate::risk::{RiskLimits, RiskManager};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn market(slug: &str, end: i64) -> Market {
        Market {
            slug: slug.to_string(),
            id: slug.to_string(),
            up_token_id: format!("{slug}-up"),
            down_token_id: format!("{slug}-down"),
            start_timestamp: end - Market::WINDOW_SECONDS,
            end_timestamp: end,
            question: None,
        }
    }

    fn scheduler(
        exchange: &MockExchange,
        resolver: MockResolver,
        now: Arc<AtomicI64>,
    ) -> ScanScheduler {
        let client: Arc<dyn ExchangeClient> = Arc::new(exchange.clone());
        let engine = PairedExecutionEngine::new(
            client.clone(),
            Box::new(RiskManager::new(RiskLimits {
                max_daily_loss: dec!(0),
                max_position_size: dec!(0),
                max_trades_per_day: 0,
                min_balance_required: dec!(0),
                max_balance_utilization: dec!(1),
            })),
            Box::new(MemoryTradeLog::new()),
            ExecutionSettings::default(),
        );
        ScanScheduler::new(
            client,
            Arc::new(resolver),
            engine,
            Session::with(true, Duration::from_secs(10), dec!(100)),
            ScanParams {
                order_size: dec!(10),
                threshold: dec!(0.99),
            },
            SchedulerSettings::default(),
            StatusBoard::new(true, "polling"),
            Shutdown::new(),
        )
        .with_clock(Arc::new(move || now.load(Ordering::SeqCst)))
    }

    fn cheap_books(exchange: &MockExchange, market: &Market) {
        exchange.set_book(
            MockBookBuilder::new(&market.up_token_id, Outcome::Up)
                .with_spread(dec!(0.45), dec!(0.47), dec!(100))
                .build(),
        );
        exchange.set_book(
            MockBookBuilder::new(&market.down_token_id, Outcome::Down)
                .with_spread(dec!(0.48), dec!(0.50), dec!(100))
                .build(),
        );
    }

    #[test]
    fn debounce_ignores_fast_requests() {
        let start = tokio::time::Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(50));

        assert!(debounce.ready(start));
        assert!(!debounce.ready(start + Duration::from_millis(20)));
        assert!(debounce.ready(start + Duration::from_millis(50)));
        assert!(!debounce.ready(start + Duration::from_millis(99)));
    }

    #[test]
    fn retry_waits_per_mode() {
        assert_eq!(DriveMode::Polling.rollover_retry(), Duration::from_secs(30));
        assert_eq!(DriveMode::Streaming.rollover_retry(), Duration::from_secs(10));
        assert_eq!(DriveMode::Streaming.to_string(), "streaming");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_cycle_executes_opportunity() {
        let exchange = MockExchange::new();
        let current = market("btc-updown-15m-900", 1800);
        cheap_books(&exchange, &current);
        let mut scheduler = scheduler(&exchange, MockResolver::default(), Arc::new(AtomicI64::new(1000)));

        assert_eq!(scheduler.poll_cycle(&current).await, CycleOutcome::Scanned);
        assert_eq!(scheduler.session().instance().trades_executed, 1);
        assert_eq!(scheduler.session().sim_balance(), dec!(90.3));
        assert_eq!(scheduler.board.counters().trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_falls_back_to_sequential_once() {
        let exchange = MockExchange::new();
        let current = market("btc-updown-15m-900", 1800);
        cheap_books(&exchange, &current);
        let mut scheduler = scheduler(&exchange, MockResolver::default(), Arc::new(AtomicI64::new(1000)));

        exchange.fail_next_book_fetches(1);
        assert_eq!(scheduler.poll_cycle(&current).await, CycleOutcome::Scanned);
        assert_eq!(exchange.book_requests(), 4);

        exchange.fail_next_book_fetches(3);
        assert_eq!(scheduler.poll_cycle(&current).await, CycleOutcome::FetchFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_instance_is_not_scanned() {
        let exchange = MockExchange::new();
        let current = market("btc-updown-15m-900", 1800);
        let mut scheduler = scheduler(&exchange, MockResolver::default(), Arc::new(AtomicI64::new(1800)));

        assert_eq!(scheduler.poll_cycle(&current).await, CycleOutcome::Expired);
        assert_eq!(exchange.book_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_runs_once_per_slug() {
        let exchange = MockExchange::new();
        let current = market("btc-updown-15m-900", 1800);
        cheap_books(&exchange, &current);
        let mut scheduler = scheduler(&exchange, MockResolver::default(), Arc::new(AtomicI64::new(1000)));

        scheduler.poll_cycle(&current).await;
        scheduler.finalize_instance(&current).await;
        scheduler.finalize_instance(&current).await;

        assert_eq!(scheduler.finalized().len(), 1);
        assert_eq!(scheduler.board.counters().finalized_instances, 1);
        // Expected payout of 10 claimed back into simulated cash.
        assert_eq!(scheduler.session().sim_balance(), dec!(100.3));
        assert_eq!(scheduler.session().instance().trades_executed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_a_new_slug() {
        let exchange = MockExchange::new();
        let first = market("btc-updown-15m-900", 1800);
        let second = market("btc-updown-15m-1800", 2700);
        let resolver = MockResolver::new(vec![first.clone(), second.clone()]);
        let mut scheduler = scheduler(&exchange, resolver.clone(), Arc::new(AtomicI64::new(1000)));

        let got = scheduler.acquire_market(None, DriveMode::Polling).await;
        assert_eq!(got.as_ref().map(|m| m.slug.as_str()), Some("btc-updown-15m-900"));

        let got = scheduler.acquire_market(Some(&first), DriveMode::Polling).await;
        assert_eq!(got, Some(second.clone()));

        // Queue empty: resolver repeats `second`, so the scheduler keeps waiting.
        let waiting = scheduler.acquire_market(Some(&second), DriveMode::Polling);
        let timed_out = tokio::time::timeout(Duration::from_secs(65), waiting).await;
        assert!(timed_out.is_err());
        assert_eq!(resolver.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_acquire() {
        let exchange = MockExchange::new();
        let mut scheduler = scheduler(&exchange, MockResolver::default(), Arc::new(AtomicI64::new(1000)));
        scheduler.shutdown.trigger();

        assert_eq!(scheduler.acquire_market(None, DriveMode::Polling).await, None);
    }
}
