//! In-memory exchange and resolver for tests.
//!
//! Nothing here touches the network. Order statuses are scripted per
//! token; every call is logged so tests can assert on what the engine
//! sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::discovery::MarketResolver;
use super::exchange::ExchangeClient;
use super::types::{Market, Outcome};
use crate::error::{MarketError, TradingError};
use crate::orderbook::types::{OutcomeBook, PriceLevel};
use crate::trading::{OrderParams, OrderStatus, OrderStatusReport, Position};

#[derive(Debug, Default)]
struct MockState {
    balance: Decimal,
    fail_balance: bool,
    book_failures_left: usize,
    books: HashMap<String, OutcomeBook>,
    positions: HashMap<String, Position>,
    rejected_tokens: HashSet<String>,
    fill_scripts: HashMap<String, VecDeque<OrderStatusReport>>,
    orders: HashMap<String, OrderParams>,
    submitted: Vec<OrderParams>,
    cancelled: Vec<String>,
    status_polls: usize,
    book_requests: usize,
    next_id: u64,
}

/// Scriptable [`ExchangeClient`].
///
/// Orders fill in full by default. Use [`MockExchange::script_fills`] to
/// make a token's orders go through a sequence of statuses; the last
/// one sticks.
#[derive(Debug, Clone, Default)]
pub struct MockExchange {
    state: Arc<Mutex<MockState>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state().balance = balance;
    }

    pub fn fail_balance(&self, fail: bool) {
        self.state().fail_balance = fail;
    }

    /// Make the next `count` book fetches fail.
    pub fn fail_next_book_fetches(&self, count: usize) {
        self.state().book_failures_left = count;
    }

    pub fn set_book(&self, book: OutcomeBook) {
        self.state().books.insert(book.token_id.clone(), book);
    }

    pub fn set_position(&self, position: Position) {
        self.state()
            .positions
            .insert(position.token_id.clone(), position);
    }

    /// Reject every order for `token_id` at submission.
    pub fn reject_token(&self, token_id: impl Into<String>) {
        self.state().rejected_tokens.insert(token_id.into());
    }

    /// Statuses reported, in order, for orders on `token_id`.
    pub fn script_fills(&self, token_id: impl Into<String>, reports: Vec<OrderStatusReport>) {
        self.state()
            .fill_scripts
            .insert(token_id.into(), reports.into());
    }

    /// Every leg passed to `submit_orders`, in order.
    pub fn submitted(&self) -> Vec<OrderParams> {
        self.state().submitted.clone()
    }

    /// Every order ID passed to `cancel_orders`.
    pub fn cancelled(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    pub fn status_polls(&self) -> usize {
        self.state().status_polls
    }

    pub fn book_requests(&self) -> usize {
        self.state().book_requests
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn submit_orders(&self, legs: &[OrderParams]) -> Vec<Result<String, TradingError>> {
        let mut state = self.state();
        legs.iter()
            .map(|leg| {
                state.submitted.push(leg.clone());
                if state.rejected_tokens.contains(&leg.token_id) {
                    return Err(TradingError::OrderRejected {
                        reason: "mock rejection".to_string(),
                    });
                }
                state.next_id += 1;
                let order_id = format!("mock-order-{}", state.next_id);
                state.orders.insert(order_id.clone(), leg.clone());
                Ok(order_id)
            })
            .collect()
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatusReport, TradingError> {
        let mut state = self.state();
        state.status_polls += 1;
        let order = state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| TradingError::StatusFailed {
                order_id: order_id.to_string(),
                reason: "unknown order".to_string(),
            })?;

        match state.fill_scripts.get_mut(&order.token_id) {
            Some(script) if script.len() > 1 => Ok(script.pop_front().unwrap_or_else(|| {
                OrderStatusReport::new(OrderStatus::Unknown, Decimal::ZERO)
            })),
            Some(script) => Ok(script
                .front()
                .cloned()
                .unwrap_or_else(|| OrderStatusReport::new(OrderStatus::Unknown, Decimal::ZERO))),
            None => Ok(OrderStatusReport::new(OrderStatus::Filled, order.size)),
        }
    }

    async fn cancel_orders(&self, order_ids: &[String]) -> Result<(), TradingError> {
        self.state().cancelled.extend(order_ids.iter().cloned());
        Ok(())
    }

    async fn get_balance(&self) -> Result<Decimal, TradingError> {
        let state = self.state();
        if state.fail_balance {
            return Err(TradingError::AccountFailed("mock balance failure".to_string()));
        }
        Ok(state.balance)
    }

    async fn get_positions(
        &self,
        token_ids: &[String],
    ) -> Result<HashMap<String, Position>, TradingError> {
        Ok(self
            .state()
            .positions
            .iter()
            .filter(|(token, _)| token_ids.is_empty() || token_ids.contains(token))
            .map(|(token, p)| (token.clone(), p.clone()))
            .collect())
    }

    async fn get_order_book(
        &self,
        token_id: &str,
        outcome: Outcome,
    ) -> Result<OutcomeBook, MarketError> {
        let mut state = self.state();
        state.book_requests += 1;
        if state.book_failures_left > 0 {
            state.book_failures_left -= 1;
            return Err(MarketError::BookFetchFailed {
                token_id: token_id.to_string(),
                reason: "mock book failure".to_string(),
            });
        }

        Ok(state
            .books
            .get(token_id)
            .cloned()
            .unwrap_or_else(|| OutcomeBook::empty(token_id, outcome)))
    }
}

/// Builder for books with common shapes.
pub struct MockBookBuilder {
    token_id: String,
    outcome: Outcome,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl MockBookBuilder {
    pub fn new(token_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            token_id: token_id.into(),
            outcome,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    pub fn bid(mut self, price: Decimal, size: Decimal) -> Self {
        self.bids.push(PriceLevel::new(price, size));
        self
    }

    pub fn ask(mut self, price: Decimal, size: Decimal) -> Self {
        self.asks.push(PriceLevel::new(price, size));
        self
    }

    /// Two levels each side around the given touch prices.
    pub fn with_spread(self, best_bid: Decimal, best_ask: Decimal, depth: Decimal) -> Self {
        let tick = Decimal::new(1, 2);
        self.bid(best_bid, depth)
            .bid(best_bid - tick, depth * Decimal::TWO)
            .ask(best_ask, depth)
            .ask(best_ask + tick, depth * Decimal::TWO)
    }

    pub fn build(mut self) -> OutcomeBook {
        self.bids.sort_by(|a, b| b.price.cmp(&a.price));
        self.asks.sort_by(|a, b| a.price.cmp(&b.price));

        let mut book = OutcomeBook::empty(self.token_id, self.outcome);
        book.bids = self.bids;
        book.asks = self.asks;
        book
    }
}

/// [`MarketResolver`] that hands out queued markets.
///
/// Once the queue is empty it keeps returning the previous market, which
/// the scheduler treats as "no successor yet".
#[derive(Debug, Clone, Default)]
pub struct MockResolver {
    queue: Arc<Mutex<VecDeque<Market>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockResolver {
    pub fn new(markets: Vec<Market>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(markets.into())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MarketResolver for MockResolver {
    async fn find_next(&self, previous: Option<&Market>) -> Result<Market, MarketError> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let next = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.or_else(|| previous.cloned())
            .ok_or(MarketError::NoActiveMarketFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(slug: &str) -> Market {
        Market {
            slug: slug.to_string(),
            id: "1".to_string(),
            up_token_id: "up".to_string(),
            down_token_id: "down".to_string(),
            start_timestamp: 0,
            end_timestamp: 900,
            question: None,
        }
    }

    #[tokio::test]
    async fn orders_fill_by_default() {
        let exchange = MockExchange::new();
        let ids = exchange
            .submit_orders(&[OrderParams::buy("up", dec!(0.45), dec!(10))])
            .await;
        let id = ids[0].as_ref().unwrap();

        let report = exchange.get_order_status(id).await.unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.filled, Some(dec!(10)));
    }

    #[tokio::test]
    async fn scripted_statuses_advance_then_stick() {
        let exchange = MockExchange::new();
        exchange.script_fills(
            "down",
            vec![
                OrderStatusReport::new(OrderStatus::Submitted, dec!(0)),
                OrderStatusReport::new(OrderStatus::Canceled, dec!(0)),
            ],
        );
        let ids = exchange
            .submit_orders(&[OrderParams::buy("down", dec!(0.5), dec!(5))])
            .await;
        let id = ids[0].as_ref().unwrap();

        assert_eq!(exchange.get_order_status(id).await.unwrap().status, OrderStatus::Submitted);
        assert_eq!(exchange.get_order_status(id).await.unwrap().status, OrderStatus::Canceled);
        assert_eq!(exchange.get_order_status(id).await.unwrap().status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn rejected_tokens_fail_at_submission() {
        let exchange = MockExchange::new();
        exchange.reject_token("down");
        let results = exchange
            .submit_orders(&[
                OrderParams::buy("up", dec!(0.45), dec!(5)),
                OrderParams::buy("down", dec!(0.5), dec!(5)),
            ])
            .await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(TradingError::OrderRejected { .. })));
        assert_eq!(exchange.submitted().len(), 2);
    }

    #[tokio::test]
    async fn book_failures_are_counted_down() {
        let exchange = MockExchange::new();
        exchange.set_book(
            MockBookBuilder::new("up", Outcome::Up)
                .with_spread(dec!(0.48), dec!(0.52), dec!(100))
                .build(),
        );
        exchange.fail_next_book_fetches(1);

        assert!(exchange.get_order_book("up", Outcome::Up).await.is_err());
        let book = exchange.get_order_book("up", Outcome::Up).await.unwrap();
        assert_eq!(book.best_ask(), Some(dec!(0.52)));
        assert_eq!(book.best_bid(), Some(dec!(0.48)));
        assert_eq!(exchange.book_requests(), 2);
    }

    #[tokio::test]
    async fn positions_filter_by_token() {
        let exchange = MockExchange::new();
        for (token, size) in [("up", dec!(10)), ("down", dec!(4))] {
            exchange.set_position(Position {
                token_id: token.to_string(),
                size,
                avg_price: dec!(0.5),
            });
        }

        let all = exchange.get_positions(&[]).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_up = exchange.get_positions(&["up".to_string()]).await.unwrap();
        assert_eq!(only_up.len(), 1);
        assert_eq!(only_up["up"].size, dec!(10));
    }

    #[test]
    fn builder_sorts_levels() {
        let book = MockBookBuilder::new("t", Outcome::Down)
            .bid(dec!(0.49), dec!(200))
            .bid(dec!(0.50), dec!(100))
            .ask(dec!(0.53), dec!(200))
            .ask(dec!(0.52), dec!(100))
            .build();

        assert_eq!(book.bids[0].price, dec!(0.50));
        assert_eq!(book.asks[0].price, dec!(0.52));
    }

    #[tokio::test]
    async fn resolver_repeats_previous_when_exhausted() {
        let resolver = MockResolver::new(vec![market("a-900")]);
        let first = resolver.find_next(None).await.unwrap();
        assert_eq!(first.slug, "a-900");

        let again = resolver.find_next(Some(&first)).await.unwrap();
        assert_eq!(again.slug, "a-900");
        assert!(resolver.find_next(None).await.is_err());
        assert_eq!(resolver.calls(), 3);
    }
}
