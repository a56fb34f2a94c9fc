//! Streaming market-data feed for Polymarket CLOB order books.
//!
//! Features:
//! - Snapshot (`book`) and delta (`price_change`) routing into [`OrderBook`]s
//! - Fixed-delay reconnection with stale-book clearing
//! - Heartbeat pings and throttled connection logging

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use dashmap::DashMap;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::book::OrderBook;
use super::types::{BookEventKind, BookSide, BookUpdate, OutcomeBook, PriceLevel};
use crate::config::Config;
use crate::error::WsError;
use crate::market::Market;
use crate::metrics;
use crate::utils::{decimal_from_json, Shutdown};

/// Notifications produced by one inbound message.
pub type BookUpdates = SmallVec<[BookUpdate; 4]>;

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Full market channel URL (`.../ws/market`).
    pub url: String,
    /// Fixed wait before reconnecting.
    pub reconnect_delay: Duration,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Minimum spacing between "connecting" log lines.
    pub connect_log_interval: Duration,
}

impl StreamConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.market_ws_url(),
            reconnect_delay: Duration::from_millis(config.ws_reconnect_delay_ms),
            heartbeat_interval: Duration::from_secs(config.ws_heartbeat_interval_s.max(1)),
            connect_log_interval: Duration::from_secs(config.ws_connect_log_interval_s),
        }
    }
}

/// Price change entry of a `price_change` message.
#[derive(Debug, Clone, Deserialize)]
struct WsPriceChange {
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    size: Value,
    #[serde(default)]
    side: String,
    #[serde(default)]
    hash: Option<String>,
}

/// Inbound event. Level lists are kept raw so malformed entries can be
/// dropped one by one.
#[derive(Debug, Clone, Deserialize)]
struct WsEvent {
    event_type: Option<String>,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    bids: Option<Vec<Value>>,
    #[serde(default)]
    asks: Option<Vec<Value>>,
    #[serde(default)]
    buys: Option<Vec<Value>>,
    #[serde(default)]
    sells: Option<Vec<Value>>,
    #[serde(default)]
    price_changes: Option<Vec<WsPriceChange>>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    hash: Option<String>,
}

/// Subscription message.
#[derive(Debug, Serialize)]
struct SubscribeMessage<'a> {
    assets_ids: &'a [String],
    #[serde(rename = "type")]
    msg_type: &'static str,
}

/// Normalize a level given as `{"price":..,"size":..}` or `[price, size]`.
fn parse_level(raw: &Value) -> Option<PriceLevel> {
    let (price, size) = match raw {
        Value::Object(map) => (map.get("price")?, map.get("size")?),
        Value::Array(pair) if pair.len() >= 2 => (&pair[0], &pair[1]),
        _ => return None,
    };
    Some(PriceLevel::new(decimal_from_json(price)?, decimal_from_json(size)?))
}

fn parse_timestamp(raw: Option<&Value>) -> Option<i64> {
    match raw? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Rate-limits repeated "connecting" lines during long outages.
#[derive(Debug)]
struct ConnectLogThrottle {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u32,
}

impl ConnectLogThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns the number of attempts suppressed since the last log line,
    /// or `None` when this attempt should stay quiet.
    fn check(&mut self, now: Instant) -> Option<u32> {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last = Some(now);
                Some(std::mem::take(&mut self.suppressed))
            }
        }
    }
}

enum Inbound {
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Heartbeat,
    Shutdown,
}

/// Live order books for one market instance, fed by the venue's stream.
pub struct MarketDataStream {
    /// Book per subscribed asset ID.
    books: DashMap<String, OrderBook>,
    /// Subscribed asset IDs, in subscription order.
    asset_ids: Vec<String>,
    config: StreamConfig,
    connected: AtomicBool,
    reconnects: AtomicU64,
}

impl MarketDataStream {
    /// Create empty books for both outcome tokens of `market`.
    pub fn new(config: StreamConfig, market: &Market) -> Self {
        let books = DashMap::new();
        books.insert(
            market.up_token_id.clone(),
            OrderBook::new(market.up_token_id.clone(), crate::market::Outcome::Up),
        );
        books.insert(
            market.down_token_id.clone(),
            OrderBook::new(market.down_token_id.clone(), crate::market::Outcome::Down),
        );

        Self {
            books,
            asset_ids: vec![market.up_token_id.clone(), market.down_token_id.clone()],
            config,
            connected: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Consistent materialized copy of a book, taken under its lock.
    pub fn snapshot(&self, asset_id: &str) -> Option<OutcomeBook> {
        self.books.get(asset_id).map(|book| book.to_outcome_book())
    }

    /// Malformed entries dropped across all books.
    pub fn defects(&self) -> u64 {
        self.books.iter().map(|book| book.defects()).sum()
    }

    /// Mark every book stale until its next snapshot.
    pub fn clear_books(&self) {
        for mut book in self.books.iter_mut() {
            book.clear();
        }
    }

    /// Apply one raw message to the books.
    ///
    /// Payloads may be a single event or an array of events. Unknown event
    /// types and unsubscribed assets are ignored.
    pub fn apply_message(&self, text: &str) -> BookUpdates {
        let mut updates = BookUpdates::new();

        let payload: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %WsError::ParseError(e.to_string()), "Ignoring stream message");
                return updates;
            }
        };

        let events = match payload {
            Value::Array(items) => items,
            other => vec![other],
        };

        for raw in events {
            let event: WsEvent = match serde_json::from_value(raw) {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "Ignoring unparseable stream event");
                    continue;
                }
            };

            match event.event_type.as_deref() {
                Some("book") => self.apply_book_event(event, &mut updates),
                Some("price_change") => self.apply_price_change(event, &mut updates),
                _ => {}
            }
        }

        updates
    }

    fn apply_book_event(&self, event: WsEvent, updates: &mut BookUpdates) {
        let Some(asset_id) = event.asset_id else {
            return;
        };
        let Some(mut book) = self.books.get_mut(&asset_id) else {
            return;
        };

        let timestamp = parse_timestamp(event.timestamp.as_ref());
        let raw_bids = event.bids.or(event.buys).unwrap_or_default();
        let raw_asks = event.asks.or(event.sells).unwrap_or_default();

        let mut malformed = 0u64;
        let mut normalize = |raw: Vec<Value>| -> Vec<PriceLevel> {
            raw.iter()
                .filter_map(|v| {
                    let level = parse_level(v);
                    if level.is_none() {
                        malformed += 1;
                    }
                    level
                })
                .collect()
        };
        let bids = normalize(raw_bids);
        let asks = normalize(raw_asks);

        let defects_before = book.defects();
        for _ in 0..malformed {
            book.record_defect();
        }
        book.apply_snapshot(bids, asks, timestamp, event.hash);
        metrics::inc_book_defects(book.defects() - defects_before);

        push_update(updates, asset_id, BookEventKind::Snapshot);
    }

    fn apply_price_change(&self, event: WsEvent, updates: &mut BookUpdates) {
        let timestamp = parse_timestamp(event.timestamp.as_ref());

        for change in event.price_changes.unwrap_or_default() {
            let Some(asset_id) = change.asset_id.or_else(|| event.asset_id.clone()) else {
                continue;
            };
            let Some(mut book) = self.books.get_mut(&asset_id) else {
                continue;
            };

            let parsed = (
                change.side.parse::<BookSide>().ok(),
                decimal_from_json(&change.price),
                decimal_from_json(&change.size),
            );
            let (Some(side), Some(price), Some(size)) = parsed else {
                book.record_defect();
                metrics::inc_book_defects(1);
                continue;
            };

            let defects_before = book.defects();
            if book.apply_delta(side, price, size, timestamp) {
                book.set_hash(change.hash.or_else(|| event.hash.clone()));
                push_update(updates, asset_id, BookEventKind::Delta);
            }
            metrics::inc_book_defects(book.defects() - defects_before);
        }
    }

    /// Endless stream of book notifications.
    ///
    /// Reconnects after any failure (including a clean close by the peer)
    /// with a fixed delay, clearing the books in between. Ends on shutdown.
    pub fn updates(self: Arc<Self>, shutdown: Shutdown) -> impl Stream<Item = BookUpdate> {
        stream! {
            let mut throttle = ConnectLogThrottle::new(self.config.connect_log_interval);

            while !shutdown.is_requested() {
                if let Some(suppressed) = throttle.check(Instant::now()) {
                    info!(
                        url = %self.config.url,
                        assets = ?self.asset_ids,
                        suppressed_attempts = suppressed,
                        "Connecting to market stream"
                    );
                }

                match self.connect().await {
                    Ok(ws) => {
                        let (mut write, mut read) = ws.split();
                        self.connected.store(true, Ordering::SeqCst);
                        info!(assets = self.asset_ids.len(), "Subscribed to market stream");

                        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
                        heartbeat.tick().await;

                        loop {
                            let inbound = tokio::select! {
                                frame = read.next() => Inbound::Frame(frame),
                                _ = heartbeat.tick() => Inbound::Heartbeat,
                                _ = shutdown.wait() => Inbound::Shutdown,
                            };

                            match inbound {
                                Inbound::Frame(Some(Ok(Message::Text(text)))) => {
                                    let start = Instant::now();
                                    metrics::inc_ws_messages_received();
                                    let updates = self.apply_message(&text);
                                    metrics::record_ws_message_latency(start);
                                    for update in updates {
                                        yield update;
                                    }
                                }
                                Inbound::Frame(Some(Ok(Message::Close(frame)))) => {
                                    let err = WsError::ConnectionClosed {
                                        code: frame.as_ref().map(|f| u16::from(f.code)),
                                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                                    };
                                    warn!(error = %err, "Market stream closed by peer");
                                    break;
                                }
                                Inbound::Frame(Some(Ok(_))) => {}
                                Inbound::Frame(Some(Err(e))) => {
                                    error!(error = %WsError::from(e), "Market stream error");
                                    break;
                                }
                                Inbound::Frame(None) => {
                                    warn!("Market stream ended");
                                    break;
                                }
                                Inbound::Heartbeat => {
                                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                                        warn!(error = %WsError::SendFailed(e.to_string()), "Heartbeat failed");
                                        break;
                                    }
                                }
                                Inbound::Shutdown => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, url = %self.config.url, "Market stream connection failed");
                    }
                }

                self.connected.store(false, Ordering::SeqCst);
                self.clear_books();
                if shutdown.is_requested() {
                    break;
                }

                self.reconnects.fetch_add(1, Ordering::SeqCst);
                metrics::inc_ws_reconnects();
                debug!(delay_ms = self.config.reconnect_delay.as_millis() as u64, "Reconnecting after delay");
                if !shutdown.sleep(self.config.reconnect_delay).await {
                    break;
                }
            }
        }
    }

    async fn connect(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        WsError,
    > {
        let (mut ws, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        let subscribe = SubscribeMessage {
            assets_ids: &self.asset_ids,
            msg_type: "MARKET",
        };
        let msg_json =
            serde_json::to_string(&subscribe).map_err(|e| WsError::SendFailed(e.to_string()))?;

        ws.send(Message::Text(msg_json))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;

        Ok(ws)
    }

    /// Run the feed in the background, forwarding notifications to a channel.
    ///
    /// Notifications that do not fit are dropped: the books themselves stay
    /// current, and the consumer always scans the latest state.
    pub fn spawn(self: Arc<Self>, shutdown: Shutdown) -> mpsc::Receiver<BookUpdate> {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let updates = self.updates(shutdown);
            futures::pin_mut!(updates);

            while let Some(update) = updates.next().await {
                match tx.try_send(update) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        metrics::inc_ws_notifications_dropped();
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        info!("Notification channel closed, stopping market stream");
                        return;
                    }
                }
            }
        });

        rx
    }
}

fn push_update(updates: &mut BookUpdates, asset_id: String, kind: BookEventKind) {
    let duplicate = updates
        .iter()
        .any(|u| u.asset_id == asset_id && u.kind == kind);
    if !duplicate {
        updates.push(BookUpdate { asset_id, kind });
    }
}
