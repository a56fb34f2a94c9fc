//! Order-status normalization and fill polling.

use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use super::order::{OrderLegState, OrderStatus};
use crate::market::ExchangeClient;
use crate::utils::decimal_from_json;

/// Default timeout for a leg to fill.
pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(3);

/// Default poll interval for order status.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const STATUS_KEYS: &[&str] = &["status", "state", "order_status", "orderStatus"];
const FILLED_KEYS: &[&str] = &[
    "filled_size",
    "filledSize",
    "size_filled",
    "sizeFilled",
    "matched_size",
    "matchedSize",
    "filled",
];
const REMAINING_KEYS: &[&str] = &[
    "remaining_size",
    "remainingSize",
    "size_remaining",
    "sizeRemaining",
    "remaining",
];
const ORIGINAL_KEYS: &[&str] = &["original_size", "originalSize", "size", "order_size", "orderSize"];

const ORDER_ID_KEYS: &[&str] = &["orderID", "orderId", "order_id", "id"];
const NESTED_KEYS: &[&str] = &["order", "data", "result"];

/// Order status as reported by the exchange, after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatusReport {
    /// Normalized status.
    pub status: OrderStatus,
    /// Filled size, reported or derived.
    pub filled: Option<Decimal>,
    /// Remaining size.
    pub remaining: Option<Decimal>,
    /// Original size.
    pub original: Option<Decimal>,
}

impl OrderStatusReport {
    /// Report with only a status and filled size.
    pub fn new(status: OrderStatus, filled: Decimal) -> Self {
        Self {
            status,
            filled: Some(filled),
            remaining: None,
            original: None,
        }
    }

    /// Filled quantity, zero when unknown.
    pub fn filled_quantity(&self) -> Decimal {
        self.filled.unwrap_or(Decimal::ZERO)
    }
}

fn first_present<'a>(json: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| json.get(*key).filter(|v| !v.is_null()))
}

fn first_decimal(json: &Value, keys: &[&str]) -> Option<Decimal> {
    first_present(json, keys).and_then(decimal_from_json)
}

/// Normalize an order-status response.
///
/// Each field is read from the first alias present, in fixed priority
/// order. If no filled size is reported it is derived as
/// `max(0, original - remaining)`.
pub fn normalize_order_status(json: &Value) -> OrderStatusReport {
    let status = first_present(json, STATUS_KEYS)
        .and_then(Value::as_str)
        .map(OrderStatus::from_exchange)
        .unwrap_or(OrderStatus::Unknown);

    let remaining = first_decimal(json, REMAINING_KEYS);
    let original = first_decimal(json, ORIGINAL_KEYS);
    let filled = first_decimal(json, FILLED_KEYS).or_else(|| match (original, remaining) {
        (Some(original), Some(remaining)) => Some((original - remaining).max(Decimal::ZERO)),
        _ => None,
    });

    OrderStatusReport {
        status,
        filled,
        remaining,
        original,
    }
}

/// Extract order ID from an API response, looking into nested objects.
pub fn extract_order_id(result: &Value) -> Option<String> {
    for key in ORDER_ID_KEYS {
        match result.get(*key) {
            Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }

    NESTED_KEYS
        .iter()
        .filter_map(|key| result.get(*key))
        .find_map(extract_order_id)
}

/// Poll one leg until it is terminal or `timeout` elapses.
///
/// Polling errors are logged and retried. On timeout the last observed
/// state is returned; callers treat anything not filled as unfilled.
#[instrument(skip(client), fields(order_id = %order_id))]
pub async fn wait_for_fill(
    client: &dyn ExchangeClient,
    order_id: &str,
    requested: Decimal,
    timeout: Duration,
    poll_interval: Duration,
) -> OrderLegState {
    let deadline = Instant::now() + timeout;
    let mut leg = OrderLegState::submitted(order_id, requested);

    loop {
        match client.get_order_status(order_id).await {
            Ok(report) => {
                leg.status = report.status;
                leg.filled_quantity = report.filled_quantity();
                if leg.is_terminal() {
                    debug!(status = %leg.status, filled = %leg.filled_quantity, "Leg reached terminal state");
                    return leg;
                }
            }
            Err(e) => {
                warn!(error = %e, "Error getting order status");
            }
        }

        if Instant::now() + poll_interval > deadline {
            warn!(
                status = %leg.status,
                filled = %leg.filled_quantity,
                requested = %requested,
                "Order status polling timed out"
            );
            return leg;
        }
        sleep(poll_interval).await;
    }
}
