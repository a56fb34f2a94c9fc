//! Polymarket REST client implementing [`ExchangeClient`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::exchange::ExchangeClient;
use super::types::Outcome;
use crate::config::Config;
use crate::error::{MarketError, TradingError};
use crate::metrics;
use crate::orderbook::{OutcomeBook, PriceLevel};
use crate::signing::RequestSigner;
use crate::trading::{
    extract_order_id, normalize_order_status, ApiPosition, OrderParams, OrderStatusReport,
    Position, Side, TimeInForce,
};
use crate::utils::{decimal_from_json, parse_decimal};

/// Collateral balances are reported in 1e6 base units.
const COLLATERAL_SCALE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Polymarket CLOB API client.
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL for CLOB API.
    clob_url: String,
    /// Base URL for the data API (positions).
    data_url: String,
    /// Present when a private key is configured.
    signer: Option<RequestSigner>,
}

/// Order book response from API.
#[derive(Debug, Clone, Deserialize)]
struct OrderBookResponse {
    #[serde(default)]
    bids: Vec<Value>,
    #[serde(default)]
    asks: Vec<Value>,
}

/// Signed order body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedOrder {
    token_id: String,
    side: Side,
    price: String,
    size: String,
    fee_rate_bps: String,
    nonce: String,
    expiration: String,
    taker: String,
    maker: String,
    signer: String,
    signature_type: u8,
    signature: String,
}

/// Order submission request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    order: SignedOrder,
    owner: String,
    order_type: TimeInForce,
}

/// Balance allowance response from API.
#[derive(Debug, Clone, Deserialize)]
struct BalanceAllowanceResponse {
    #[serde(default)]
    balance: Value,
}

impl PolymarketClient {
    /// Create a client from config with low-latency HTTP settings.
    ///
    /// Without a private key the client can still read books; order and
    /// account calls return [`TradingError::AuthenticationFailed`].
    pub fn new(config: &Config) -> Result<Self, TradingError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .connect_timeout(Duration::from_millis(500))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(config.http_pool_size)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let signer = if config.polymarket_private_key.is_empty() {
            None
        } else {
            Some(RequestSigner::from_config(config)?)
        };

        Ok(Self {
            http,
            clob_url: config.polymarket_clob_url.trim_end_matches('/').to_string(),
            data_url: config.polymarket_data_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    /// Get the CLOB base URL.
    pub fn clob_url(&self) -> &str {
        &self.clob_url
    }

    fn signer(&self) -> Result<&RequestSigner, TradingError> {
        self.signer.as_ref().ok_or_else(|| {
            TradingError::AuthenticationFailed("no private key configured".to_string())
        })
    }

    /// Wallet address derived from the private key.
    pub fn address(&self) -> Result<&str, TradingError> {
        Ok(self.signer()?.address())
    }

    async fn authed(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, TradingError> {
        let headers = self.signer()?.auth_headers().await?;
        Ok(headers
            .into_iter()
            .fold(request, |req, (key, value)| req.header(key, value)))
    }

    /// Build and sign one leg.
    async fn build_order(&self, params: &OrderParams) -> Result<OrderRequest, TradingError> {
        params.validate().map_err(TradingError::InvalidParams)?;
        let signer = self.signer()?;

        let nonce = chrono::Utc::now().timestamp_millis().to_string();
        let expiration = "0".to_string();
        let payload = format!(
            "{}:{}:{}:{}:{}:{}",
            params.token_id, params.side, params.price, params.size, nonce, expiration
        );

        let signature = {
            let _timer = metrics::timer_signing();
            signer.sign_payload(payload.as_bytes()).await?
        };

        Ok(OrderRequest {
            order: SignedOrder {
                token_id: params.token_id.clone(),
                side: params.side,
                price: params.price.to_string(),
                size: params.size.to_string(),
                fee_rate_bps: "0".to_string(),
                nonce,
                expiration,
                taker: "0x0000000000000000000000000000000000000000".to_string(),
                maker: signer.maker().to_string(),
                signer: signer.address().to_string(),
                signature_type: signer.kind().as_u8(),
                signature,
            },
            owner: signer.address().to_string(),
            order_type: params.tif,
        })
    }

    /// Submit all signed legs in one request.
    async fn post_batch(
        &self,
        orders: &[OrderRequest],
    ) -> Result<Vec<Result<String, TradingError>>, TradingError> {
        let url = format!("{}/orders", self.clob_url);
        let start = Instant::now();
        let response = self
            .authed(self.http.post(&url).json(orders))
            .await?
            .send()
            .await?;
        metrics::record_http_latency(start, "orders");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::SubmissionFailed(format!(
                "batch submission failed: HTTP {} - {}",
                status, body
            )));
        }

        let body: Value = response.json().await?;
        let Value::Array(entries) = body else {
            return Err(TradingError::SubmissionFailed(
                "batch response is not an array".to_string(),
            ));
        };
        if entries.len() != orders.len() {
            return Err(TradingError::SubmissionFailed(format!(
                "batch response has {} entries for {} orders",
                entries.len(),
                orders.len()
            )));
        }

        Ok(entries.iter().map(order_result).collect())
    }

    /// Submit one signed leg.
    async fn post_order(&self, order: &OrderRequest) -> Result<String, TradingError> {
        let url = format!("{}/order", self.clob_url);
        let start = Instant::now();
        let response = self
            .authed(self.http.post(&url).json(order))
            .await?
            .send()
            .await
            .map_err(|e| TradingError::SubmissionFailed(format!("HTTP request failed: {}", e)))?;
        metrics::record_http_latency(start, "order");

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_seconds = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(TradingError::RateLimited { retry_after_seconds });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::SubmissionFailed(format!(
                "Order submission failed: HTTP {} - {}",
                status, body
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            TradingError::SubmissionFailed(format!("Failed to parse response: {}", e))
        })?;
        order_result(&body)
    }
}

/// Interpret one order-submission response entry.
fn order_result(entry: &Value) -> Result<String, TradingError> {
    let error = ["errorMsg", "error"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .filter(|msg| !msg.is_empty());
    let success = entry.get("success").and_then(Value::as_bool).unwrap_or(true);

    if let Some(reason) = error {
        return Err(TradingError::OrderRejected {
            reason: reason.to_string(),
        });
    }
    if !success {
        return Err(TradingError::OrderRejected {
            reason: "exchange reported success=false".to_string(),
        });
    }

    extract_order_id(entry)
        .ok_or_else(|| TradingError::SubmissionFailed("No order ID in response".to_string()))
}

/// Parse book levels, dropping malformed entries, and sort them.
fn book_from_response(token_id: &str, outcome: Outcome, response: OrderBookResponse) -> OutcomeBook {
    let parse_levels = |raw: &[Value]| -> Vec<PriceLevel> {
        raw.iter()
            .filter_map(|level| {
                let price = decimal_from_json(level.get("price")?)?;
                let size = decimal_from_json(level.get("size")?)?;
                (price > Decimal::ZERO && size > Decimal::ZERO).then(|| PriceLevel::new(price, size))
            })
            .collect()
    };

    let mut book = OutcomeBook::empty(token_id, outcome);
    book.bids = parse_levels(&response.bids);
    book.asks = parse_levels(&response.asks);
    book.bids.sort_by(|a, b| b.price.cmp(&a.price));
    book.asks.sort_by(|a, b| a.price.cmp(&b.price));
    book
}

#[async_trait]
impl ExchangeClient for PolymarketClient {
    /// Signs every leg before sending any, then posts them as one batch.
    /// If the batch call fails the legs are sent back-to-back instead.
    #[instrument(skip(self, legs), fields(legs = legs.len()))]
    async fn submit_orders(&self, legs: &[OrderParams]) -> Vec<Result<String, TradingError>> {
        let start = Instant::now();

        let mut signed = Vec::with_capacity(legs.len());
        for params in legs {
            match self.build_order(params).await {
                Ok(order) => signed.push(order),
                Err(e) => {
                    // A leg that cannot be built fails the whole pair before anything is sent.
                    warn!(error = %e, token_id = %params.token_id, "Failed to build order");
                    let reason = e.to_string();
                    return legs
                        .iter()
                        .map(|_| Err(TradingError::SubmissionFailed(reason.clone())))
                        .collect();
                }
            }
        }

        let results = match self.post_batch(&signed).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Batch submission failed, falling back to sequential");
                let mut results = Vec::with_capacity(signed.len());
                for order in &signed {
                    results.push(self.post_order(order).await);
                }
                results
            }
        };
        metrics::record_order_submit_latency(start);

        let success = results.iter().filter(|r| r.is_ok()).count();
        metrics::inc_orders_submitted(success as u64);
        metrics::inc_orders_failed((results.len() - success) as u64);
        info!(
            total = results.len(),
            success,
            failed = results.len() - success,
            latency_ms = start.elapsed().as_millis() as u64,
            "Order submission complete"
        );

        results
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatusReport, TradingError> {
        let url = format!("{}/data/order/{}", self.clob_url, order_id);
        let status_failed = |reason: String| TradingError::StatusFailed {
            order_id: order_id.to_string(),
            reason,
        };

        let start = Instant::now();
        let response = self
            .authed(self.http.get(&url))
            .await?
            .send()
            .await
            .map_err(|e| status_failed(format!("HTTP request failed: {}", e)))?;
        metrics::record_http_latency(start, "order_status");

        if !response.status().is_success() {
            return Err(status_failed(format!("HTTP {}", response.status())));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| status_failed(format!("Failed to parse response: {}", e)))?;

        Ok(normalize_order_status(&json))
    }

    #[instrument(skip(self))]
    async fn cancel_orders(&self, order_ids: &[String]) -> Result<(), TradingError> {
        if order_ids.is_empty() {
            return Ok(());
        }

        let url = format!("{}/orders", self.clob_url);
        let cancel_failed = |reason: String| TradingError::CancelFailed {
            order_ids: order_ids.to_vec(),
            reason,
        };

        let response = self
            .authed(self.http.delete(&url).json(order_ids))
            .await?
            .send()
            .await
            .map_err(|e| cancel_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(cancel_failed(format!("HTTP {}", response.status())));
        }

        debug!(count = order_ids.len(), "Orders cancelled");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_balance(&self) -> Result<Decimal, TradingError> {
        let url = format!("{}/balance-allowance", self.clob_url);
        let signature_type = self.signer()?.kind().as_u8().to_string();

        let start = Instant::now();
        let response = self
            .authed(self.http.get(&url).query(&[
                ("asset_type", "COLLATERAL"),
                ("signature_type", signature_type.as_str()),
            ]))
            .await?
            .send()
            .await?;
        metrics::record_http_latency(start, "balance");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradingError::AccountFailed(format!(
                "Balance request failed: HTTP {} - {}",
                status, body
            )));
        }

        let balance_response: BalanceAllowanceResponse = response
            .json()
            .await
            .map_err(|e| TradingError::AccountFailed(format!("Failed to parse balance: {}", e)))?;

        let raw = match &balance_response.balance {
            Value::String(s) => parse_decimal(s),
            other => decimal_from_json(other),
        }
        .unwrap_or(Decimal::ZERO);

        let balance = raw / COLLATERAL_SCALE;
        debug!(balance = %balance, "Retrieved collateral balance");
        Ok(balance)
    }

    #[instrument(skip(self))]
    async fn get_positions(
        &self,
        token_ids: &[String],
    ) -> Result<HashMap<String, Position>, TradingError> {
        let signer = self.signer()?;
        let url = format!("{}/positions", self.data_url);

        let response = self
            .http
            .get(&url)
            .query(&[("user", signer.maker())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TradingError::AccountFailed(format!(
                "Positions request failed: HTTP {}",
                response.status()
            )));
        }

        let positions: Vec<ApiPosition> = response
            .json()
            .await
            .map_err(|e| TradingError::AccountFailed(format!("Failed to parse positions: {}", e)))?;

        let filtered: HashMap<String, Position> = positions
            .iter()
            .filter_map(ApiPosition::to_position)
            .filter(|p| token_ids.is_empty() || token_ids.contains(&p.token_id))
            .map(|p| (p.token_id.clone(), p))
            .collect();

        debug!(count = filtered.len(), "Retrieved filtered positions");
        Ok(filtered)
    }

    #[instrument(skip(self), fields(token_id = %token_id))]
    async fn get_order_book(
        &self,
        token_id: &str,
        outcome: Outcome,
    ) -> Result<OutcomeBook, MarketError> {
        let url = format!("{}/book", self.clob_url);
        let start = Instant::now();

        let response = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketError::BookFetchFailed {
                token_id: token_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let book: OrderBookResponse = response
            .json()
            .await
            .map_err(|e| MarketError::ParseError(format!("Failed to parse order book: {}", e)))?;
        metrics::record_orderbook_fetch_latency(start);

        Ok(book_from_response(token_id, outcome, book))
    }
}
