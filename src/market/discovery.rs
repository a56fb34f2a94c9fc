//! Market instance resolution for rolling 15-minute windows.

use std::str::FromStr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::types::{GammaMarket, Market, Outcome};
use crate::config::Config;
use crate::error::MarketError;

/// Slug prefix used when nothing else is known.
pub const DEFAULT_SLUG_PREFIX: &str = "btc-updown-15m-";

static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>.+-)(?P<ts>\d+)$").expect("valid regex"));

/// Finds the market instance that follows `previous`.
#[async_trait]
pub trait MarketResolver: Send + Sync {
    /// Next open instance. With `None`, the current one.
    async fn find_next(&self, previous: Option<&Market>) -> Result<Market, MarketError>;
}

/// Split a slug into its prefix and window start.
pub fn split_slug(slug: &str) -> Option<(&str, i64)> {
    let captures = SLUG_PATTERN.captures(slug)?;
    let prefix = captures.name("prefix")?.as_str();
    let ts = captures.name("ts")?.as_str().parse().ok()?;
    Some((prefix, ts))
}

/// Get the next market slug based on current slug.
pub fn next_slug(slug: &str) -> Result<String, MarketError> {
    let (prefix, ts) = split_slug(slug).ok_or_else(|| {
        MarketError::ParseError(format!("Slug not in expected format: {}", slug))
    })?;
    Ok(format!("{}{}", prefix, ts + Market::WINDOW_SECONDS))
}

/// Slug of the window containing `now`.
pub fn window_slug(prefix: &str, now: i64) -> String {
    let start = now - now.rem_euclid(Market::WINDOW_SECONDS);
    format!("{}{}", prefix, start)
}

/// Decode a field that is either a JSON array of strings or a string
/// holding one.
fn string_list(value: &Value) -> Vec<String> {
    let decoded;
    let array = match value {
        Value::Array(items) => items,
        Value::String(raw) => {
            decoded = serde_json::from_str::<Value>(raw).unwrap_or(Value::Null);
            match &decoded {
                Value::Array(items) => items,
                _ => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    array
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Turn a Gamma market entry into a [`Market`].
pub fn parse_gamma_market(raw: GammaMarket) -> Result<Market, MarketError> {
    let slug = raw
        .slug
        .ok_or_else(|| MarketError::ParseError("market has no slug".to_string()))?;

    let tokens = string_list(&raw.clob_token_ids);
    if tokens.len() != 2 {
        return Err(MarketError::ParseError(format!(
            "Expected 2 token IDs, got {}",
            tokens.len()
        )));
    }

    let outcomes: Vec<Outcome> = string_list(&raw.outcomes)
        .iter()
        .filter_map(|label| Outcome::from_str(label.trim()).ok())
        .collect();
    let (up_token_id, down_token_id) = match outcomes.as_slice() {
        [Outcome::Down, Outcome::Up] => (tokens[1].clone(), tokens[0].clone()),
        _ => (tokens[0].clone(), tokens[1].clone()),
    };

    let end_from_date = raw
        .end_date
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .map(|dt| dt.unix_timestamp());
    let (start_timestamp, end_timestamp) = match (split_slug(&slug), end_from_date) {
        (Some((_, start)), _) => (start, start + Market::WINDOW_SECONDS),
        (None, Some(end)) => (end - Market::WINDOW_SECONDS, end),
        (None, None) => {
            return Err(MarketError::ParseError(format!(
                "Could not determine end time for {}",
                slug
            )))
        }
    };

    let id = match raw.id {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };

    Ok(Market {
        slug,
        id,
        up_token_id,
        down_token_id,
        start_timestamp,
        end_timestamp,
        question: raw.question,
    })
}

/// Resolver backed by the Gamma markets API and computed window slugs.
#[derive(Debug, Clone)]
pub struct GammaMarketResolver {
    http: reqwest::Client,
    gamma_url: String,
    forced_slug: Option<String>,
}

impl GammaMarketResolver {
    pub fn new(config: &Config) -> Result<Self, MarketError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.http_timeout_ms.max(5_000)))
            .build()?;

        Ok(Self {
            http,
            gamma_url: config.polymarket_gamma_url.trim_end_matches('/').to_string(),
            forced_slug: config.polymarket_market_slug.clone(),
        })
    }

    /// Fetch one market by slug.
    #[instrument(skip(self))]
    pub async fn fetch_market(&self, slug: &str) -> Result<(Market, bool), MarketError> {
        let url = format!("{}/markets", self.gamma_url);
        let response = self
            .http
            .get(&url)
            .query(&[("slug", slug)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketError::FetchFailed {
                slug: slug.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let markets: Vec<GammaMarket> = response.json().await.map_err(|e| {
            MarketError::ParseError(format!("Failed to parse Gamma API response: {}", e))
        })?;

        let raw = markets
            .into_iter()
            .find(|m| m.slug.as_deref() == Some(slug))
            .ok_or_else(|| MarketError::FetchFailed {
                slug: slug.to_string(),
                reason: "slug not found".to_string(),
            })?;

        let closed = raw.closed.unwrap_or(false);
        Ok((parse_gamma_market(raw)?, closed))
    }

    /// Slugs to try, most likely first.
    pub fn candidate_slugs(&self, previous: Option<&Market>, now: i64) -> Vec<String> {
        let mut candidates = Vec::new();
        let prefix = previous
            .map(|m| m.slug.as_str())
            .or(self.forced_slug.as_deref())
            .and_then(split_slug)
            .map(|(prefix, _)| prefix.to_string())
            .unwrap_or_else(|| DEFAULT_SLUG_PREFIX.to_string());

        match previous {
            Some(prev) => candidates.extend(next_slug(&prev.slug).ok()),
            None => candidates.extend(self.forced_slug.clone()),
        }
        candidates.push(window_slug(&prefix, now));
        candidates.push(window_slug(&prefix, now + Market::WINDOW_SECONDS));

        let mut seen = std::collections::HashSet::new();
        candidates.retain(|slug| {
            previous.map_or(true, |prev| prev.slug != *slug) && seen.insert(slug.clone())
        });
        candidates
    }
}

#[async_trait]
impl MarketResolver for GammaMarketResolver {
    async fn find_next(&self, previous: Option<&Market>) -> Result<Market, MarketError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();

        for slug in self.candidate_slugs(previous, now) {
            debug!(slug = %slug, "Checking market slug");
            match self.fetch_market(&slug).await {
                Ok((market, closed)) if !closed && !market.is_closed_at(now) => {
                    info!(slug = %market.slug, ends_in = %market.time_remaining_str(), "Found market");
                    return Ok(market);
                }
                Ok(_) => debug!(slug = %slug, "Market exists but is closed"),
                Err(e) => debug!(slug = %slug, error = %e, "Slug not available"),
            }
        }

        Err(MarketError::NoActiveMarketFound)
    }
}
