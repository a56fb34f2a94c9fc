//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use crate::error::BotError;
use crate::trading::TimeInForce;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Polymarket Credentials ===
    /// Wallet private key (hex, starts with 0x). Only required for live trading.
    #[serde(default)]
    pub polymarket_private_key: String,

    /// Optional pre-generated API key.
    #[serde(default)]
    pub polymarket_api_key: Option<String>,

    /// Optional API secret.
    #[serde(default)]
    pub polymarket_api_secret: Option<String>,

    /// Optional API passphrase.
    #[serde(default)]
    pub polymarket_api_passphrase: Option<String>,

    // === Wallet Configuration ===
    /// Signature type: 0=EOA, 1=Magic.link, 2=Gnosis Safe.
    #[serde(default)]
    pub polymarket_signature_type: u8,

    /// Proxy wallet address (required for Magic.link).
    #[serde(default)]
    pub polymarket_funder: Option<String>,

    // === Trading Parameters ===
    /// Maximum combined worst-case cost to trigger a paired buy (e.g., 0.99).
    #[serde(default = "default_target_cost")]
    pub target_pair_cost: Decimal,

    /// Number of shares per leg (minimum 5).
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,

    /// Order type: FOK, FAK, or GTC.
    #[serde(default = "default_order_type")]
    pub order_type: String,

    /// Balance safety margin (1.2 = 20% extra).
    #[serde(default = "default_balance_margin")]
    pub balance_margin: Decimal,

    // === Operation Modes ===
    /// Simulation mode (no real orders).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Starting balance for simulation.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: Decimal,

    /// Minimum seconds between execution attempts.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    // === Market Discovery ===
    /// Force the first market slug (bypasses auto-discovery for that instance).
    #[serde(default)]
    pub polymarket_market_slug: Option<String>,

    // === Endpoints ===
    /// Drive scans from the WebSocket market feed instead of polling.
    #[serde(default)]
    pub use_wss: bool,

    /// WebSocket base URL.
    #[serde(default = "default_ws_url")]
    pub polymarket_ws_url: String,

    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub polymarket_clob_url: String,

    /// Gamma (market metadata) API base URL.
    #[serde(default = "default_gamma_url")]
    pub polymarket_gamma_url: String,

    /// Data API base URL (positions).
    #[serde(default = "default_data_url")]
    pub polymarket_data_url: String,

    // === Timing ===
    /// Sleep between polling-mode scan cycles.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Minimum spacing between streaming-mode re-evaluations.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Per-leg fill wait.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,

    /// Order status polling interval.
    #[serde(default = "default_order_poll_interval_ms")]
    pub order_poll_interval_ms: u64,

    /// HTTP request timeout.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Idle HTTP connections kept per host.
    #[serde(default = "default_http_pool_size")]
    pub http_pool_size: usize,

    /// Fixed delay before a WebSocket reconnect.
    #[serde(default = "default_ws_reconnect_delay_ms")]
    pub ws_reconnect_delay_ms: u64,

    /// WebSocket ping interval.
    #[serde(default = "default_ws_heartbeat_interval_s")]
    pub ws_heartbeat_interval_s: u64,

    /// Minimum spacing between repeated "connecting" log lines.
    #[serde(default = "default_ws_connect_log_interval_s")]
    pub ws_connect_log_interval_s: u64,

    // === Risk Limits (0 disables a limit) ===
    /// Maximum net loss per day.
    #[serde(default)]
    pub max_daily_loss: Decimal,

    /// Maximum shares per leg.
    #[serde(default)]
    pub max_position_size: Decimal,

    /// Maximum trades per day.
    #[serde(default)]
    pub max_trades_per_day: u32,

    /// Balance below which trading stops.
    #[serde(default = "default_min_balance")]
    pub min_balance_required: Decimal,

    /// Largest fraction of the balance a single trade may use.
    #[serde(default = "default_max_utilization")]
    pub max_balance_utilization: Decimal,

    // === Trade Log ===
    /// Persist trades to `trade_log_file`.
    #[serde(default = "default_true")]
    pub enable_stats: bool,

    /// JSON trade log path.
    #[serde(default = "default_trade_log_file")]
    pub trade_log_file: String,

    // === Server Configuration ===
    /// HTTP server port for the status API.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Expose Prometheus metrics.
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Prometheus exporter port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Log filter used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_target_cost() -> Decimal {
    Decimal::new(99, 2) // 0.99
}

fn default_order_size() -> Decimal {
    Decimal::new(5, 0) // 5 shares
}

fn default_order_type() -> String {
    "FOK".to_string()
}

fn default_balance_margin() -> Decimal {
    Decimal::new(12, 1) // 1.2
}

fn default_true() -> bool {
    true
}

fn default_sim_balance() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_cooldown() -> u64 {
    10
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com".to_string()
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_data_url() -> String {
    "https://data-api.polymarket.com".to_string()
}

fn default_scan_interval_ms() -> u64 {
    100
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_order_timeout_ms() -> u64 {
    3_000
}

fn default_order_poll_interval_ms() -> u64 {
    250
}

fn default_http_timeout_ms() -> u64 {
    2_000
}

fn default_http_pool_size() -> usize {
    10
}

fn default_ws_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_ws_heartbeat_interval_s() -> u64 {
    10
}

fn default_ws_connect_log_interval_s() -> u64 {
    10
}

fn default_min_balance() -> Decimal {
    Decimal::new(10, 0)
}

fn default_max_utilization() -> Decimal {
    Decimal::new(8, 1) // 0.8
}

fn default_trade_log_file() -> String {
    "trades.json".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Build configuration from explicit key/value pairs (keys as env names).
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter(vars.into_iter().map(|(k, v)| (k.into(), v.into())))
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.dry_run {
            if self.polymarket_private_key.is_empty() {
                return Err("POLYMARKET_PRIVATE_KEY is required when DRY_RUN=false".to_string());
            }

            let Some(hex_part) = self.polymarket_private_key.strip_prefix("0x") else {
                return Err("POLYMARKET_PRIVATE_KEY must start with 0x".to_string());
            };

            if hex_part.len() != 64 || hex::decode(hex_part).is_err() {
                return Err("POLYMARKET_PRIVATE_KEY must be 32 bytes of hex".to_string());
            }
        }

        if self.order_size < Decimal::new(5, 0) {
            return Err("ORDER_SIZE must be at least 5".to_string());
        }

        if self.target_pair_cost <= Decimal::ZERO || self.target_pair_cost >= Decimal::ONE {
            return Err("TARGET_PAIR_COST must be between 0 and 1.0".to_string());
        }

        if self.time_in_force().is_none() {
            return Err(format!("ORDER_TYPE must be FOK, FAK or GTC, got {}", self.order_type));
        }

        if self.balance_margin < Decimal::ONE {
            return Err("BALANCE_MARGIN must be at least 1.0".to_string());
        }

        if self.max_balance_utilization <= Decimal::ZERO
            || self.max_balance_utilization > Decimal::ONE
        {
            return Err("MAX_BALANCE_UTILIZATION must be in (0, 1]".to_string());
        }

        for (name, raw) in [
            ("POLYMARKET_WS_URL", &self.polymarket_ws_url),
            ("POLYMARKET_CLOB_URL", &self.polymarket_clob_url),
            ("POLYMARKET_GAMMA_URL", &self.polymarket_gamma_url),
            ("POLYMARKET_DATA_URL", &self.polymarket_data_url),
        ] {
            Url::parse(raw).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
        }

        Ok(())
    }

    /// Load from the environment and validate; the startup path.
    pub fn load_checked() -> crate::Result<Self> {
        let config = Self::load()?;
        config.validate().map_err(BotError::InvalidConfig)?;
        Ok(config)
    }

    /// Parsed order type, if recognised.
    pub fn time_in_force(&self) -> Option<TimeInForce> {
        self.order_type.parse().ok()
    }

    /// Check if using Magic.link (signature_type == 1).
    pub fn is_magic_link(&self) -> bool {
        self.polymarket_signature_type == 1
    }

    /// Market WebSocket endpoint.
    pub fn market_ws_url(&self) -> String {
        format!("{}/ws/market", self.polymarket_ws_url.trim_end_matches('/'))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn order_poll_interval(&self) -> Duration {
        Duration::from_millis(self.order_poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const KEY: &str = "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn config_from(vars: &[(&str, &str)]) -> Config {
        Config::from_vars(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .expect("config should deserialize")
    }

    #[test]
    fn defaults_are_sensible() {
        let config = config_from(&[]);

        assert_eq!(config.target_pair_cost, dec!(0.99));
        assert_eq!(config.order_size, dec!(5));
        assert_eq!(config.time_in_force(), Some(TimeInForce::FOK));
        assert_eq!(config.cooldown_seconds, 10);
        assert_eq!(config.min_balance_required, dec!(10));
        assert_eq!(config.max_balance_utilization, dec!(0.8));
        assert_eq!(config.trade_log_file, "trades.json");
        assert!(config.dry_run);
        assert!(config.enable_stats);
        assert!(!config.use_wss);
        assert_eq!(config.order_timeout(), Duration::from_secs(3));
        assert_eq!(config.order_poll_interval(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_overrides_from_vars() {
        let config = config_from(&[
            ("TARGET_PAIR_COST", "0.98"),
            ("ORDER_SIZE", "12"),
            ("ORDER_TYPE", "fak"),
            ("USE_WSS", "true"),
            ("MAX_TRADES_PER_DAY", "3"),
        ]);

        assert_eq!(config.target_pair_cost, dec!(0.98));
        assert_eq!(config.order_size, dec!(12));
        assert_eq!(config.time_in_force(), Some(TimeInForce::FAK));
        assert!(config.use_wss);
        assert_eq!(config.max_trades_per_day, 3);
    }

    #[test]
    fn validate_requires_key_only_when_live() {
        assert!(config_from(&[("DRY_RUN", "false")]).validate().is_err());
        assert!(config_from(&[("DRY_RUN", "false"), ("POLYMARKET_PRIVATE_KEY", "abc123")])
            .validate()
            .is_err());
        assert!(config_from(&[("DRY_RUN", "false"), ("POLYMARKET_PRIVATE_KEY", KEY)])
            .validate()
            .is_ok());
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        assert!(config_from(&[("ORDER_SIZE", "4")]).validate().is_err());
        assert!(config_from(&[("TARGET_PAIR_COST", "1.0")]).validate().is_err());
        assert!(config_from(&[("ORDER_TYPE", "IOC")]).validate().is_err());
        assert!(config_from(&[("BALANCE_MARGIN", "0.9")]).validate().is_err());
        assert!(config_from(&[("MAX_BALANCE_UTILIZATION", "1.5")]).validate().is_err());
        assert!(config_from(&[("POLYMARKET_CLOB_URL", "not a url")]).validate().is_err());
    }

    #[test]
    fn market_ws_url_appends_channel_path() {
        let config = config_from(&[("POLYMARKET_WS_URL", "wss://example.test/")]);
        assert_eq!(config.market_ws_url(), "wss://example.test/ws/market");
    }
}
