//! Live smoke tests against the real Polymarket endpoints.
//!
//! Account tests require a valid POLYMARKET_PRIVATE_KEY environment variable.
//! Run with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use updown_arb::config::Config;
use updown_arb::market::{ExchangeClient, GammaMarketResolver, MarketResolver, Outcome, PolymarketClient};
use updown_arb::orderbook::{MarketDataStream, StreamConfig};
use updown_arb::utils::Shutdown;

/// Config from the environment with a usable private key, if any.
fn account_config() -> Option<Config> {
    let config = Config::load().ok()?;
    let key = config.polymarket_private_key.trim_start_matches("0x");
    if key.len() != 64 || key.starts_with("1234") {
        return None;
    }
    Some(config)
}

fn public_config() -> Config {
    Config::from_vars([("DRY_RUN", "true")]).unwrap()
}

#[tokio::test]
#[ignore = "requires POLYMARKET_PRIVATE_KEY"]
async fn test_get_address() {
    let Some(config) = account_config() else {
        println!("Skipping: POLYMARKET_PRIVATE_KEY not set or invalid");
        return;
    };

    let client = PolymarketClient::new(&config).unwrap();
    let address = client.address().unwrap();

    assert!(address.starts_with("0x"), "Invalid address format");
    assert_eq!(address.len(), 42, "Address should be 42 characters");
}

#[tokio::test]
#[ignore = "requires POLYMARKET_PRIVATE_KEY"]
async fn test_get_balance_and_positions() {
    let Some(config) = account_config() else {
        println!("Skipping: POLYMARKET_PRIVATE_KEY not set or invalid");
        return;
    };

    let client = PolymarketClient::new(&config).unwrap();

    let balance = client.get_balance().await;
    assert!(balance.is_ok(), "Failed to get balance: {:?}", balance.err());
    println!("Balance: ${}", balance.unwrap());

    let positions = client.get_positions(&[]).await;
    assert!(positions.is_ok(), "Failed to get positions: {:?}", positions.err());
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_resolve_market_and_fetch_books() {
    let config = public_config();
    let resolver = GammaMarketResolver::new(&config).unwrap();

    let market = match resolver.find_next(None).await {
        Ok(m) => m,
        Err(e) => {
            println!("No active market right now: {}", e);
            return;
        }
    };
    assert!(market.slug.starts_with("btc-updown-15m-"));
    assert_ne!(market.up_token_id, market.down_token_id);

    let client = PolymarketClient::new(&config).unwrap();
    let up = client
        .get_order_book(&market.up_token_id, Outcome::Up)
        .await
        .unwrap();
    assert_eq!(up.outcome, Outcome::Up);
    assert!(!up.is_inverted());
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_market_stream_receives_snapshots() {
    let config = public_config();
    let resolver = GammaMarketResolver::new(&config).unwrap();
    let Ok(market) = resolver.find_next(None).await else {
        println!("No active market right now");
        return;
    };

    let shutdown = Shutdown::new();
    let feed = Arc::new(MarketDataStream::new(StreamConfig::from_config(&config), &market));
    let mut updates = feed.clone().spawn(shutdown.clone());

    let first = tokio::time::timeout(Duration::from_secs(15), updates.recv()).await;
    shutdown.trigger();

    let update = first.expect("no book update within 15s").expect("stream closed");
    assert!(market.outcome_of(&update.asset_id).is_some());
    assert!(feed.snapshot(&update.asset_id).is_some());
}
