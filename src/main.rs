//! UP/DOWN paired arbitrage engine entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use updown_arb::api::{create_router, StatusBoard};
use updown_arb::arbitrage::{ExecutionSettings, PairedExecutionEngine, ScanParams};
use updown_arb::config::Config;
use updown_arb::market::{ExchangeClient, GammaMarketResolver, MarketResolver, PolymarketClient};
use updown_arb::metrics;
use updown_arb::orderbook::{mid_price, MarketDataStream, StreamConfig};
use updown_arb::recorder::{JsonTradeLog, MemoryTradeLog, TradeRecorder};
use updown_arb::risk::{RiskLimits, RiskManager};
use updown_arb::scheduler::{DriveMode, ScanScheduler, SchedulerSettings};
use updown_arb::session::Session;
use updown_arb::signing::RequestSigner;
use updown_arb::utils::{install_signal_handlers, shutdown_signal, Shutdown};

/// Paired UP/DOWN arbitrage engine for Polymarket 15-minute markets.
#[derive(Parser, Debug)]
#[command(name = "updown-arb")]
#[command(about = "Buys both outcomes of a 15-minute market when the pair costs less than $1")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true, env = "VERBOSE")]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan/execute loop (default).
    Run {
        /// Override DRY_RUN.
        #[arg(long)]
        dry_run: Option<bool>,

        /// Status API port (overrides PORT).
        #[arg(short, long)]
        port: Option<u16>,

        /// Drive scans from the market stream instead of polling.
        #[arg(long)]
        websocket: bool,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Check wallet balance and positions.
    CheckBalance,

    /// Resolve the current market instance.
    DiscoverMarket,

    /// Watch the market stream (diagnostic).
    WsTest {
        /// How long to listen.
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs);

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::CheckBalance) => cmd_check_balance().await,
        Some(Command::DiscoverMarket) => cmd_discover_market().await,
        Some(Command::WsTest { seconds }) => cmd_ws_test(seconds).await,
        Some(Command::Run {
            dry_run,
            port,
            websocket,
        }) => cmd_run(dry_run, port, websocket).await,
        None => cmd_run(None, None, false).await,
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("updown_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn mode_label(dry_run: bool) -> &'static str {
    if dry_run {
        "SIMULATION"
    } else {
        "LIVE TRADING"
    }
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("UPDOWN ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    if let Err(e) = config.validate() {
        println!("FAILED");
        println!("  Error: {}", e);
        return Err(anyhow::anyhow!("configuration validation failed"));
    }
    println!("OK");

    print!("Checking private key... ");
    if config.polymarket_private_key.is_empty() {
        println!("NOT SET (dry-run only)");
    } else {
        match RequestSigner::from_config(&config) {
            Ok(signer) => {
                println!("OK");
                println!("  Wallet address: {}", signer.address());
                println!("  Maker address: {}", signer.maker());
            }
            Err(e) => {
                println!("FAILED");
                println!("  Error: {}", e);
                return Err(anyhow::anyhow!("private key invalid"));
            }
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!(
        "  Signature Type: {} ({})",
        config.polymarket_signature_type,
        match config.polymarket_signature_type {
            0 => "EOA - Standard wallet",
            1 => "Magic.link - Proxy wallet",
            2 => "Gnosis Safe - Multi-sig",
            _ => "Unknown",
        }
    );
    if config.is_magic_link() && config.polymarket_funder.is_none() {
        println!("  WARNING: Magic.link requires POLYMARKET_FUNDER to be set!");
    }
    println!("  Target Pair Cost: ${}", config.target_pair_cost);
    println!("  Order Size: {} shares", config.order_size);
    println!("  Order Type: {}", config.order_type);
    println!("  Balance Margin: {}x", config.balance_margin);
    println!("  Dry Run: {}", config.dry_run);
    println!("  Cooldown: {}s", config.cooldown_seconds);
    println!(
        "  Drive: {}",
        if config.use_wss { "streaming" } else { "polling" }
    );
    println!(
        "  Risk: min balance ${}, utilization {}, daily loss {}, trades/day {}",
        config.min_balance_required,
        config.max_balance_utilization,
        config.max_daily_loss,
        config.max_trades_per_day
    );
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Check wallet balance and positions.
async fn cmd_check_balance() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("UPDOWN ARB - BALANCE CHECK");
    println!("======================================================================");

    let config = Config::load_checked()?;
    println!("Host: {}", config.polymarket_clob_url);
    println!("Signature Type: {}", config.polymarket_signature_type);

    print!("\n1. Creating client... ");
    let client = PolymarketClient::new(&config)?;
    println!("OK");

    print!("\n2. Getting wallet address... ");
    let address = client.address()?;
    println!("OK");
    println!("   Address: {}", address);

    print!("\n3. Getting USDC balance... ");
    match client.get_balance().await {
        Ok(balance) => {
            println!("OK");
            println!("   USDC Balance: ${:.6}", balance);
        }
        Err(e) => {
            println!("FAILED");
            println!("   Error: {}", e);
        }
    }

    print!("\n4. Getting positions... ");
    match client.get_positions(&[]).await {
        Ok(positions) => {
            println!("OK");
            println!("   Total positions: {}", positions.len());
            for position in positions.values().take(5) {
                let short_id = if position.token_id.len() > 20 {
                    format!("{}...", &position.token_id[..20])
                } else {
                    position.token_id.clone()
                };
                println!(
                    "   - Token: {} Size: {} Avg: ${}",
                    short_id, position.size, position.avg_price
                );
            }
            if positions.len() > 5 {
                println!("   ... and {} more", positions.len() - 5);
            }
        }
        Err(e) => {
            println!("FAILED");
            println!("   Error: {}", e);
        }
    }

    println!("\n======================================================================");
    println!("BALANCE CHECK COMPLETED");
    println!("======================================================================");

    Ok(())
}

/// Resolve the current market instance.
async fn cmd_discover_market() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("UPDOWN ARB - MARKET DISCOVERY");
    println!("======================================================================");

    let config = Config::load().context("failed to load configuration")?;
    let resolver = GammaMarketResolver::new(&config)?;

    println!("\nSearching for active market...\n");
    match resolver.find_next(None).await {
        Ok(market) => {
            println!("MARKET FOUND");
            println!("----------------------------------------------------------------------");
            println!("  Slug: {}", market.slug);
            println!("  ID: {}", market.id);
            println!("  UP Token: {}", market.up_token_id);
            println!("  DOWN Token: {}", market.down_token_id);
            println!("  Time Remaining: {}", market.time_remaining_str());
            if let Some(q) = &market.question {
                println!("  Question: {}", q);
            }
            println!("======================================================================");
        }
        Err(e) => {
            println!("NO ACTIVE MARKET FOUND");
            println!("  Error: {}", e);
            println!("\nMarkets open every 15 minutes. Try again shortly.");
            println!("======================================================================");
        }
    }

    Ok(())
}

/// Watch the market stream for a while, printing notifications and touch prices.
async fn cmd_ws_test(seconds: u64) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("UPDOWN ARB - MARKET STREAM TEST");
    println!("======================================================================");

    let config = Config::load().context("failed to load configuration")?;
    let resolver = GammaMarketResolver::new(&config)?;

    println!("\n1. Resolving active market...");
    let market = resolver.find_next(None).await?;
    println!("   Found: {}", market.slug);
    println!("   UP Token: {}", market.up_token_id);
    println!("   DOWN Token: {}", market.down_token_id);

    println!("\n2. Connecting to {}...", config.market_ws_url());
    let shutdown = Shutdown::new();
    let feed = Arc::new(MarketDataStream::new(StreamConfig::from_config(&config), &market));
    let mut updates = feed.clone().spawn(shutdown.clone());

    println!("\n3. Waiting for book updates ({} seconds)...", seconds);
    let start = tokio::time::Instant::now();
    let deadline = start + Duration::from_secs(seconds);
    let mut message_count = 0u64;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                message_count += 1;

                let touch = feed.snapshot(&update.asset_id).map(|book| {
                    let (bid, ask) = (book.best_bid(), book.best_ask());
                    (bid, ask, mid_price(bid, ask))
                });
                let label = market
                    .outcome_of(&update.asset_id)
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "?".to_string());
                match touch {
                    Some((bid, ask, mid)) => println!(
                        "   [{:.1}s] {} {}: bid {:?} ask {:?} mid {:?}",
                        start.elapsed().as_secs_f64(),
                        label,
                        update.kind,
                        bid,
                        ask,
                        mid
                    ),
                    None => println!(
                        "   [{:.1}s] {} {}",
                        start.elapsed().as_secs_f64(),
                        label,
                        update.kind
                    ),
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }

    shutdown.trigger();

    println!("\n======================================================================");
    println!("MARKET STREAM TEST COMPLETE");
    println!("  Notifications received: {}", message_count);
    println!("  Reconnects: {}", feed.reconnects());
    println!("  Book defects: {}", feed.defects());
    println!(
        "  Connection status: {}",
        if feed.is_connected() { "Connected" } else { "Disconnected" }
    );
    println!("======================================================================");

    Ok(())
}

/// Run the scan/execute loop until interrupted.
async fn cmd_run(
    dry_run_override: Option<bool>,
    port_override: Option<u16>,
    websocket: bool,
) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    if websocket {
        config.use_wss = true;
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("configuration validation failed: {}", e));
    }

    let settings = SchedulerSettings::from_config(&config);
    info!("Configuration loaded successfully");
    info!("Mode: {} ({})", mode_label(config.dry_run), settings.mode);
    info!("Target pair cost: ${}", config.target_pair_cost);
    info!("Order size: {} shares", config.order_size);
    info!("Order type: {}", config.order_type);

    metrics::init_metrics();
    if config.metrics_enabled {
        if let Err(e) = metrics::install_exporter(config.metrics_port) {
            warn!(error = %e, "Prometheus exporter unavailable");
        }
    }

    let shutdown = Shutdown::new();
    install_signal_handlers(shutdown.clone());

    let board = StatusBoard::new(
        config.dry_run,
        match settings.mode {
            DriveMode::Polling => "polling",
            DriveMode::Streaming => "streaming",
        },
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Status API listening on {}", addr);

    let router = create_router(board.clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(server_shutdown))
            .await
    });

    let client: Arc<dyn ExchangeClient> = Arc::new(PolymarketClient::new(&config)?);
    let resolver: Arc<dyn MarketResolver> = Arc::new(GammaMarketResolver::new(&config)?);
    let recorder: Box<dyn TradeRecorder + Send> = if config.enable_stats {
        Box::new(JsonTradeLog::open(&config.trade_log_file))
    } else {
        Box::new(MemoryTradeLog::new())
    };
    let engine = PairedExecutionEngine::new(
        client.clone(),
        Box::new(RiskManager::new(RiskLimits::from_config(&config))),
        recorder,
        ExecutionSettings::from_config(&config),
    );

    let mut scheduler = ScanScheduler::new(
        client,
        resolver,
        engine,
        Session::new(&config),
        ScanParams::from(&config),
        settings,
        board,
        shutdown.clone(),
    )
    .with_stream(StreamConfig::from_config(&config));

    info!("Starting arbitrage scanner...");
    scheduler.run().await;

    shutdown.trigger();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Status API stopped with error"),
        Err(e) => warn!(error = %e, "Status API task failed"),
    }
    info!("Shutdown complete");

    Ok(())
}
