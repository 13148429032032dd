//! Spotter - Cross-DEX Arbitrage Opportunity Detector
//!
//! Run with: cargo run -- [--config spotter.toml] [--once] [--chain 8453]
//!
//! Startup discovers and validates venues into the registry, then a detection
//! cycle runs every scan interval and replaces the opportunity store.

use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spotter::allocator::{Allocator, AllocatorSettings, ChainBalances};
use spotter::cache::PriceCache;
use spotter::chain::{ChainReader, RpcChainReader};
use spotter::config::{Config, ExecutionMode};
use spotter::detector::{DetectionRequest, DetectorSettings, OpportunityDetector};
use spotter::discovery::DiscoveryManager;
use spotter::execution::{DryRunExecutor, TradeService};
use spotter::market::{GasOracle, MarketConditionSource};
use spotter::opportunity::ArbitrageOpportunity;
use spotter::registry::VenueRegistry;
use spotter::store::{OpportunityFilter, OpportunityStore};
use spotter::tokens::{self, from_base_units};
use spotter::validator::VenueValidator;
use spotter::venues::ProtocolRouter;

/// Opportunities printed after each cycle
const SUMMARY_ROWS: usize = 5;

#[derive(Parser)]
#[command(name = "spotter")]
#[command(about = "Cross-DEX arbitrage opportunity detector")]
struct Cli {
    /// TOML config file; environment variables (.env) are used otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single detection cycle and exit
    #[arg(long)]
    once: bool,

    /// Override the configured chain id
    #[arg(long)]
    chain: Option<u64>,
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🔭 SPOTTER - Cross-DEX Arbitrage Opportunity Detector").cyan().bold()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn print_opportunities(store: &OpportunityStore, elapsed: Duration) {
    let (top, total) = store.list(&OpportunityFilter::default(), SUMMARY_ROWS, 0);

    println!();
    println!(
        "{} Cycle finished in {:?}: {} opportunities",
        style("✓").green(),
        elapsed,
        total
    );
    for (i, opp) in top.iter().enumerate() {
        print_opportunity(i + 1, opp);
    }
}

fn print_opportunity(rank: usize, opp: &ArbitrageOpportunity) {
    let meta = |key: &str| opp.metadata.get(key).map(String::as_str).unwrap_or("?");
    println!(
        "  {}. {} | {} → {} | {:.3}% | profit {:.6} ETH (after gas {:.6}) | confidence {:.2}",
        rank,
        style(meta("pair")).cyan(),
        meta("buy_venue"),
        meta("sell_venue"),
        opp.expected_profit_percentage,
        from_base_units(opp.expected_profit, tokens::DEFAULT_DECIMALS),
        from_base_units(opp.expected_profit_after_gas, tokens::DEFAULT_DECIMALS),
        opp.confidence
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spotter=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    print_banner();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(chain_id) = cli.chain {
        config = config.with_chain(chain_id);
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e);
    }
    config.print_summary();
    println!();

    let lock_timeout = Duration::from_millis(config.lock_timeout_ms);
    let chain: Arc<dyn ChainReader> = Arc::new(RpcChainReader::from_config(&config));

    // =============================================
    // VENUES: discovery -> validation -> registry
    // =============================================
    println!("{}", style("═══ VENUES ═══").blue().bold());

    let registry = Arc::new(VenueRegistry::open(&config.registry_path, lock_timeout).await?);
    let discovery = DiscoveryManager::from_config(&config);
    info!("Discovery sources: {}", discovery.source_names().join(", "));
    discovery.initialize_all().await;

    let validator = VenueValidator::new(chain.clone());
    let summary = discovery
        .discover_and_register(Some(config.chain_id), &validator, &registry)
        .await;
    discovery.close_all().await;

    let usable = registry.usable(config.chain_id).await?;
    println!(
        "{} {} candidates, {} validated, {} usable on chain {}",
        style("✓").green(),
        summary.discovered,
        summary.validated,
        usable.len(),
        config.chain_id
    );
    for venue in &usable {
        println!("   {} ({}, {})", style(&venue.name).cyan(), venue.protocol, venue.source);
    }
    if usable.is_empty() {
        warn!("No usable venues - every cycle will come back empty");
    }

    // =============================================
    // DETECTION
    // =============================================
    let cache = Arc::new(PriceCache::from_config(&config));
    let client = Arc::new(ProtocolRouter::new(chain.clone(), config.base_token_addresses()?));
    let settings = DetectorSettings::from_config(&config);
    settings.validate()?;
    let detector = OpportunityDetector::new(registry.clone(), cache.clone(), client, settings);
    let market: Arc<dyn MarketConditionSource> = Arc::new(GasOracle::from_config(&config));
    let store = Arc::new(OpportunityStore::new());

    let whitelist = config.whitelist_addresses()?;
    let request = DetectionRequest {
        token_filter: (!whitelist.is_empty()).then(|| whitelist.into_iter().collect::<HashSet<_>>()),
        ..Default::default()
    };

    let trades = match config.execution_mode {
        ExecutionMode::Simulation => None,
        mode => {
            if mode == ExecutionMode::Production {
                warn!("⚠️  No live executor is wired in; trades are dry-run");
            }
            let wallet = config.wallet()?.unwrap_or_default();
            if config.dynamic_allocation && wallet.is_zero() {
                warn!("Dynamic allocation without WALLET_ADDRESS sizes against an empty balance");
            }
            let allocator = Allocator::new(
                Arc::new(ChainBalances::new(chain.clone(), wallet)),
                AllocatorSettings::from_config(&config),
                tokens::native_token(config.chain_id),
            );
            Some(TradeService::from_config(
                &config,
                store.clone(),
                Arc::new(allocator),
                Arc::new(DryRunExecutor),
            ))
        }
    };

    println!();
    println!("{}", style("═══ DETECTION ═══").magenta().bold());

    let cycle_timeout = Duration::from_secs(config.cycle_timeout_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(config.scan_interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }

        let start = Instant::now();
        let cycle = async {
            let condition = market.current().await;
            detector.detect(&condition, &request).await
        };

        match tokio::time::timeout(cycle_timeout, cycle).await {
            Ok(Ok(opportunities)) => {
                store.replace_all(opportunities);
                print_opportunities(&store, start.elapsed());

                if let Some(trades) = &trades {
                    let (top, _) = store.list(&OpportunityFilter::default(), 1, 0);
                    if let Some(best) = top.first() {
                        match trades.submit(best.id, None, BTreeMap::new()).await {
                            Ok(record) => info!(
                                "Trade {} {:?}: amount {}, net {}",
                                record.id, record.status, record.amount, record.net_profit
                            ),
                            Err(e) => warn!("Trade for {} not executed: {}", best.id, e),
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                error!("Detection misconfigured: {}", e);
                return Err(e.into());
            }
            Err(_) => {
                warn!("Cycle exceeded {:?}; keeping the previous results", cycle_timeout);
            }
        }

        let purged = cache.purge_expired().await;
        if purged > 0 {
            info!("Evicted {} stale cache entries", purged);
        }

        if cli.once {
            break;
        }
    }

    registry.flush().await?;
    Ok(())
}
