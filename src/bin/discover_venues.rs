//! Venue discovery check
//!
//! Run with: cargo run --bin discover-venues -- [--chain 56] [--persist]
//!
//! Pulls candidates from every configured source, validates them on chain
//! and prints the verdicts. With `--persist` the results are written to the
//! configured registry file.

use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spotter::chain::{ChainReader, RpcChainReader};
use spotter::config::Config;
use spotter::discovery::DiscoveryManager;
use spotter::registry::VenueRegistry;
use spotter::tokens;
use spotter::validator::VenueValidator;

#[derive(Parser)]
#[command(name = "discover-venues")]
#[command(about = "Discover and validate venues without scanning")]
struct Args {
    /// Override the configured chain id
    #[arg(long)]
    chain: Option<u64>,

    /// Write results to the registry file instead of a throwaway registry
    #[arg(long)]
    persist: bool,
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

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(chain_id) = args.chain {
        config = config.with_chain(chain_id);
    }
    config.validate()?;

    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║               SPOTTER VENUE DISCOVERY                      ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let lock_timeout = Duration::from_millis(config.lock_timeout_ms);
    let registry = if args.persist {
        VenueRegistry::open(&config.registry_path, lock_timeout).await?
    } else {
        VenueRegistry::in_memory(lock_timeout)
    };

    let chain: Arc<dyn ChainReader> = Arc::new(RpcChainReader::from_config(&config));
    let validator = VenueValidator::new(chain);
    let discovery = DiscoveryManager::from_config(&config);

    println!("Sources: {}", discovery.source_names().join(", "));
    discovery.initialize_all().await;
    let summary = discovery
        .discover_and_register(Some(config.chain_id), &validator, &registry)
        .await;
    discovery.close_all().await;

    println!();
    for venue in registry.list_by_chain(config.chain_id).await? {
        let verdict = if venue.validated {
            style("✓ valid".to_string()).green()
        } else {
            style("✗ invalid".to_string()).red()
        };
        println!(
            "{} {} [{}] factory {} via {}",
            verdict,
            style(&venue.name).cyan(),
            venue.protocol,
            tokens::checksum(&venue.factory),
            venue.source
        );
        for err in &venue.validation_errors {
            println!("      - {}", err);
        }
    }

    println!();
    println!(
        "Discovered {} | validated {} | registered {} | rejected {}",
        summary.discovered, summary.validated, summary.registered, summary.rejected
    );

    if args.persist {
        registry.flush().await?;
        println!("Registry written to {}", config.registry_path);
    }
    Ok(())
}
