//! Configuration for Spotter
//!
//! All tunables for discovery, detection and sizing live here. Values come
//! from environment variables (with `.env` support) or a TOML file, and are
//! checked by `validate()` before anything is built from them.

use alloy_primitives::Address;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::retry::RetryPolicy;
use crate::tokens::{self, normalize_address};

// ============================================
// EXECUTION MODE
// ============================================

/// Execution mode determines what happens to a submitted trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Detect and rank only; trade submission is refused
    Simulation,

    /// Trades are sized and handed to the dry-run executor, nothing is sent
    DryRun,

    /// Trades go to the real execution collaborator
    /// CAUTION: This uses real funds!
    Production,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Simulation
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Simulation => write!(f, "SIMULATION"),
            ExecutionMode::DryRun => write!(f, "DRY_RUN"),
            ExecutionMode::Production => write!(f, "PRODUCTION"),
        }
    }
}

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ========== Network Settings ==========
    pub rpc_url: String,

    /// Chain scanned by this process (1 = Ethereum Mainnet)
    pub chain_id: u64,

    /// Hard timeout per chain request
    pub rpc_timeout_ms: u64,

    /// Retry policy for chain reads and catalog requests
    pub retry: RetryPolicy,

    // ========== Execution Settings ==========
    pub execution_mode: ExecutionMode,

    /// Kill switch - refuse every trade submission
    pub emergency_stop: bool,

    // ========== Discovery ==========
    /// Catalog API listing DEX protocols (JSON array)
    pub catalog_url: Option<String>,

    /// Scanner API base; `{network}` is replaced by the scanner's network slug
    pub scanner_url: Option<String>,

    /// How long a discovery source reuses its last successful fetch
    pub discovery_cache_ttl_secs: u64,

    // ========== Registry ==========
    /// JSON file the venue registry is persisted to
    pub registry_path: String,

    /// Max wait for the registry/cache locks before giving up on one operation
    pub lock_timeout_ms: u64,

    // ========== Price/Pair Cache ==========
    pub price_ttl_ms: u64,
    pub pair_ttl_secs: u64,

    // ========== Detection ==========
    /// Minimum raw spread in percent (0.05 = 0.05%)
    pub min_profit_pct: f64,

    /// Minimum gross profit in wei
    pub min_profit_wei: u64,

    pub max_pairs_per_venue: usize,

    /// Groups compared concurrently per batch
    pub batch_size: usize,

    /// Used when the market condition has no gas price
    pub default_gas_price_gwei: f64,

    /// Used when the market condition has no priority fee
    pub default_priority_fee_gwei: f64,

    /// First-order gas estimate for one swap leg
    pub gas_per_leg: u64,

    /// Safety margin added to the gas cost for the profitability check
    pub gas_buffer_pct: f64,

    /// Liquidity at which a pair stops reducing confidence
    pub min_liquidity_usd: f64,

    /// Opportunities kept per cycle
    pub max_results: usize,

    /// Tokens V3-style venues are probed against (pool lookup needs both tokens)
    pub base_tokens: Vec<String>,

    /// Only compare pairs touching one of these tokens (if non-empty)
    pub whitelisted_tokens: Vec<String>,

    // ========== Allocation ==========
    pub dynamic_allocation: bool,

    /// Share of the balance never traded
    pub reserve_pct: f64,

    /// Per-trade bounds as a share of the available balance
    pub min_trade_pct: f64,
    pub max_trade_pct: f64,

    /// Absolute bounds in whole native tokens
    pub min_trade_native: f64,
    pub max_trade_native: f64,

    /// Trades expected to run at once; divides the per-trade maximum
    pub max_concurrent_trades: u32,

    /// Wallet whose balances size trades
    pub wallet_address: Option<String>,

    // ========== Scheduling ==========
    pub scan_interval_secs: u64,

    /// A cycle slower than this is skipped
    pub cycle_timeout_secs: u64,

    // ========== API Keys ==========
    /// Etherscan API key for gas prices
    pub etherscan_api_key: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        let retry = RetryPolicy {
            max_attempts: env_or("RETRY_MAX_ATTEMPTS", d.retry.max_attempts),
            base_delay_ms: env_or("RETRY_BASE_DELAY_MS", d.retry.base_delay_ms),
            multiplier: env_or("RETRY_MULTIPLIER", d.retry.multiplier),
            max_delay_ms: env_or("RETRY_MAX_DELAY_MS", d.retry.max_delay_ms),
            jitter: env_or("RETRY_JITTER", d.retry.jitter),
        };

        Ok(Self {
            // Network
            rpc_url: env::var("RPC_URL").unwrap_or(d.rpc_url),
            chain_id: env_or("CHAIN_ID", d.chain_id),
            rpc_timeout_ms: env_or("RPC_TIMEOUT_MS", d.rpc_timeout_ms),
            retry,

            // Execution
            execution_mode: match env::var("EXECUTION_MODE")
                .unwrap_or_else(|_| "simulation".to_string())
                .to_lowercase()
                .as_str()
            {
                "production" => ExecutionMode::Production,
                "dry_run" | "dryrun" => ExecutionMode::DryRun,
                _ => ExecutionMode::Simulation,
            },
            emergency_stop: env_or("EMERGENCY_STOP", d.emergency_stop),

            // Discovery
            catalog_url: env::var("CATALOG_URL").ok().or(d.catalog_url),
            scanner_url: env::var("SCANNER_URL").ok().or(d.scanner_url),
            discovery_cache_ttl_secs: env_or("DISCOVERY_CACHE_TTL_SECS", d.discovery_cache_ttl_secs),

            // Registry
            registry_path: env::var("REGISTRY_PATH").unwrap_or(d.registry_path),
            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", d.lock_timeout_ms),

            // Cache
            price_ttl_ms: env_or("PRICE_TTL_MS", d.price_ttl_ms),
            pair_ttl_secs: env_or("PAIR_TTL_SECS", d.pair_ttl_secs),

            // Detection
            min_profit_pct: env_or("MIN_PROFIT_PCT", d.min_profit_pct),
            min_profit_wei: env_or("MIN_PROFIT_WEI", d.min_profit_wei),
            max_pairs_per_venue: env_or("MAX_PAIRS_PER_VENUE", d.max_pairs_per_venue),
            batch_size: env_or("BATCH_SIZE", d.batch_size),
            default_gas_price_gwei: env_or("DEFAULT_GAS_PRICE_GWEI", d.default_gas_price_gwei),
            default_priority_fee_gwei: env_or("DEFAULT_PRIORITY_FEE_GWEI", d.default_priority_fee_gwei),
            gas_per_leg: env_or("GAS_PER_LEG", d.gas_per_leg),
            gas_buffer_pct: env_or("GAS_BUFFER_PCT", d.gas_buffer_pct),
            min_liquidity_usd: env_or("MIN_LIQUIDITY_USD", d.min_liquidity_usd),
            max_results: env_or("MAX_RESULTS", d.max_results),
            base_tokens: env_list("BASE_TOKENS").unwrap_or(d.base_tokens),
            whitelisted_tokens: env_list("WHITELISTED_TOKENS").unwrap_or_default(),

            // Allocation
            dynamic_allocation: env_or("DYNAMIC_ALLOCATION", d.dynamic_allocation),
            reserve_pct: env_or("RESERVE_PCT", d.reserve_pct),
            min_trade_pct: env_or("MIN_TRADE_PCT", d.min_trade_pct),
            max_trade_pct: env_or("MAX_TRADE_PCT", d.max_trade_pct),
            min_trade_native: env_or("MIN_TRADE_NATIVE", d.min_trade_native),
            max_trade_native: env_or("MAX_TRADE_NATIVE", d.max_trade_native),
            max_concurrent_trades: env_or("MAX_CONCURRENT_TRADES", d.max_concurrent_trades),
            wallet_address: env::var("WALLET_ADDRESS").ok(),

            // Scheduling
            scan_interval_secs: env_or("SCAN_INTERVAL_SECS", d.scan_interval_secs),
            cycle_timeout_secs: env_or("CYCLE_TIMEOUT_SECS", d.cycle_timeout_secs),

            // API Keys
            etherscan_api_key: env::var("ETHERSCAN_API_KEY").ok(),
        })
    }

    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Default V3 probe tokens for the configured chain
    fn default_base_tokens(chain_id: u64) -> Vec<String> {
        tokens::known_tokens(chain_id)
            .map(|t| tokens::checksum(&t.address))
            .collect()
    }

    /// Point at another chain. Base tokens left at the old chain's defaults
    /// follow along; an explicit list is kept.
    pub fn with_chain(mut self, chain_id: u64) -> Self {
        if self.base_tokens == Self::default_base_tokens(self.chain_id) {
            self.base_tokens = Self::default_base_tokens(chain_id);
        }
        self.chain_id = chain_id;
        self
    }

    /// Validate configuration before building components from it
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre::eyre!("Invalid RPC_URL - please set a valid RPC endpoint"));
        }

        if self.batch_size == 0 {
            return Err(eyre::eyre!("BATCH_SIZE must be at least 1"));
        }
        if self.max_pairs_per_venue == 0 {
            return Err(eyre::eyre!("MAX_PAIRS_PER_VENUE must be at least 1"));
        }
        if !self.min_profit_pct.is_finite() || self.min_profit_pct < 0.0 {
            return Err(eyre::eyre!(
                "MIN_PROFIT_PCT must be a non-negative percentage (currently {})",
                self.min_profit_pct
            ));
        }
        if !self.gas_buffer_pct.is_finite() || self.gas_buffer_pct < 0.0 {
            return Err(eyre::eyre!("GAS_BUFFER_PCT must be non-negative"));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(eyre::eyre!("RPC_TIMEOUT_MS must be finite and non-zero"));
        }
        self.retry
            .check()
            .map_err(|e| eyre::eyre!("Invalid retry policy: {}", e))?;

        // Allocation sanity
        if !(0.0..100.0).contains(&self.reserve_pct) {
            return Err(eyre::eyre!(
                "RESERVE_PCT should be between 0-100% (currently {:.1}%)",
                self.reserve_pct
            ));
        }
        if self.min_trade_pct > self.max_trade_pct {
            return Err(eyre::eyre!("MIN_TRADE_PCT exceeds MAX_TRADE_PCT"));
        }
        if self.min_trade_native > self.max_trade_native {
            return Err(eyre::eyre!("MIN_TRADE_NATIVE exceeds MAX_TRADE_NATIVE"));
        }
        if self.max_concurrent_trades == 0 {
            return Err(eyre::eyre!("MAX_CONCURRENT_TRADES must be at least 1"));
        }

        // Every configured address must parse
        self.base_token_addresses()?;
        self.whitelist_addresses()?;
        self.wallet()?;

        if self.execution_mode == ExecutionMode::Production && self.wallet_address.is_none() {
            return Err(eyre::eyre!("Production mode requires WALLET_ADDRESS"));
        }

        Ok(())
    }

    pub fn base_token_addresses(&self) -> Result<Vec<Address>> {
        parse_addresses(&self.base_tokens)
    }

    pub fn whitelist_addresses(&self) -> Result<Vec<Address>> {
        parse_addresses(&self.whitelisted_tokens)
    }

    pub fn wallet(&self) -> Result<Option<Address>> {
        self.wallet_address
            .as_deref()
            .map(normalize_address)
            .transpose()
            .map_err(|e| eyre::eyre!("WALLET_ADDRESS: {}", e))
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║               SPOTTER - CONFIGURATION                      ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Execution Mode:    {:^40} ║", self.execution_mode);
        println!("║ Chain ID:          {:^40} ║", self.chain_id);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ DETECTION                                                  ║");
        println!("║ • Min Spread:      {:<38.3}% ║", self.min_profit_pct);
        println!("║ • Gas Buffer:      {:<38.1}% ║", self.gas_buffer_pct);
        println!("║ • Gas / Leg:       {:<39} ║", self.gas_per_leg);
        println!("║ • Pairs / Venue:   {:<39} ║", self.max_pairs_per_venue);
        println!("║ • Batch Size:      {:<39} ║", self.batch_size);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ CACHE                                                      ║");
        println!("║ • Price TTL:       {:<36} ms ║", self.price_ttl_ms);
        println!("║ • Pair TTL:        {:<37} s ║", self.pair_ttl_secs);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ ALLOCATION                                                 ║");
        println!("║ • Dynamic:         {:^40} ║",
            if self.dynamic_allocation { "✓ Enabled" } else { "✗ Fixed bounds" }
        );
        println!("║ • Reserve:         {:<38.1}% ║", self.reserve_pct);
        println!("║ • Concurrent:      {:<39} ║", self.max_concurrent_trades);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SAFETY                                                     ║");
        println!("║ • Emergency Stop:  {:^40} ║",
            if self.emergency_stop { "🛑 ACTIVE" } else { "✓ Inactive" }
        );
        println!("║ • Etherscan API:   {:^40} ║",
            if self.etherscan_api_key.is_some() { "✓ Configured" } else { "✗ Using RPC" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn parse_addresses(raw: &[String]) -> Result<Vec<Address>> {
    raw.iter()
        .map(|s| normalize_address(s).map_err(|e| eyre::eyre!("{}", e)))
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth.llamarpc.com".to_string(),
            chain_id: tokens::ETHEREUM,
            rpc_timeout_ms: 15_000,
            retry: RetryPolicy::default(),
            execution_mode: ExecutionMode::Simulation,
            emergency_stop: false,
            catalog_url: None,
            scanner_url: None,
            discovery_cache_ttl_secs: 3_600,
            registry_path: "./data/venues.json".to_string(),
            lock_timeout_ms: 2_000,
            price_ttl_ms: 5_000,
            pair_ttl_secs: 60,
            min_profit_pct: 0.05,
            min_profit_wei: 100_000_000_000_000, // 0.0001 ETH
            max_pairs_per_venue: 200,
            batch_size: 50,
            default_gas_price_gwei: 50.0,
            default_priority_fee_gwei: 1.5,
            gas_per_leg: 150_000,
            gas_buffer_pct: 50.0,
            min_liquidity_usd: 100_000.0,
            max_results: 50,
            base_tokens: Self::default_base_tokens(tokens::ETHEREUM),
            whitelisted_tokens: vec![],
            dynamic_allocation: true,
            reserve_pct: 10.0,
            min_trade_pct: 1.0,
            max_trade_pct: 25.0,
            min_trade_native: 0.01,
            max_trade_native: 10.0,
            max_concurrent_trades: 3,
            wallet_address: None,
            scan_interval_secs: 12,
            cycle_timeout_secs: 30,
            etherscan_api_key: None,
        }
    }
}

// ============================================
// TESTS
// ============================================
