//! Market conditions - gas, priority fee, volatility and congestion
//!
//! Fetches gas data from Etherscan's gas tracker, falls back to the RPC
//! provider, and finally reports nothing at all; every absent field resolves
//! to the detector's configured defaults, so supplying conditions never fails.
//!
//! API: https://api.etherscan.io/v2/api?chainid=1&module=gastracker&action=gasoracle

use alloy_provider::{Provider, ProviderBuilder};
use async_trait::async_trait;
use eyre::{eyre, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::tokens::gwei_to_wei;

// ============================================
// CONSTANTS
// ============================================

/// Etherscan API base URL (v2 supports multiple chains)
const ETHERSCAN_API_URL: &str = "https://api.etherscan.io/v2/api";

/// Cache duration for gas prices (avoid hitting rate limits)
const CACHE_DURATION_SECS: u64 = 10;

/// Timeout for API calls
const API_TIMEOUT_SECS: u64 = 5;

/// Sane gas price range in gwei
const MIN_GAS_GWEI: f64 = 0.01;
const MAX_GAS_GWEI: f64 = 1000.0;

// ============================================
// MARKET CONDITION
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasSource {
    Etherscan,
    RpcProvider,
    Fallback,
}

impl std::fmt::Display for GasSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GasSource::Etherscan => write!(f, "Etherscan"),
            GasSource::RpcProvider => write!(f, "RPC"),
            GasSource::Fallback => write!(f, "Fallback"),
        }
    }
}

/// Conditions as of call time; any field may be missing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketCondition {
    /// Wei
    pub gas_price: Option<u128>,
    /// Wei
    pub priority_fee: Option<u128>,
    /// 0-100
    pub market_volatility: Option<f64>,
    /// 0-100
    pub network_congestion: Option<f64>,
    pub source: Option<GasSource>,
}

/// Fallbacks applied to absent fields
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketDefaults {
    pub gas_price: u128,
    pub priority_fee: u128,
}

impl MarketDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            gas_price: gwei_to_wei(config.default_gas_price_gwei),
            priority_fee: gwei_to_wei(config.default_priority_fee_gwei),
        }
    }
}

impl Default for MarketDefaults {
    fn default() -> Self {
        Self {
            gas_price: gwei_to_wei(50.0),
            priority_fee: gwei_to_wei(1.5),
        }
    }
}

/// Every field present, scales clamped to 0-100
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMarket {
    pub gas_price: u128,
    pub priority_fee: u128,
    pub volatility: f64,
    pub congestion: f64,
}

impl MarketCondition {
    pub fn resolve(&self, defaults: &MarketDefaults) -> ResolvedMarket {
        ResolvedMarket {
            gas_price: self.gas_price.unwrap_or(defaults.gas_price),
            priority_fee: self.priority_fee.unwrap_or(defaults.priority_fee),
            volatility: clamp_scale(self.market_volatility),
            congestion: clamp_scale(self.network_congestion),
        }
    }
}

fn clamp_scale(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(0.0, 100.0),
        _ => 0.0,
    }
}

#[async_trait]
pub trait MarketConditionSource: Send + Sync {
    async fn current(&self) -> MarketCondition;
}

/// Fixed conditions (tests, offline runs)
pub struct StaticMarket(pub MarketCondition);

#[async_trait]
impl MarketConditionSource for StaticMarket {
    async fn current(&self) -> MarketCondition {
        self.0.clone()
    }
}

// ============================================
// API RESPONSE TYPES
// ============================================

#[derive(Debug, Deserialize)]
struct GasTrackerResponse {
    status: String,
    message: String,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GasTrackerResult {
    #[serde(rename = "ProposeGasPrice")]
    propose_gas_price: Option<String>,
    #[serde(rename = "suggestBaseFee")]
    suggest_base_fee: Option<String>,
    #[serde(rename = "gasUsedRatio")]
    gas_used_ratio: Option<String>,
}

impl GasTrackerResult {
    fn into_condition(self) -> Result<MarketCondition> {
        let propose: f64 = self
            .propose_gas_price
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| eyre!("gas tracker returned no ProposeGasPrice"))?;
        let propose = propose.clamp(MIN_GAS_GWEI, MAX_GAS_GWEI);

        let priority = self
            .suggest_base_fee
            .and_then(|s| s.parse::<f64>().ok())
            .map(|base| (propose - base).max(0.0));

        Ok(MarketCondition {
            gas_price: Some(gwei_to_wei(propose)),
            priority_fee: priority.map(gwei_to_wei),
            market_volatility: None,
            network_congestion: self.gas_used_ratio.as_deref().and_then(congestion_from_ratios),
            source: Some(GasSource::Etherscan),
        })
    }
}

/// "0.51,0.98,0.33" (recent blocks' gas used / limit) -> average percent
fn congestion_from_ratios(ratios: &str) -> Option<f64> {
    let values: Vec<f64> = ratios
        .split(',')
        .filter_map(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some((avg * 100.0).clamp(0.0, 100.0))
}

// ============================================
// GAS ORACLE
// ============================================

pub struct GasOracle {
    http_client: Client,
    api_key: Option<String>,
    chain_id: u64,
    rpc_url: String,
    cache: RwLock<Option<(MarketCondition, Instant)>>,
}

impl GasOracle {
    pub fn new(api_key: Option<String>, chain_id: u64, rpc_url: String) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http_client,
            api_key,
            chain_id,
            rpc_url,
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.etherscan_api_key.clone(), config.chain_id, config.rpc_url.clone())
    }

    /// Tries Etherscan first, then RPC, then reports nothing
    async fn fetch(&self) -> MarketCondition {
        if let Some(ref api_key) = self.api_key {
            match self.fetch_from_etherscan(api_key).await {
                Ok(condition) => {
                    debug!(
                        "⛽ Gas from Etherscan: {:?} wei (priority {:?}, congestion {:?})",
                        condition.gas_price, condition.priority_fee, condition.network_congestion
                    );
                    return condition;
                }
                Err(e) => warn!("Etherscan gas fetch failed: {}", e),
            }
        }

        match self.fetch_from_rpc().await {
            Ok(condition) => {
                debug!("⛽ Gas from RPC: {:?} wei", condition.gas_price);
                return condition;
            }
            Err(e) => warn!("RPC gas fetch failed: {}", e),
        }

        warn!("No gas source available, detector defaults apply");
        MarketCondition {
            source: Some(GasSource::Fallback),
            ..MarketCondition::default()
        }
    }

    async fn fetch_from_etherscan(&self, api_key: &str) -> Result<MarketCondition> {
        let url = format!(
            "{}?chainid={}&module=gastracker&action=gasoracle&apikey={}",
            ETHERSCAN_API_URL, self.chain_id, api_key
        );

        let response: GasTrackerResponse = self.http_client.get(&url).send().await?.json().await?;

        if response.status != "1" {
            return Err(eyre!("Gas tracker failed: {}", response.message));
        }

        let result = response.result.ok_or_else(|| eyre!("No gas tracker result"))?;
        let result: GasTrackerResult = serde_json::from_value(result)?;
        result.into_condition()
    }

    async fn fetch_from_rpc(&self) -> Result<MarketCondition> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.parse()?);

        let gas_price_wei = provider.get_gas_price().await?;
        let gas_gwei = (gas_price_wei as f64 / 1e9).clamp(MIN_GAS_GWEI, MAX_GAS_GWEI);
        let priority = provider.get_max_priority_fee_per_gas().await.ok();

        Ok(MarketCondition {
            gas_price: Some(gwei_to_wei(gas_gwei)),
            priority_fee: priority,
            market_volatility: None,
            network_congestion: None,
            source: Some(GasSource::RpcProvider),
        })
    }
}

#[async_trait]
impl MarketConditionSource for GasOracle {
    /// Cached for a few seconds to stay inside API rate limits
    async fn current(&self) -> MarketCondition {
        {
            let cache = self.cache.read().await;
            if let Some((condition, fetched_at)) = cache.as_ref() {
                if fetched_at.elapsed() < Duration::from_secs(CACHE_DURATION_SECS) {
                    trace!("Using cached market condition");
                    return condition.clone();
                }
            }
        }

        let condition = self.fetch().await;
        *self.cache.write().await = Some((condition.clone(), Instant::now()));
        condition
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_fields_resolve_to_defaults() {
        let resolved = MarketCondition::default().resolve(&MarketDefaults::default());
        assert_eq!(resolved.gas_price, 50_000_000_000);
        assert_eq!(resolved.priority_fee, 1_500_000_000);
        assert_eq!(resolved.volatility, 0.0);
        assert_eq!(resolved.congestion, 0.0);
    }

    #[test]
    fn test_scales_are_clamped() {
        let condition = MarketCondition {
            market_volatility: Some(250.0),
            network_congestion: Some(f64::NAN),
            ..Default::default()
        };
        let resolved = condition.resolve(&MarketDefaults::default());
        assert_eq!(resolved.volatility, 100.0);
        assert_eq!(resolved.congestion, 0.0);
    }

    #[test]
    fn test_gas_tracker_parsing() {
        let result = GasTrackerResult {
            propose_gas_price: Some("12.5".into()),
            suggest_base_fee: Some("11.0".into()),
            gas_used_ratio: Some("0.5,0.7,0.9".into()),
        };
        let condition = result.into_condition().unwrap();
        assert_eq!(condition.gas_price, Some(12_500_000_000));
        assert_eq!(condition.priority_fee, Some(1_500_000_000));
        let congestion = condition.network_congestion.unwrap();
        assert!((congestion - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_congestion_ignores_garbage() {
        assert_eq!(congestion_from_ratios(""), None);
        assert_eq!(congestion_from_ratios("x,y"), None);
        assert_eq!(congestion_from_ratios("2.0"), Some(100.0));
    }

    #[tokio::test]
    async fn test_static_market() {
        let source = StaticMarket(MarketCondition {
            gas_price: Some(1),
            ..Default::default()
        });
        assert_eq!(source.current().await.gas_price, Some(1));
    }
}
