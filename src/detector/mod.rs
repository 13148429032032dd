//! Cross-Venue Opportunity Detector
//!
//! One detection pass runs four stages:
//!
//! - **Fetch**: pairs for every usable venue, concurrently, through the cache
//! - **Group**: pairs keyed by unordered token identity across venues
//! - **Compare**: groups in fixed-size concurrent batches; every venue pair is
//!   checked in both price directions and gated on spread, gas and profit floor
//! - **Rank**: by gross profit, truncated
//!
//! Individual venue or quote failures only shrink the result. `detect` itself
//! fails only on bad settings.

mod grouping;
pub mod scoring;

pub use grouping::{group_pairs, PairGroup};

use alloy_primitives::{Address, U256};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::cache::{PriceCache, PriceQuote};
use crate::config::Config;
use crate::market::{MarketCondition, MarketDefaults, ResolvedMarket};
use crate::opportunity::{ArbitrageOpportunity, OpportunityStatus, RouteStep, StrategyType, SwapAction};
use crate::registry::{Venue, VenueRegistry};
use crate::tokens::{self, token_filter_hash};
use crate::venues::{TokenPair, VenueClient};

use scoring::SampleTrade;

#[derive(Debug, Error, PartialEq)]
pub enum DetectorError {
    #[error("invalid detector configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub chain_id: u64,
    /// Plain percent, 0.05 = 0.05%
    pub min_profit_pct: f64,
    /// Absolute gross-profit floor in wei
    pub min_profit_wei: U256,
    pub max_pairs_per_venue: usize,
    /// Groups compared concurrently per batch
    pub batch_size: usize,
    pub gas_per_leg: u64,
    pub gas_buffer_pct: f64,
    pub min_liquidity_usd: f64,
    pub max_results: usize,
    pub market_defaults: MarketDefaults,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            chain_id: tokens::ETHEREUM,
            min_profit_pct: 0.05,
            min_profit_wei: U256::from(100_000_000_000_000u64),
            max_pairs_per_venue: 200,
            batch_size: 50,
            gas_per_leg: 150_000,
            gas_buffer_pct: 50.0,
            min_liquidity_usd: 100_000.0,
            max_results: 50,
            market_defaults: MarketDefaults::default(),
        }
    }
}

impl DetectorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chain_id: config.chain_id,
            min_profit_pct: config.min_profit_pct,
            min_profit_wei: U256::from(config.min_profit_wei),
            max_pairs_per_venue: config.max_pairs_per_venue,
            batch_size: config.batch_size,
            gas_per_leg: config.gas_per_leg,
            gas_buffer_pct: config.gas_buffer_pct,
            min_liquidity_usd: config.min_liquidity_usd,
            max_results: config.max_results,
            market_defaults: MarketDefaults::from_config(config),
        }
    }

    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.batch_size == 0 {
            return Err(DetectorError::Config("batch_size must be at least 1".into()));
        }
        if self.max_pairs_per_venue == 0 {
            return Err(DetectorError::Config("max_pairs_per_venue must be at least 1".into()));
        }
        if !self.min_profit_pct.is_finite() || self.min_profit_pct < 0.0 {
            return Err(DetectorError::Config(format!(
                "min_profit_pct must be a non-negative number, got {}",
                self.min_profit_pct
            )));
        }
        if !self.gas_buffer_pct.is_finite() || self.gas_buffer_pct < 0.0 {
            return Err(DetectorError::Config(format!(
                "gas_buffer_pct must be a non-negative number, got {}",
                self.gas_buffer_pct
            )));
        }
        Ok(())
    }
}

/// Per-call overrides for one detection pass
#[derive(Debug, Clone, Default)]
pub struct DetectionRequest {
    pub max_results: Option<usize>,
    /// Keep pairs with at least one side in this set
    pub token_filter: Option<HashSet<Address>>,
    /// Scan only these venues (by name)
    pub venue_filter: Option<HashSet<String>>,
    /// Replaces the configured absolute profit floor
    pub min_profit_floor: Option<U256>,
}

/// Inputs fixed for the duration of one pass
struct Pass {
    market: ResolvedMarket,
    floor: U256,
    native: Option<Address>,
}

/// A priced venue side of a candidate
struct Side<'a> {
    venue: &'a Venue,
    pair: &'a TokenPair,
    price: f64,
}

pub struct OpportunityDetector {
    registry: Arc<VenueRegistry>,
    cache: Arc<PriceCache>,
    client: Arc<dyn VenueClient>,
    settings: DetectorSettings,
}

impl OpportunityDetector {
    pub fn new(
        registry: Arc<VenueRegistry>,
        cache: Arc<PriceCache>,
        client: Arc<dyn VenueClient>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            client,
            settings,
        }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub async fn detect(
        &self,
        market: &MarketCondition,
        request: &DetectionRequest,
    ) -> Result<Vec<ArbitrageOpportunity>, DetectorError> {
        self.settings.validate()?;
        let max_results = request.max_results.unwrap_or(self.settings.max_results);
        if max_results == 0 {
            return Err(DetectorError::Config("max_results must be at least 1".into()));
        }

        let start = Instant::now();
        let pass = Pass {
            market: market.resolve(&self.settings.market_defaults),
            floor: request.min_profit_floor.unwrap_or(self.settings.min_profit_wei),
            native: tokens::native_token(self.settings.chain_id),
        };

        // ============================================
        // STAGE A: fetch pairs per venue
        // ============================================
        let venues = match self.registry.usable(self.settings.chain_id).await {
            Ok(venues) => venues,
            Err(e) => {
                warn!("Registry unavailable for this cycle: {}", e);
                return Ok(Vec::new());
            }
        };
        let venues: Vec<Arc<Venue>> = venues
            .into_iter()
            .filter(|v| {
                request
                    .venue_filter
                    .as_ref()
                    .map(|names| names.contains(&v.name))
                    .unwrap_or(true)
            })
            .map(Arc::new)
            .collect();

        let token_filter = request.token_filter.as_ref().filter(|f| !f.is_empty());
        let filter_hash = token_filter_hash(token_filter);

        let fetched = join_all(venues.iter().map(|venue| async move {
            let pairs = self.venue_pairs(venue, token_filter, filter_hash).await;
            (venue.clone(), pairs)
        }))
        .await;
        let pair_count: usize = fetched.iter().map(|(_, p)| p.len()).sum();

        // ============================================
        // STAGE B: group across venues
        // ============================================
        let groups = group_pairs(fetched);

        // ============================================
        // STAGE C: compare in batches
        // ============================================
        let mut opportunities = Vec::new();
        for batch in groups.chunks(self.settings.batch_size) {
            let found = join_all(batch.iter().map(|group| self.compare_group(group, &pass))).await;
            opportunities.extend(found.into_iter().flatten());
        }

        // ============================================
        // STAGE D: rank and truncate
        // ============================================
        opportunities.sort_by(|a, b| b.expected_profit.cmp(&a.expected_profit));
        let total = opportunities.len();
        opportunities.truncate(max_results);

        info!(
            "🔍 Detection: {} venues, {} pairs, {} shared groups -> {} opportunities (kept {}) in {:?}",
            venues.len(),
            pair_count,
            groups.len(),
            total,
            opportunities.len(),
            start.elapsed()
        );

        Ok(opportunities)
    }

    async fn venue_pairs(
        &self,
        venue: &Venue,
        token_filter: Option<&HashSet<Address>>,
        filter_hash: u64,
    ) -> Vec<TokenPair> {
        if let Some(pairs) = self.cache.pairs(&venue.name, filter_hash).await {
            return pairs;
        }

        match self
            .client
            .fetch_pairs(venue, self.settings.max_pairs_per_venue, token_filter)
            .await
        {
            Ok(pairs) => {
                let mut pairs: Vec<TokenPair> = pairs
                    .into_iter()
                    .filter(|p| token_filter.map(|f| p.matches(f)).unwrap_or(true))
                    .collect();
                pairs.truncate(self.settings.max_pairs_per_venue);
                debug!("{}: {} pairs", venue.name, pairs.len());
                self.cache.store_pairs(&venue.name, filter_hash, pairs.clone()).await;
                pairs
            }
            Err(e) => {
                warn!("{}: pair fetch failed, skipping venue this cycle: {}", venue.name, e);
                Vec::new()
            }
        }
    }

    /// Price of one whole `token_in` in the pair's other token, via the cache
    async fn price(&self, venue: &Venue, pair: &TokenPair, token_in: Address) -> Option<f64> {
        let token_out = pair.other(&token_in)?;

        if let Some(quote) = self.cache.quote(&venue.name, token_in, token_out).await {
            return usable_price(quote.price);
        }

        match self.client.quote(venue, pair, token_in).await {
            Ok(Some(price)) if usable_price(price).is_some() => {
                self.cache
                    .store_quote(PriceQuote::new(venue.name.clone(), token_in, token_out, price))
                    .await;
                Some(price)
            }
            Ok(_) => {
                trace!("{}: no price for {} in pool {}", venue.name, tokens::display_symbol(&token_in), pair.pool);
                None
            }
            Err(e) => {
                debug!(
                    "{}: quote {} -> {} failed: {}",
                    venue.name,
                    tokens::display_symbol(&token_in),
                    tokens::display_symbol(&token_out),
                    e
                );
                None
            }
        }
    }

    async fn compare_group(&self, group: &PairGroup, pass: &Pass) -> Vec<ArbitrageOpportunity> {
        let directions = [group.key.low, group.key.high];

        // Both orderings on every venue
        let lookups = group.venues.values().flat_map(|(venue, pair)| {
            directions.iter().map(move |base| async move {
                let price = self.price(venue, pair, *base).await;
                ((venue.name.clone(), *base), price)
            })
        });
        let prices: HashMap<(String, Address), f64> = join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(key, price)| price.map(|p| (key, p)))
            .collect();

        let entries: Vec<&(Arc<Venue>, TokenPair)> = group.venues.values().collect();
        let mut found = Vec::new();

        for base in directions {
            for (i, (venue_a, pair_a)) in entries.iter().enumerate() {
                for (venue_b, pair_b) in &entries[i + 1..] {
                    let (Some(&price_a), Some(&price_b)) = (
                        prices.get(&(venue_a.name.clone(), base)),
                        prices.get(&(venue_b.name.clone(), base)),
                    ) else {
                        continue;
                    };

                    let a = Side { venue: venue_a, pair: pair_a, price: price_a };
                    let b = Side { venue: venue_b, pair: pair_b, price: price_b };

                    // Strictly cheaper side buys; ties are not opportunities
                    let candidate = if price_a > price_b {
                        self.evaluate(base, &b, &a, pass)
                    } else if price_b > price_a {
                        self.evaluate(base, &a, &b, pass)
                    } else {
                        None
                    };
                    found.extend(candidate);
                }
            }
        }

        found
    }

    /// Gate and build one candidate: buy `base` on `buy`, sell it on `sell`
    fn evaluate(&self, base: Address, buy: &Side<'_>, sell: &Side<'_>, pass: &Pass) -> Option<ArbitrageOpportunity> {
        let quote = buy.pair.other(&base)?;
        let base_decimals = buy.pair.decimals_of(&base)?;
        let quote_decimals = buy.pair.decimals_of(&quote)?;
        let base_symbol = buy.pair.symbol_of(&base);
        let quote_symbol = buy.pair.symbol_of(&quote);

        let spread = scoring::spread_pct(buy.price, sell.price);
        if !scoring::meets_min_pct(spread, self.settings.min_profit_pct) {
            trace!(
                "{}/{} {} -> {}: spread {:.4}% below floor",
                base_symbol, quote_symbol, buy.venue.name, sell.venue.name, spread
            );
            return None;
        }

        let gas_units = self.settings.gas_per_leg.saturating_mul(2);
        let gas_cost = scoring::gas_cost(gas_units, pass.market.gas_price, pass.market.priority_fee);
        let buffered_cost = scoring::with_buffer(gas_cost, self.settings.gas_buffer_pct);

        let trade = SampleTrade::new(buy.price, sell.price, base_decimals, quote_decimals);
        let profit_quote = trade.profit();
        if profit_quote.is_zero() {
            return None;
        }
        let profit = scoring::to_native_wei(profit_quote, quote, quote_decimals, base, sell.price, pass.native);

        if profit <= buffered_cost || profit < pass.floor {
            trace!(
                "{}/{} {} -> {}: profit {} wei does not clear gas {} wei / floor {} wei",
                base_symbol, quote_symbol, buy.venue.name, sell.venue.name, profit, buffered_cost, pass.floor
            );
            return None;
        }

        let confidence = scoring::confidence(
            spread,
            pass.market.volatility,
            pass.market.congestion,
            buy.pair.liquidity_usd,
            sell.pair.liquidity_usd,
            self.settings.min_liquidity_usd,
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("pair".to_string(), format!("{}/{}", base_symbol, quote_symbol));
        metadata.insert("direction".to_string(), format!("{} priced in {}", base_symbol, quote_symbol));
        metadata.insert("buy_venue".to_string(), buy.venue.name.clone());
        metadata.insert("sell_venue".to_string(), sell.venue.name.clone());
        metadata.insert("buy_price".to_string(), format!("{}", buy.price));
        metadata.insert("sell_price".to_string(), format!("{}", sell.price));
        metadata.insert("buy_pool".to_string(), tokens::checksum(&buy.pair.pool));
        metadata.insert("sell_pool".to_string(), tokens::checksum(&sell.pair.pool));
        metadata.insert("gas_cost_buffered".to_string(), buffered_cost.to_string());

        debug!(
            "💰 {}/{}: buy {} @ {} sell {} @ {} ({:.3}%, {} wei)",
            base_symbol, quote_symbol, buy.venue.name, buy.price, sell.venue.name, sell.price, spread, profit
        );

        Some(ArbitrageOpportunity {
            id: Uuid::new_v4(),
            route: vec![
                RouteStep {
                    venue: buy.venue.name.clone(),
                    token_in: quote,
                    amount_in: trade.quote_in,
                    token_out: base,
                    amount_out: trade.base_amount,
                    action: SwapAction::Swap,
                },
                RouteStep {
                    venue: sell.venue.name.clone(),
                    token_in: base,
                    amount_in: trade.base_amount,
                    token_out: quote,
                    amount_out: trade.quote_out,
                    action: SwapAction::Swap,
                },
            ],
            expected_profit: profit,
            expected_profit_after_gas: profit - gas_cost,
            expected_profit_percentage: spread,
            gas_estimate: gas_units,
            gas_cost,
            gas_price: pass.market.gas_price,
            priority_fee: pass.market.priority_fee,
            strategy: StrategyType::CrossVenue,
            confidence,
            risk_score: 1.0 - confidence,
            status: OpportunityStatus::Detected,
            created_at: Utc::now(),
            metadata,
        })
    }
}

fn usable_price(price: f64) -> Option<f64> {
    (price.is_finite() && price > 0.0).then_some(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DexProtocolType;
    use crate::venues::VenueError;
    use alloy_primitives::address;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const DAI: Address = address!("6B175474E89094C44Da98b954EedeAC495271d0F");

    const GWEI: u128 = 1_000_000_000;

    /// Venue client with canned pairs and prices
    #[derive(Default)]
    struct MockVenues {
        pairs: HashMap<String, Vec<TokenPair>>,
        failing: HashSet<String>,
        /// (venue, token_in) -> price of one token_in
        prices: HashMap<(String, Address), f64>,
        fetches: AtomicUsize,
    }

    impl MockVenues {
        fn pair(mut self, venue: &str, pair: TokenPair) -> Self {
            self.pairs.entry(venue.to_string()).or_default().push(pair);
            self
        }

        /// Price of `base` in `quote` on `venue`, reverse direction implied
        fn price(mut self, venue: &str, base: Address, quote: Address, price: f64) -> Self {
            self.prices.insert((venue.to_string(), base), price);
            let reverse = if price == 0.0 { 0.0 } else { 1.0 / price };
            self.prices.insert((venue.to_string(), quote), reverse);
            self
        }

        fn failing(mut self, venue: &str) -> Self {
            self.failing.insert(venue.to_string());
            self
        }
    }

    #[async_trait]
    impl VenueClient for MockVenues {
        async fn fetch_pairs(
            &self,
            venue: &Venue,
            limit: usize,
            token_filter: Option<&HashSet<Address>>,
        ) -> Result<Vec<TokenPair>, VenueError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&venue.name) {
                return Err(VenueError::Chain(crate::chain::ChainError::Timeout(10)));
            }
            Ok(self
                .pairs
                .get(&venue.name)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|p| token_filter.map_or(true, |f| p.matches(f)))
                .take(limit)
                .collect())
        }

        async fn quote(&self, venue: &Venue, _pair: &TokenPair, token_in: Address) -> Result<Option<f64>, VenueError> {
            Ok(self.prices.get(&(venue.name.clone(), token_in)).copied())
        }
    }

    fn weth_usdc(pool: u8) -> TokenPair {
        TokenPair::new(Address::repeat_byte(pool), USDC, WETH, 6, 18, 3000)
    }

    fn weth_usdc_reversed(pool: u8) -> TokenPair {
        TokenPair::new(Address::repeat_byte(pool), WETH, USDC, 18, 6, 3000)
    }

    fn weth_dai(pool: u8) -> TokenPair {
        TokenPair::new(Address::repeat_byte(pool), DAI, WETH, 18, 18, 3000)
    }

    async fn registry(names: &[&str]) -> Arc<VenueRegistry> {
        let registry = VenueRegistry::in_memory(Duration::from_secs(1));
        for (i, name) in names.iter().enumerate() {
            let venue = Venue::candidate(
                *name,
                1,
                DexProtocolType::AmmV2,
                Address::repeat_byte(i as u8 + 1),
                Some(Address::repeat_byte(0xee)),
                "test",
            )
            .validated();
            registry.upsert(venue).await.unwrap();
        }
        Arc::new(registry)
    }

    fn cache() -> Arc<PriceCache> {
        Arc::new(PriceCache::new(
            Duration::from_secs(5),
            Duration::from_secs(60),
            Duration::from_secs(1),
        ))
    }

    fn market(gas_gwei: u128) -> MarketCondition {
        MarketCondition {
            gas_price: Some(gas_gwei * GWEI),
            priority_fee: Some(0),
            market_volatility: Some(0.0),
            network_congestion: Some(0.0),
            source: None,
        }
    }

    async fn detector(names: &[&str], venues: MockVenues) -> OpportunityDetector {
        OpportunityDetector::new(registry(names).await, cache(), Arc::new(venues), DetectorSettings::default())
    }

    #[tokio::test]
    async fn test_end_to_end_weth_usdc() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc_reversed(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0);
        let detector = detector(&["A", "B"], venues).await;

        let found = detector.detect(&market(1), &DetectionRequest::default()).await.unwrap();

        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.route.len(), 2);
        assert_eq!(opp.route[0].venue, "A");
        assert_eq!(opp.route[0].token_in, USDC);
        assert_eq!(opp.route[0].token_out, WETH);
        assert_eq!(opp.route[1].venue, "B");
        assert_eq!(opp.route[1].token_out, USDC);
        assert!((opp.expected_profit_percentage - 0.5).abs() < 1e-9);

        // 10 USDC valued at the sell price, 300k gas at 1 gwei
        assert_eq!(opp.gas_estimate, 300_000);
        assert_eq!(opp.gas_cost, U256::from(300_000_000_000_000u64));
        assert_eq!(opp.expected_profit, U256::from(4_975_124_378_109_453u64));
        assert_eq!(opp.expected_profit_after_gas, opp.expected_profit - opp.gas_cost);
        assert_eq!(opp.status, OpportunityStatus::Detected);
        assert_eq!(opp.strategy, StrategyType::CrossVenue);
        assert!((opp.confidence - 0.1).abs() < 1e-9);
        assert!((opp.risk_score - 0.9).abs() < 1e-9);
        assert_eq!(opp.metadata["buy_venue"], "A");
        assert_eq!(opp.metadata["pair"], "WETH/USDC");
    }

    #[tokio::test]
    async fn test_equal_prices_yield_nothing() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2000.0);
        let detector = detector(&["A", "B"], venues).await;
        assert!(detector.detect(&market(1), &DetectionRequest::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profit_below_buffered_gas_is_excluded() {
        // 0.005 WETH profit against 300k gas at 20 gwei (0.006 WETH, 0.009 buffered)
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0);
        let detector = detector(&["A", "B"], venues).await;
        assert!(detector.detect(&market(20), &DetectionRequest::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_buffer_applies_to_gate_not_report() {
        // Raw gas 0.0045 WETH clears, buffered 0.00675 WETH does not
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0);
        let detector = detector(&["A", "B"], venues).await;
        assert!(detector.detect(&market(15), &DetectionRequest::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_percentage_floor_boundary() {
        let at_floor = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2001.0);
        let cheap_gas = MarketCondition {
            gas_price: Some(GWEI / 10),
            ..market(0)
        };
        let found = detector(&["A", "B"], at_floor)
            .await
            .detect(&cheap_gas, &DetectionRequest::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let below_floor = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2000.8);
        let found = detector(&["A", "B"], below_floor)
            .await
            .detect(&cheap_gas, &DetectionRequest::default())
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_ranked_by_profit_and_truncated() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .pair("C", weth_usdc(3))
            .pair("A", weth_dai(4))
            .pair("B", weth_dai(5))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0)
            .price("C", WETH, USDC, 2030.0)
            .price("A", WETH, DAI, 2000.0)
            .price("B", WETH, DAI, 2050.0);
        let detector = detector(&["A", "B", "C"], venues).await;

        let found = detector.detect(&market(1), &DetectionRequest::default()).await.unwrap();
        // A->B, A->C, B->C on USDC plus A->B on DAI
        assert_eq!(found.len(), 4);
        assert!(found
            .windows(2)
            .all(|w| w[0].expected_profit >= w[1].expected_profit));
        assert_eq!(found[0].metadata["pair"], "WETH/DAI");

        let request = DetectionRequest {
            max_results: Some(2),
            ..Default::default()
        };
        assert_eq!(detector.detect(&market(1), &request).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_venue_does_not_abort_pass() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .pair("C", weth_usdc(3))
            .failing("C")
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0)
            .price("C", WETH, USDC, 2500.0);
        let detector = detector(&["A", "B", "C"], venues).await;

        let found = detector.detect(&market(1), &DetectionRequest::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].route[1].venue, "B");
    }

    #[tokio::test]
    async fn test_missing_and_zero_quotes_are_skipped() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .pair("C", weth_usdc(3))
            .pair("D", weth_usdc(4))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0)
            .price("C", WETH, USDC, 0.0);
        let detector = detector(&["A", "B", "C", "D"], venues).await;

        let found = detector.detect(&market(1), &DetectionRequest::default()).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_unvalidated_venues_are_not_scanned() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0);
        let registry = registry(&["A"]).await;
        registry
            .upsert(Venue::candidate(
                "B",
                1,
                DexProtocolType::AmmV2,
                Address::repeat_byte(9),
                Some(Address::repeat_byte(0xee)),
                "test",
            ))
            .await
            .unwrap();
        let detector = OpportunityDetector::new(registry, cache(), Arc::new(venues), DetectorSettings::default());
        assert!(detector.detect(&market(1), &DetectionRequest::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filters() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .pair("C", weth_usdc(3))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0)
            .price("C", WETH, USDC, 2020.0);
        let detector = detector(&["A", "B", "C"], venues).await;

        let only_ab = DetectionRequest {
            venue_filter: Some(HashSet::from(["A".to_string(), "B".to_string()])),
            ..Default::default()
        };
        assert_eq!(detector.detect(&market(1), &only_ab).await.unwrap().len(), 1);

        let dai_only = DetectionRequest {
            token_filter: Some(HashSet::from([DAI])),
            ..Default::default()
        };
        assert!(detector.detect(&market(1), &dai_only).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_filter_reaches_the_pair_cap() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("A", weth_dai(2))
            .pair("B", weth_usdc(3))
            .pair("B", weth_dai(4))
            .price("A", WETH, DAI, 2000.0)
            .price("B", WETH, DAI, 2010.0);
        let settings = DetectorSettings {
            max_pairs_per_venue: 1,
            ..Default::default()
        };
        let detector = OpportunityDetector::new(registry(&["A", "B"]).await, cache(), Arc::new(venues), settings);

        let dai_only = DetectionRequest {
            token_filter: Some(HashSet::from([DAI])),
            ..Default::default()
        };
        let found = detector.detect(&market(1), &dai_only).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata["pair"], "WETH/DAI");
    }

    #[tokio::test]
    async fn test_both_directions_of_one_venue_pair() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0);
        let detector = detector(&["A", "B"], venues).await;

        let no_floor = DetectionRequest {
            min_profit_floor: Some(U256::ZERO),
            ..Default::default()
        };
        let found = detector.detect(&market(0), &no_floor).await.unwrap();
        assert_eq!(found.len(), 2);

        let weth_leg = found.iter().find(|o| o.metadata["pair"] == "WETH/USDC").unwrap();
        assert_eq!(weth_leg.metadata["buy_venue"], "A");
        assert_eq!(weth_leg.route[0].token_in, USDC);

        let usdc_leg = found.iter().find(|o| o.metadata["pair"] == "USDC/WETH").unwrap();
        assert_eq!(usdc_leg.metadata["buy_venue"], "B");
        assert_eq!(usdc_leg.route[0].token_in, WETH);
        assert_eq!(usdc_leg.gas_cost, U256::ZERO);
        assert!(usdc_leg.expected_profit > U256::ZERO);
    }

    /// Same pair list on every venue; tracks how many quotes are in flight
    #[derive(Default)]
    struct CountingVenues {
        pairs: Vec<TokenPair>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        quotes: AtomicUsize,
    }

    #[async_trait]
    impl VenueClient for CountingVenues {
        async fn fetch_pairs(
            &self,
            _venue: &Venue,
            limit: usize,
            _token_filter: Option<&HashSet<Address>>,
        ) -> Result<Vec<TokenPair>, VenueError> {
            Ok(self.pairs.iter().take(limit).cloned().collect())
        }

        async fn quote(&self, _venue: &Venue, _pair: &TokenPair, _token_in: Address) -> Result<Option<f64>, VenueError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.quotes.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_groups_compared_one_batch_at_a_time() {
        let venues = Arc::new(CountingVenues {
            pairs: (0..5u8)
                .map(|i| TokenPair::new(Address::repeat_byte(0x40 + i), Address::repeat_byte(0x10 + i), WETH, 18, 18, 3000))
                .collect(),
            ..Default::default()
        });
        let settings = DetectorSettings {
            batch_size: 2,
            ..Default::default()
        };
        let detector = OpportunityDetector::new(registry(&["A", "B"]).await, cache(), venues.clone(), settings);

        let found = detector.detect(&market(1), &DetectionRequest::default()).await.unwrap();
        assert!(found.is_empty());

        // 5 groups x 2 venues x 2 directions, never more than one batch of 2 groups at once
        assert_eq!(venues.quotes.load(Ordering::SeqCst), 20);
        assert_eq!(venues.peak.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_profit_floor_override() {
        let venues = MockVenues::default()
            .pair("A", weth_usdc(1))
            .pair("B", weth_usdc(2))
            .price("A", WETH, USDC, 2000.0)
            .price("B", WETH, USDC, 2010.0);
        let detector = detector(&["A", "B"], venues).await;

        let high_floor = DetectionRequest {
            min_profit_floor: Some(U256::from(10u64).pow(U256::from(18))),
            ..Default::default()
        };
        assert!(detector.detect(&market(1), &high_floor).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pair_lists_come_from_cache() {
        let venues = Arc::new(
            MockVenues::default()
                .pair("A", weth_usdc(1))
                .pair("B", weth_usdc(2))
                .price("A", WETH, USDC, 2000.0)
                .price("B", WETH, USDC, 2010.0),
        );
        let detector = OpportunityDetector::new(
            registry(&["A", "B"]).await,
            cache(),
            venues.clone(),
            DetectorSettings::default(),
        );

        detector.detect(&market(1), &DetectionRequest::default()).await.unwrap();
        detector.detect(&market(1), &DetectionRequest::default()).await.unwrap();
        assert_eq!(venues.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_settings_are_config_errors() {
        let settings = DetectorSettings {
            batch_size: 0,
            ..Default::default()
        };
        let detector = OpportunityDetector::new(
            registry(&[]).await,
            cache(),
            Arc::new(MockVenues::default()),
            settings,
        );
        assert!(matches!(
            detector.detect(&market(1), &DetectionRequest::default()).await,
            Err(DetectorError::Config(_))
        ));

        let detector = detector_with_defaults().await;
        let zero = DetectionRequest {
            max_results: Some(0),
            ..Default::default()
        };
        assert!(detector.detect(&market(1), &zero).await.is_err());
    }

    async fn detector_with_defaults() -> OpportunityDetector {
        detector(&[], MockVenues::default()).await
    }
}
