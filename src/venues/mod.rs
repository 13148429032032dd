//! Venue clients
//!
//! A `VenueClient` lists a venue's tradable pairs and quotes spot prices on
//! them. `ProtocolRouter` picks the implementation from the venue's
//! protocol type; protocols without a client are a soft failure.

pub mod multicall;
mod v2;
mod v3;

pub use multicall::Multicall;
pub use v2::V2VenueClient;
pub use v3::V3VenueClient;

use alloy_primitives::Address;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::abi::IERC20;
use crate::chain::{ChainError, ChainReader};
use crate::registry::{DexProtocolType, Venue};
use crate::tokens::{self, PairKey};

#[derive(Debug, Error)]
pub enum VenueError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("no client for {0} venues")]
    Unsupported(DexProtocolType),

    #[error("{0} is not part of this pair")]
    ForeignToken(Address),
}

/// A tradable two-token market on one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub pool: Address,
    pub token0: Address,
    pub token1: Address,
    pub symbol0: String,
    pub symbol1: String,
    pub decimals0: u8,
    pub decimals1: u8,
    /// Pool fee, 1_000_000 = 100%
    pub fee: u32,
    pub liquidity_usd: Option<f64>,
}

impl TokenPair {
    pub fn new(pool: Address, token0: Address, token1: Address, decimals0: u8, decimals1: u8, fee: u32) -> Self {
        Self {
            pool,
            token0,
            token1,
            symbol0: tokens::display_symbol(&token0),
            symbol1: tokens::display_symbol(&token1),
            decimals0,
            decimals1,
            fee,
            liquidity_usd: None,
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(self.token0, self.token1)
    }

    /// At least one side is in the filter
    pub fn matches(&self, filter: &HashSet<Address>) -> bool {
        filter.contains(&self.token0) || filter.contains(&self.token1)
    }

    pub fn decimals_of(&self, token: &Address) -> Option<u8> {
        if *token == self.token0 {
            Some(self.decimals0)
        } else if *token == self.token1 {
            Some(self.decimals1)
        } else {
            None
        }
    }

    pub fn symbol_of(&self, token: &Address) -> String {
        if *token == self.token0 {
            self.symbol0.clone()
        } else if *token == self.token1 {
            self.symbol1.clone()
        } else {
            tokens::display_symbol(token)
        }
    }

    pub fn other(&self, token: &Address) -> Option<Address> {
        if *token == self.token0 {
            Some(self.token1)
        } else if *token == self.token1 {
            Some(self.token0)
        } else {
            None
        }
    }
}

#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Up to `limit` pairs tradable on `venue`. With a filter, only pairs
    /// with a side in it are returned and counted toward `limit`.
    async fn fetch_pairs(
        &self,
        venue: &Venue,
        limit: usize,
        token_filter: Option<&HashSet<Address>>,
    ) -> Result<Vec<TokenPair>, VenueError>;

    /// Spot price of one whole `token_in` in units of the other token.
    /// `None` when the pool has no usable price.
    async fn quote(&self, venue: &Venue, pair: &TokenPair, token_in: Address) -> Result<Option<f64>, VenueError>;
}

/// Dispatches on `Venue::protocol`
pub struct ProtocolRouter {
    v2: V2VenueClient,
    v3: V3VenueClient,
}

impl ProtocolRouter {
    pub fn new(chain: Arc<dyn ChainReader>, base_tokens: Vec<Address>) -> Self {
        let multicall = Multicall::new(chain);
        Self {
            v2: V2VenueClient::new(multicall.clone(), base_tokens.clone()),
            v3: V3VenueClient::new(multicall, base_tokens),
        }
    }

    fn client_for(&self, protocol: DexProtocolType) -> Result<&dyn VenueClient, VenueError> {
        match protocol {
            DexProtocolType::AmmV2 => Ok(&self.v2),
            DexProtocolType::AmmV3 => Ok(&self.v3),
            other => Err(VenueError::Unsupported(other)),
        }
    }
}

#[async_trait]
impl VenueClient for ProtocolRouter {
    async fn fetch_pairs(
        &self,
        venue: &Venue,
        limit: usize,
        token_filter: Option<&HashSet<Address>>,
    ) -> Result<Vec<TokenPair>, VenueError> {
        self.client_for(venue.protocol)?
            .fetch_pairs(venue, limit, token_filter)
            .await
    }

    async fn quote(&self, venue: &Venue, pair: &TokenPair, token_in: Address) -> Result<Option<f64>, VenueError> {
        self.client_for(venue.protocol)?.quote(venue, pair, token_in).await
    }
}

/// Decimals for a set of tokens: table first, then `decimals()` on chain,
/// 18 when the call fails
pub(crate) async fn resolve_decimals(multicall: &Multicall, tokens: &[Address]) -> HashMap<Address, u8> {
    let mut resolved = HashMap::new();
    let mut unknown = Vec::new();

    for token in tokens {
        match tokens::known_token(token) {
            Some(t) => {
                resolved.insert(*token, t.decimals);
            }
            None => unknown.push(*token),
        }
    }
    unknown.sort();
    unknown.dedup();

    if unknown.is_empty() {
        return resolved;
    }

    let calls = unknown
        .iter()
        .map(|t| multicall::call3(*t, IERC20::decimalsCall {}.abi_encode()))
        .collect();

    let results = multicall.aggregate(calls).await.unwrap_or_default();
    for (i, token) in unknown.iter().enumerate() {
        let decimals = results
            .get(i)
            .and_then(multicall::decode::<IERC20::decimalsCall>)
            .unwrap_or(tokens::DEFAULT_DECIMALS);
        resolved.insert(*token, decimals);
    }

    resolved
}

/// Set `liquidity_usd` from whole-token pool depths, `depths[i]` belonging to
/// `pairs[i]`. A pool is worth twice its stablecoin side, or twice its native
/// side priced through a native/stable pool of the same set. Pools with
/// neither side priceable stay `None`.
pub(crate) fn fill_liquidity_usd(pairs: &mut [TokenPair], depths: &[Option<(f64, f64)>]) {
    let native_usd = pairs.iter().zip(depths).find_map(|(pair, depth)| {
        let (amount0, amount1) = (*depth)?;
        let price = if tokens::is_stablecoin(&pair.token0) && tokens::is_native(&pair.token1) {
            amount0 / amount1
        } else if tokens::is_native(&pair.token0) && tokens::is_stablecoin(&pair.token1) {
            amount1 / amount0
        } else {
            return None;
        };
        (price.is_finite() && price > 0.0).then_some(price)
    });

    for (pair, depth) in pairs.iter_mut().zip(depths) {
        let Some((amount0, amount1)) = *depth else { continue };
        let side_usd = if tokens::is_stablecoin(&pair.token0) {
            Some(amount0)
        } else if tokens::is_stablecoin(&pair.token1) {
            Some(amount1)
        } else if tokens::is_native(&pair.token0) {
            native_usd.map(|p| amount0 * p)
        } else if tokens::is_native(&pair.token1) {
            native_usd.map(|p| amount1 * p)
        } else {
            None
        };
        pair.liquidity_usd = side_usd.map(|v| v * 2.0).filter(|v| v.is_finite() && *v >= 0.0);
    }
}

/// Every unordered pair of distinct base tokens
pub(crate) fn base_combinations(base_tokens: &[Address]) -> Vec<PairKey> {
    let mut keys = Vec::new();
    for (i, a) in base_tokens.iter().enumerate() {
        for b in &base_tokens[i + 1..] {
            if a != b {
                keys.push(PairKey::new(*a, *b));
            }
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;

    #[test]
    fn test_pair_helpers() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let pair = TokenPair::new(Address::repeat_byte(9), b, a, 18, 6, 3000);

        assert_eq!(pair.key(), PairKey::new(a, b));
        assert_eq!(pair.decimals_of(&a), Some(6));
        assert_eq!(pair.other(&b), Some(a));
        assert_eq!(pair.other(&Address::ZERO), None);
        assert!(pair.matches(&HashSet::from([a])));
        assert!(!pair.matches(&HashSet::from([Address::ZERO])));
    }

    #[test]
    fn test_base_combinations() {
        let tokens = [Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3)];
        assert_eq!(base_combinations(&tokens).len(), 3);
        assert!(base_combinations(&tokens[..1]).is_empty());
    }

    #[test]
    fn test_liquidity_priced_from_stable_and_native_sides() {
        let weth = tokens::native_token(tokens::ETHEREUM).unwrap();
        let known = |symbol: &str| {
            tokens::known_tokens(tokens::ETHEREUM)
                .find(|t| t.symbol == symbol)
                .unwrap()
                .address
        };
        let (usdc, link, uni) = (known("USDC"), known("LINK"), known("UNI"));

        let mut pairs = vec![
            TokenPair::new(Address::repeat_byte(1), weth, usdc, 18, 6, 3000),
            TokenPair::new(Address::repeat_byte(2), link, weth, 18, 18, 3000),
            TokenPair::new(Address::repeat_byte(3), link, uni, 18, 18, 3000),
            TokenPair::new(Address::repeat_byte(4), usdc, weth, 6, 18, 500),
        ];
        let depths = vec![
            Some((1_000.0, 2_000_000.0)),
            Some((10_000.0, 50.0)),
            Some((1.0, 1.0)),
            None,
        ];
        fill_liquidity_usd(&mut pairs, &depths);

        assert_eq!(pairs[0].liquidity_usd, Some(4_000_000.0));
        // 50 WETH at 2000 USD, both sides
        let link_weth = pairs[1].liquidity_usd.unwrap();
        assert!((link_weth - 200_000.0).abs() < 1e-6);
        assert_eq!(pairs[2].liquidity_usd, None);
        assert_eq!(pairs[3].liquidity_usd, None);
    }

    #[test]
    fn test_native_side_unpriced_without_reference_pool() {
        let weth = tokens::native_token(tokens::ETHEREUM).unwrap();
        let mut pairs = vec![TokenPair::new(Address::repeat_byte(2), Address::repeat_byte(9), weth, 18, 18, 3000)];
        fill_liquidity_usd(&mut pairs, &[Some((10.0, 10.0))]);
        assert_eq!(pairs[0].liquidity_usd, None);
    }

    #[tokio::test]
    async fn test_unsupported_protocol_is_error() {
        let router = ProtocolRouter::new(Arc::new(MockChain::new()), Vec::new());
        let venue = Venue::candidate(
            "curve",
            1,
            DexProtocolType::StableSwap,
            Address::repeat_byte(1),
            Some(Address::repeat_byte(2)),
            "test",
        );
        assert!(matches!(
            router.fetch_pairs(&venue, 10, None).await,
            Err(VenueError::Unsupported(DexProtocolType::StableSwap))
        ));
    }
}
