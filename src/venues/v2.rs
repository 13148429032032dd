//! Constant-product (Uniswap V2 style) venues

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashSet;
use std::ops::Range;
use tracing::debug;

use super::multicall::{self, Multicall};
use super::{base_combinations, fill_liquidity_usd, resolve_decimals, TokenPair, VenueClient, VenueError};
use crate::abi::{IUniswapV2Factory, IUniswapV2Pair};
use crate::chain::ChainError;
use crate::registry::Venue;

/// Listing entries scanned per requested pair when a token filter is set
const FILTERED_SCAN_FACTOR: usize = 10;

pub struct V2VenueClient {
    multicall: Multicall,
    base_tokens: Vec<Address>,
}

impl V2VenueClient {
    pub fn new(multicall: Multicall, base_tokens: Vec<Address>) -> Self {
        Self { multicall, base_tokens }
    }

    /// Pools for every base-token combination that has one
    async fn lookup_base_pairs(&self, venue: &Venue) -> Result<Vec<(Address, Address, Address)>, ChainError> {
        let keys = base_combinations(&self.base_tokens);
        let calls = keys
            .iter()
            .map(|k| {
                multicall::call3(
                    venue.factory,
                    IUniswapV2Factory::getPairCall { tokenA: k.low, tokenB: k.high }.abi_encode(),
                )
            })
            .collect();

        let results = self.multicall.aggregate(calls).await?;

        Ok(keys
            .iter()
            .zip(results.iter())
            .filter_map(|(k, r)| {
                multicall::decode::<IUniswapV2Factory::getPairCall>(r)
                    .filter(|pool| *pool != Address::ZERO)
                    .map(|pool| (pool, k.low, k.high))
            })
            .collect())
    }

    /// Reserve depth of every pool, valued in USD where a side is priceable.
    /// A failed batch leaves the pairs unvalued.
    async fn fill_liquidity(&self, venue: &Venue, pairs: &mut [TokenPair]) {
        let calls = pairs
            .iter()
            .map(|p| multicall::call3(p.pool, IUniswapV2Pair::getReservesCall {}.abi_encode()))
            .collect();

        let results = match self.multicall.aggregate(calls).await {
            Ok(results) => results,
            Err(e) => {
                debug!("{}: reserves unavailable for liquidity: {}", venue.name, e);
                return;
            }
        };

        let depths: Vec<Option<(f64, f64)>> = pairs
            .iter()
            .zip(results.iter())
            .map(|(pair, r)| {
                let reserves = multicall::decode::<IUniswapV2Pair::getReservesCall>(r)?;
                Some(reserve_depth(pair, reserves.reserve0.to::<u128>(), reserves.reserve1.to::<u128>()))
            })
            .collect();
        fill_liquidity_usd(pairs, &depths);
    }

    async fn listing_length(&self, venue: &Venue) -> Result<usize, ChainError> {
        let raw = self
            .multicall
            .chain()
            .call(
                venue.factory,
                Bytes::from(IUniswapV2Factory::allPairsLengthCall {}.abi_encode()),
            )
            .await?;
        let length = IUniswapV2Factory::allPairsLengthCall::abi_decode_returns(&raw)
            .map_err(|e| ChainError::Malformed(format!("allPairsLength: {}", e)))?;
        Ok(length.saturating_to::<usize>())
    }

    /// Entries `range` of the factory's own listing
    async fn list_pairs(&self, venue: &Venue, range: Range<usize>) -> Result<Vec<(Address, Address, Address)>, ChainError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let calls = range
            .map(|i| {
                multicall::call3(
                    venue.factory,
                    IUniswapV2Factory::allPairsCall { index: U256::from(i) }.abi_encode(),
                )
            })
            .collect();
        let pools: Vec<Address> = self
            .multicall
            .aggregate(calls)
            .await?
            .iter()
            .filter_map(multicall::decode::<IUniswapV2Factory::allPairsCall>)
            .filter(|p| *p != Address::ZERO)
            .collect();

        let mut calls = Vec::with_capacity(pools.len() * 2);
        for pool in &pools {
            calls.push(multicall::call3(*pool, IUniswapV2Pair::token0Call {}.abi_encode()));
            calls.push(multicall::call3(*pool, IUniswapV2Pair::token1Call {}.abi_encode()));
        }
        let results = self.multicall.aggregate(calls).await?;

        Ok(pools
            .iter()
            .enumerate()
            .filter_map(|(i, pool)| {
                let t0 = results.get(i * 2).and_then(multicall::decode::<IUniswapV2Pair::token0Call>)?;
                let t1 = results.get(i * 2 + 1).and_then(multicall::decode::<IUniswapV2Pair::token1Call>)?;
                Some((*pool, t0, t1))
            })
            .collect())
    }
}

#[async_trait]
impl VenueClient for V2VenueClient {
    async fn fetch_pairs(
        &self,
        venue: &Venue,
        limit: usize,
        token_filter: Option<&HashSet<Address>>,
    ) -> Result<Vec<TokenPair>, VenueError> {
        let keep = |t0: &Address, t1: &Address| token_filter.map_or(true, |f| f.contains(t0) || f.contains(t1));

        let mut found: Vec<(Address, Address, Address)> = self
            .lookup_base_pairs(venue)
            .await?
            .into_iter()
            .filter(|(_, t0, t1)| keep(t0, t1))
            .collect();
        found.truncate(limit);

        if found.len() < limit {
            // Listing is best effort; some forks do not expose it
            match self.listing_length(venue).await {
                Ok(length) => {
                    let scan = match token_filter {
                        Some(_) => limit.saturating_mul(FILTERED_SCAN_FACTOR),
                        None => limit,
                    };
                    let bound = length.min(scan);
                    let mut seen: HashSet<Address> = found.iter().map(|(pool, _, _)| *pool).collect();
                    let mut next = 0;

                    while found.len() < limit && next < bound {
                        let end = next.saturating_add(limit).min(bound);
                        match self.list_pairs(venue, next..end).await {
                            Ok(listed) => {
                                for entry in listed {
                                    if found.len() >= limit {
                                        break;
                                    }
                                    if keep(&entry.1, &entry.2) && seen.insert(entry.0) {
                                        found.push(entry);
                                    }
                                }
                            }
                            Err(e) => {
                                debug!("{}: pair listing stopped at {}: {}", venue.name, next, e);
                                break;
                            }
                        }
                        next = end;
                    }
                }
                Err(e) => debug!("{}: pair listing unavailable: {}", venue.name, e),
            }
        }

        let tokens: Vec<Address> = found.iter().flat_map(|(_, t0, t1)| [*t0, *t1]).collect();
        let decimals = resolve_decimals(&self.multicall, &tokens).await;

        let mut pairs: Vec<TokenPair> = found
            .into_iter()
            .map(|(pool, t0, t1)| {
                let d0 = decimals.get(&t0).copied().unwrap_or(crate::tokens::DEFAULT_DECIMALS);
                let d1 = decimals.get(&t1).copied().unwrap_or(crate::tokens::DEFAULT_DECIMALS);
                TokenPair::new(pool, t0, t1, d0, d1, venue.default_fee)
            })
            .collect();

        self.fill_liquidity(venue, &mut pairs).await;
        Ok(pairs)
    }

    async fn quote(&self, _venue: &Venue, pair: &TokenPair, token_in: Address) -> Result<Option<f64>, VenueError> {
        if pair.other(&token_in).is_none() {
            return Err(VenueError::ForeignToken(token_in));
        }

        let raw = self
            .multicall
            .chain()
            .call(pair.pool, Bytes::from(IUniswapV2Pair::getReservesCall {}.abi_encode()))
            .await?;
        let reserves = IUniswapV2Pair::getReservesCall::abi_decode_returns(&raw)
            .map_err(|e| ChainError::Malformed(format!("getReserves: {}", e)))?;

        let r0 = reserves.reserve0.to::<u128>();
        let r1 = reserves.reserve1.to::<u128>();
        Ok(reserve_price(pair, token_in, r0, r1))
    }
}

/// Reserves in whole tokens
fn reserve_depth(pair: &TokenPair, reserve0: u128, reserve1: u128) -> (f64, f64) {
    (
        reserve0 as f64 / 10_f64.powi(pair.decimals0 as i32),
        reserve1 as f64 / 10_f64.powi(pair.decimals1 as i32),
    )
}

/// Spot price of one whole `token_in` from raw reserves
fn reserve_price(pair: &TokenPair, token_in: Address, reserve0: u128, reserve1: u128) -> Option<f64> {
    if reserve0 == 0 || reserve1 == 0 {
        return None;
    }
    let (r0, r1) = reserve_depth(pair, reserve0, reserve1);

    let price = if token_in == pair.token0 { r1 / r0 } else { r0 / r1 };
    (price.is_finite() && price > 0.0).then_some(price)
}
