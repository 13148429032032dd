//! Concentrated-liquidity (Uniswap V3 style) venues

use alloy_primitives::{aliases::U24, Address, Bytes};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

use super::multicall::{self, Multicall};
use super::{base_combinations, fill_liquidity_usd, resolve_decimals, TokenPair, VenueClient, VenueError};
use crate::abi::{IUniswapV3Factory, IUniswapV3Pool};
use crate::chain::ChainError;
use crate::registry::Venue;
use crate::tokens::{limbs_to_f64, DEFAULT_DECIMALS};

pub struct V3VenueClient {
    multicall: Multicall,
    base_tokens: Vec<Address>,
}

impl V3VenueClient {
    pub fn new(multicall: Multicall, base_tokens: Vec<Address>) -> Self {
        Self { multicall, base_tokens }
    }

    /// Active-range depth of every pool from `slot0` and `liquidity()`
    async fn fill_liquidity(&self, venue: &Venue, pairs: &mut [TokenPair]) {
        let mut calls = Vec::with_capacity(pairs.len() * 2);
        for pair in pairs.iter() {
            calls.push(multicall::call3(pair.pool, IUniswapV3Pool::slot0Call {}.abi_encode()));
            calls.push(multicall::call3(pair.pool, IUniswapV3Pool::liquidityCall {}.abi_encode()));
        }

        let results = match self.multicall.aggregate(calls).await {
            Ok(results) => results,
            Err(e) => {
                debug!("{}: pool state unavailable for liquidity: {}", venue.name, e);
                return;
            }
        };

        let depths: Vec<Option<(f64, f64)>> = pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| {
                let slot0 = results.get(i * 2).and_then(multicall::decode::<IUniswapV3Pool::slot0Call>)?;
                let liquidity = results.get(i * 2 + 1).and_then(multicall::decode::<IUniswapV3Pool::liquidityCall>)?;
                virtual_depth(pair, limbs_to_f64(slot0.sqrtPriceX96.as_limbs()), liquidity)
            })
            .collect();
        fill_liquidity_usd(pairs, &depths);
    }
}

#[async_trait]
impl VenueClient for V3VenueClient {
    /// One pool per base-token combination and fee tier
    async fn fetch_pairs(
        &self,
        venue: &Venue,
        limit: usize,
        token_filter: Option<&HashSet<Address>>,
    ) -> Result<Vec<TokenPair>, VenueError> {
        let tiers = if venue.fee_tiers.is_empty() {
            venue.protocol.default_fee_tiers()
        } else {
            venue.fee_tiers.clone()
        };

        let mut probes = Vec::new();
        let wanted = base_combinations(&self.base_tokens)
            .into_iter()
            .filter(|k| token_filter.map_or(true, |f| f.contains(&k.low) || f.contains(&k.high)));
        for key in wanted {
            for fee in &tiers {
                probes.push((key, *fee));
            }
        }

        let calls = probes
            .iter()
            .map(|(key, fee)| {
                multicall::call3(
                    venue.factory,
                    IUniswapV3Factory::getPoolCall {
                        tokenA: key.low,
                        tokenB: key.high,
                        fee: U24::from(*fee),
                    }
                    .abi_encode(),
                )
            })
            .collect();
        let results = self.multicall.aggregate(calls).await?;

        let found: Vec<(Address, Address, Address, u32)> = probes
            .iter()
            .zip(results.iter())
            .filter_map(|((key, fee), r)| {
                multicall::decode::<IUniswapV3Factory::getPoolCall>(r)
                    .filter(|pool| *pool != Address::ZERO)
                    .map(|pool| (pool, key.low, key.high, *fee))
            })
            .take(limit)
            .collect();

        let tokens: Vec<Address> = found.iter().flat_map(|(_, t0, t1, _)| [*t0, *t1]).collect();
        let decimals = resolve_decimals(&self.multicall, &tokens).await;

        let mut pairs: Vec<TokenPair> = found
            .into_iter()
            .map(|(pool, t0, t1, fee)| {
                let d0 = decimals.get(&t0).copied().unwrap_or(DEFAULT_DECIMALS);
                let d1 = decimals.get(&t1).copied().unwrap_or(DEFAULT_DECIMALS);
                TokenPair::new(pool, t0, t1, d0, d1, fee)
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
            .call(pair.pool, Bytes::from(IUniswapV3Pool::slot0Call {}.abi_encode()))
            .await?;
        let slot0 = IUniswapV3Pool::slot0Call::abi_decode_returns(&raw)
            .map_err(|e| ChainError::Malformed(format!("slot0: {}", e)))?;

        let sqrt_price = limbs_to_f64(slot0.sqrtPriceX96.as_limbs());
        Ok(sqrt_price_to_quote(pair, token_in, sqrt_price))
    }
}

/// Virtual reserves at the current price in whole tokens:
/// `x = L / sqrtP`, `y = L * sqrtP`
fn virtual_depth(pair: &TokenPair, sqrt_price_x96: f64, liquidity: u128) -> Option<(f64, f64)> {
    if sqrt_price_x96 <= 0.0 || liquidity == 0 {
        return None;
    }
    let sqrt_price = sqrt_price_x96 / 2_f64.powi(96);
    let l = liquidity as f64;
    let amount0 = l / sqrt_price / 10_f64.powi(pair.decimals0 as i32);
    let amount1 = l * sqrt_price / 10_f64.powi(pair.decimals1 as i32);
    (amount0.is_finite() && amount1.is_finite()).then_some((amount0, amount1))
}

/// Spot price of one whole `token_in` from `sqrtPriceX96`
fn sqrt_price_to_quote(pair: &TokenPair, token_in: Address, sqrt_price_x96: f64) -> Option<f64> {
    if sqrt_price_x96 <= 0.0 {
        return None;
    }
    // token1 per token0, adjusted for decimals
    let price = (sqrt_price_x96 / 2_f64.powi(96)).powi(2)
        * 10_f64.powi(pair.decimals0 as i32 - pair.decimals1 as i32);

    let quote = if token_in == pair.token0 { price } else { 1.0 / price };
    (quote.is_finite() && quote > 0.0).then_some(quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::registry::DexProtocolType;
    use alloy_primitives::aliases::{I24, U160};
    use std::sync::Arc;

    const USDC: Address = Address::repeat_byte(0x01);
    const WETH: Address = Address::repeat_byte(0x02);
    const POOL: Address = Address::repeat_byte(0x55);

    fn pair() -> TokenPair {
        TokenPair::new(POOL, USDC, WETH, 6, 18, 500)
    }

    /// sqrtPriceX96 for "token1 per token0" of `raw_price` in raw units
    fn sqrt_x96(raw_price: f64) -> f64 {
        raw_price.sqrt() * 2_f64.powi(96)
    }

    #[test]
    fn test_sqrt_price_conversion() {
        // 1 USDC = 0.0005 WETH -> raw token1/token0 = 0.0005 * 1e18 / 1e6
        let sp = sqrt_x96(0.0005 * 1e12);
        let usdc_in_weth = sqrt_price_to_quote(&pair(), USDC, sp).unwrap();
        let weth_in_usdc = sqrt_price_to_quote(&pair(), WETH, sp).unwrap();
        assert!((usdc_in_weth - 0.0005).abs() / 0.0005 < 1e-9);
        assert!((weth_in_usdc - 2000.0).abs() / 2000.0 < 1e-9);
    }

    #[test]
    fn test_virtual_depth_matches_price() {
        let sp = sqrt_x96(0.0005 * 1e12);
        let (usdc, weth) = virtual_depth(&pair(), sp, 10u128.pow(18)).unwrap();
        assert!((usdc / weth - 2000.0).abs() / 2000.0 < 1e-9);
        // y = L * sqrtP, in whole WETH
        let expected_weth = 1e18 * (0.0005 * 1e12_f64).sqrt() / 1e18;
        assert!((weth - expected_weth).abs() / expected_weth < 1e-9);

        assert!(virtual_depth(&pair(), sp, 0).is_none());
        assert!(virtual_depth(&pair(), 0.0, 10).is_none());
    }

    #[test]
    fn test_uninitialized_pool_has_no_price() {
        assert!(sqrt_price_to_quote(&pair(), USDC, 0.0).is_none());
    }

    #[tokio::test]
    async fn test_quote_reads_slot0() {
        let sp = sqrt_x96(0.0005 * 1e12) as u128;
        let reply = IUniswapV3Pool::slot0Call::abi_encode_returns(&IUniswapV3Pool::slot0Return {
            sqrtPriceX96: U160::from(sp),
            tick: I24::ZERO,
            observationIndex: 0,
            observationCardinality: 0,
            observationCardinalityNext: 0,
            feeProtocol: 0,
            unlocked: true,
        });
        let chain = MockChain::new().with_call(POOL, IUniswapV3Pool::slot0Call {}.abi_encode(), Ok(reply.into()));
        let client = V3VenueClient::new(Multicall::new(Arc::new(chain)), Vec::new());
        let venue = Venue::candidate(
            "uni-v3",
            1,
            DexProtocolType::AmmV3,
            Address::repeat_byte(0xf0),
            Some(Address::repeat_byte(0xee)),
            "test",
        );

        let price = client.quote(&venue, &pair(), WETH).await.unwrap().unwrap();
        assert!((price - 2000.0).abs() / 2000.0 < 1e-6);
    }
}
