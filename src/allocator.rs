//! Position sizing
//!
//! Turns a wallet balance into a safe per-trade amount range: a reserve is
//! held back, the rest is split by per-trade percentage bounds and the
//! number of trades expected to run at once. All arithmetic is integer
//! (parts per million) on smallest units.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::abi::IERC20;
use crate::chain::{ChainError, ChainReader};
use crate::config::Config;
use crate::tokens::{self, to_base_units};

const PPM: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("balance lookup failed for {token}: {source}")]
    Balance {
        token: Address,
        #[source]
        source: ChainError,
    },
}

/// Trade amount bounds for one token, smallest units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRange {
    pub min: U256,
    pub max: U256,
}

impl AllocationRange {
    pub fn clamp(&self, amount: U256) -> U256 {
        if amount < self.min {
            self.min
        } else if amount > self.max {
            self.max
        } else {
            amount
        }
    }
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance_of(&self, token: Address) -> Result<U256, AllocatorError>;
}

/// Wallet balances read from chain. `Address::ZERO` is the raw native coin.
pub struct ChainBalances {
    chain: Arc<dyn ChainReader>,
    wallet: Address,
}

impl ChainBalances {
    pub fn new(chain: Arc<dyn ChainReader>, wallet: Address) -> Self {
        Self { chain, wallet }
    }
}

#[async_trait]
impl BalanceSource for ChainBalances {
    async fn balance_of(&self, token: Address) -> Result<U256, AllocatorError> {
        let wrap = |source| AllocatorError::Balance { token, source };

        if token == Address::ZERO {
            return self.chain.get_balance(self.wallet).await.map_err(wrap);
        }

        let calldata = IERC20::balanceOfCall { owner: self.wallet }.abi_encode();
        let raw = self.chain.call(token, Bytes::from(calldata)).await.map_err(wrap)?;
        IERC20::balanceOfCall::abi_decode_returns(&raw)
            .map_err(|e| wrap(ChainError::Malformed(format!("balanceOf: {}", e))))
    }
}

#[derive(Debug, Clone)]
pub struct AllocatorSettings {
    pub dynamic: bool,
    pub reserve_pct: f64,
    pub min_trade_pct: f64,
    pub max_trade_pct: f64,
    /// Absolute bounds in wei
    pub min_trade_abs: U256,
    pub max_trade_abs: U256,
    pub concurrent_trades: u32,
}

impl AllocatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dynamic: config.dynamic_allocation,
            reserve_pct: config.reserve_pct,
            min_trade_pct: config.min_trade_pct,
            max_trade_pct: config.max_trade_pct,
            min_trade_abs: to_base_units(config.min_trade_native, tokens::DEFAULT_DECIMALS),
            max_trade_abs: to_base_units(config.max_trade_native, tokens::DEFAULT_DECIMALS),
            concurrent_trades: config.max_concurrent_trades,
        }
    }
}

/// Percentage to parts per million, clamped to 0-100%
fn pct_to_ppm(pct: f64) -> U256 {
    if !pct.is_finite() {
        return U256::ZERO;
    }
    let ppm = (pct * 10_000.0).round().clamp(0.0, PPM as f64) as u64;
    U256::from(ppm)
}

fn share(amount: U256, pct: f64) -> U256 {
    amount * pct_to_ppm(pct) / U256::from(PPM)
}

pub struct Allocator {
    balances: Arc<dyn BalanceSource>,
    settings: AllocatorSettings,
    /// Wrapped native token; `Address::ZERO` always counts as native too
    native: Option<Address>,
}

impl Allocator {
    pub fn new(balances: Arc<dyn BalanceSource>, settings: AllocatorSettings, native: Option<Address>) -> Self {
        Self {
            balances,
            settings,
            native,
        }
    }

    fn is_native(&self, token: &Address) -> bool {
        *token == Address::ZERO || self.native == Some(*token)
    }

    pub async fn allocation_range(&self, token: Address) -> Result<AllocationRange, AllocatorError> {
        let s = &self.settings;
        if !s.dynamic {
            return Ok(AllocationRange {
                min: s.min_trade_abs,
                max: s.max_trade_abs,
            });
        }

        let balance = self.balances.balance_of(token).await?;
        let range = self.range_for_balance(token, balance);
        debug!(
            "Allocation for {}: balance {} -> [{}, {}]",
            tokens::display_symbol(&token),
            balance,
            range.min,
            range.max
        );
        Ok(range)
    }

    pub async fn clamp(&self, token: Address, amount: U256) -> Result<U256, AllocatorError> {
        Ok(self.allocation_range(token).await?.clamp(amount))
    }

    fn range_for_balance(&self, token: Address, balance: U256) -> AllocationRange {
        let s = &self.settings;
        let available = balance - share(balance, s.reserve_pct);
        let divisor = U256::from(s.concurrent_trades.max(1));
        let per_trade_max = share(available, s.max_trade_pct) / divisor;
        let per_trade_min = share(available, s.min_trade_pct);

        let (min, max) = if self.is_native(&token) {
            (per_trade_min.max(s.min_trade_abs), per_trade_max.min(s.max_trade_abs))
        } else {
            (per_trade_min, per_trade_max.min(available))
        };

        // Balance too small for the absolute floor: the range collapses to max
        AllocationRange { min: min.min(max), max }
    }
}
