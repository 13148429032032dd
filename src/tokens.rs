//! Token identity for Spotter
//!
//! - Canonical address parsing (every address is stored as `Address`, rendered checksummed)
//! - The unordered pair key used to group the same market across venues
//! - Well-known token metadata (symbols, decimals) and wrapped native tokens per chain

use alloy_primitives::{address, Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

// ============================================
// CHAIN IDS
// ============================================

pub const ETHEREUM: u64 = 1;
pub const OPTIMISM: u64 = 10;
pub const BSC: u64 = 56;
pub const POLYGON: u64 = 137;
pub const BASE: u64 = 8453;
pub const ARBITRUM: u64 = 42161;

/// Default decimals when a token is not in the table and the chain read failed
pub const DEFAULT_DECIMALS: u8 = 18;

/// 1 gwei in wei
pub const GWEI: u128 = 1_000_000_000;

// ============================================
// UNITS
// ============================================

/// Whole-token amount to smallest units. Non-finite and negative input is zero;
/// values past u128 saturate.
pub fn to_base_units(amount: f64, decimals: u8) -> U256 {
    if !amount.is_finite() || amount <= 0.0 {
        return U256::ZERO;
    }
    let scaled = amount * 10_f64.powi(decimals as i32);
    if scaled >= u128::MAX as f64 {
        return U256::from(u128::MAX);
    }
    U256::from(scaled as u128)
}

/// Smallest units to a whole-token float (lossy, for display and ratios)
pub fn from_base_units(amount: U256, decimals: u8) -> f64 {
    limbs_to_f64(amount.as_limbs()) / 10_f64.powi(decimals as i32)
}

/// Little-endian 64-bit limbs of any `Uint` to f64
pub fn limbs_to_f64(limbs: &[u64]) -> f64 {
    limbs
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

pub fn gwei_to_wei(gwei: f64) -> u128 {
    if !gwei.is_finite() || gwei <= 0.0 {
        return 0;
    }
    (gwei * GWEI as f64).round() as u128
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid address: {0:?}")]
pub struct InvalidAddress(pub String);

/// Parse any-case hex into the canonical address form.
///
/// Mixed-case input must carry a valid EIP-55 checksum; all-lowercase and
/// all-uppercase input is accepted as is.
pub fn normalize_address(raw: &str) -> Result<Address, InvalidAddress> {
    let trimmed = raw.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let is_mixed = hex_part.chars().any(|c| c.is_ascii_lowercase())
        && hex_part.chars().any(|c| c.is_ascii_uppercase());

    if is_mixed {
        Address::parse_checksummed(format!("0x{}", hex_part), None)
            .map_err(|_| InvalidAddress(raw.to_string()))
    } else {
        Address::from_str(&format!("0x{}", hex_part.to_lowercase()))
            .map_err(|_| InvalidAddress(raw.to_string()))
    }
}

/// Checksummed rendering used in logs and metadata
pub fn checksum(address: &Address) -> String {
    address.to_checksum(None)
}

/// Short form for console output: `0xC02a…6Cc2`
pub fn short(address: &Address) -> String {
    let full = checksum(address);
    format!("{}…{}", &full[..6], &full[full.len() - 4..])
}

// ============================================
// PAIR KEY
// ============================================

/// Unordered identity of a two-token market.
///
/// The two addresses are sorted, so `(A, B)` and `(B, A)` produce the same key
/// whichever order a venue reports them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub low: Address,
    pub high: Address,
}

impl PairKey {
    pub fn new(a: Address, b: Address) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, token: &Address) -> bool {
        self.low == *token || self.high == *token
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", checksum(&self.low), checksum(&self.high))
    }
}

/// Stable hash of an optional token filter, used as part of cache keys.
/// `None` and the empty set both hash to 0.
pub fn token_filter_hash(filter: Option<&HashSet<Address>>) -> u64 {
    let Some(filter) = filter else { return 0 };
    if filter.is_empty() {
        return 0;
    }

    let mut sorted: Vec<&Address> = filter.iter().collect();
    sorted.sort();

    let mut hasher = DefaultHasher::new();
    for token in sorted {
        token.hash(&mut hasher);
    }
    hasher.finish()
}

// ============================================
// KNOWN TOKENS
// ============================================

/// A token we know metadata for without a chain read
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub chain_id: u64,
    pub symbol: &'static str,
    pub address: Address,
    pub decimals: u8,
}

const KNOWN_TOKENS: &[Token] = &[
    // Ethereum
    Token { chain_id: ETHEREUM, symbol: "WETH", address: address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), decimals: 18 },
    Token { chain_id: ETHEREUM, symbol: "USDC", address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), decimals: 6 },
    Token { chain_id: ETHEREUM, symbol: "USDT", address: address!("dAC17F958D2ee523a2206206994597C13D831ec7"), decimals: 6 },
    Token { chain_id: ETHEREUM, symbol: "DAI", address: address!("6B175474E89094C44Da98b954EedeAC495271d0F"), decimals: 18 },
    Token { chain_id: ETHEREUM, symbol: "WBTC", address: address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"), decimals: 8 },
    Token { chain_id: ETHEREUM, symbol: "wstETH", address: address!("7f39C581F595B53c5cb19bD0b3f8dA6c935E2Ca0"), decimals: 18 },
    Token { chain_id: ETHEREUM, symbol: "LINK", address: address!("514910771AF9Ca656af840dff83E8264EcF986CA"), decimals: 18 },
    Token { chain_id: ETHEREUM, symbol: "UNI", address: address!("1f9840a85d5aF5bf1D1762F925BDADdC4201F984"), decimals: 18 },
    Token { chain_id: ETHEREUM, symbol: "PEPE", address: address!("6982508145454Ce325dDbE47a25d4ec3d2311933"), decimals: 18 },
    Token { chain_id: ETHEREUM, symbol: "AAVE", address: address!("7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9"), decimals: 18 },
    // Base
    Token { chain_id: BASE, symbol: "WETH", address: address!("4200000000000000000000000000000000000006"), decimals: 18 },
    Token { chain_id: BASE, symbol: "USDC", address: address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"), decimals: 6 },
    Token { chain_id: BASE, symbol: "cbETH", address: address!("2Ae3F1Ec7F1F5012CFEab0185bfc7aa3cf0DEc22"), decimals: 18 },
    // Arbitrum
    Token { chain_id: ARBITRUM, symbol: "WETH", address: address!("82aF49447D8a07e3bd95BD0d56f35241523fBab1"), decimals: 18 },
    Token { chain_id: ARBITRUM, symbol: "USDC", address: address!("af88d065e77c8cC2239327C5EDb3A432268e5831"), decimals: 6 },
    // BSC
    Token { chain_id: BSC, symbol: "WBNB", address: address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c"), decimals: 18 },
    Token { chain_id: BSC, symbol: "USDT", address: address!("55d398326f99059fF775485246999027B3197955"), decimals: 18 },
    // Polygon
    Token { chain_id: POLYGON, symbol: "WMATIC", address: address!("0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"), decimals: 18 },
    Token { chain_id: POLYGON, symbol: "USDC", address: address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359"), decimals: 6 },
    // Optimism
    Token { chain_id: OPTIMISM, symbol: "WETH", address: address!("4200000000000000000000000000000000000006"), decimals: 18 },
];

/// Wrapped native (gas) token for a chain
pub fn native_token(chain_id: u64) -> Option<Address> {
    let symbol = match chain_id {
        BSC => "WBNB",
        POLYGON => "WMATIC",
        _ => "WETH",
    };
    KNOWN_TOKENS
        .iter()
        .find(|t| t.chain_id == chain_id && t.symbol == symbol)
        .map(|t| t.address)
}

pub fn known_token(address: &Address) -> Option<&'static Token> {
    KNOWN_TOKENS.iter().find(|t| t.address == *address)
}

/// Dollar-pegged tokens from the table
pub fn is_stablecoin(address: &Address) -> bool {
    known_token(address).is_some_and(|t| matches!(t.symbol, "USDC" | "USDT" | "DAI"))
}

/// Wrapped native token of the chain the table lists it under
pub fn is_native(address: &Address) -> bool {
    known_token(address).is_some_and(|t| native_token(t.chain_id) == Some(t.address))
}

pub fn known_tokens(chain_id: u64) -> impl Iterator<Item = &'static Token> {
    KNOWN_TOKENS.iter().filter(move |t| t.chain_id == chain_id)
}

/// Decimals from the table, defaulting to 18
pub fn decimals_hint(address: &Address) -> u8 {
    known_token(address).map(|t| t.decimals).unwrap_or(DEFAULT_DECIMALS)
}

/// Symbol for display; unknown tokens render as a short address
pub fn display_symbol(address: &Address) -> String {
    known_token(address)
        .map(|t| t.symbol.to_string())
        .unwrap_or_else(|| short(address))
}
