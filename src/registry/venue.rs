//! Venue metadata

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pricing model of a venue. Fee tiers are integers where 1_000_000 = 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DexProtocolType {
    /// Constant-product pairs (Uniswap V2 and forks)
    AmmV2,
    /// Concentrated liquidity with fee tiers (Uniswap V3 and forks)
    AmmV3,
    StableSwap,
    Balancer,
    Custom,
    Unknown,
}

impl DexProtocolType {
    /// Fee tiers a venue of this type supports unless the source says otherwise
    pub fn default_fee_tiers(&self) -> Vec<u32> {
        match self {
            DexProtocolType::AmmV3 => vec![100, 500, 3000, 10000],
            DexProtocolType::AmmV2 => vec![3000],
            DexProtocolType::Balancer => vec![100, 500, 1000, 3000],
            DexProtocolType::StableSwap => vec![400],
            DexProtocolType::Custom | DexProtocolType::Unknown => vec![],
        }
    }

    /// Fee assumed when nothing more specific is known
    pub fn default_fee(&self) -> u32 {
        match self {
            DexProtocolType::AmmV3 | DexProtocolType::AmmV2 => 3000,
            DexProtocolType::Balancer => 1000,
            DexProtocolType::StableSwap => 400,
            DexProtocolType::Custom | DexProtocolType::Unknown => 3000,
        }
    }
}

impl fmt::Display for DexProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DexProtocolType::AmmV2 => write!(f, "AMM-V2"),
            DexProtocolType::AmmV3 => write!(f, "AMM-V3"),
            DexProtocolType::StableSwap => write!(f, "StableSwap"),
            DexProtocolType::Balancer => write!(f, "Balancer"),
            DexProtocolType::Custom => write!(f, "Custom"),
            DexProtocolType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A liquidity venue on one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    /// Unique registry key
    pub name: String,
    pub chain_id: u64,
    pub protocol: DexProtocolType,

    pub factory: Address,
    pub router: Option<Address>,
    pub quoter: Option<Address>,

    pub default_fee: u32,
    pub fee_tiers: Vec<u32>,

    /// Set by the validator; only validated venues are scanned
    pub validated: bool,
    pub validation_errors: Vec<String>,

    pub tvl_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub last_updated: DateTime<Utc>,

    /// Discovery source that produced this record
    pub source: String,
}

impl Venue {
    /// Unvalidated candidate with the protocol's default fee schedule
    pub fn candidate(
        name: impl Into<String>,
        chain_id: u64,
        protocol: DexProtocolType,
        factory: Address,
        router: Option<Address>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            chain_id,
            protocol,
            factory,
            router,
            quoter: None,
            default_fee: protocol.default_fee(),
            fee_tiers: protocol.default_fee_tiers(),
            validated: false,
            validation_errors: Vec::new(),
            tvl_usd: None,
            volume_24h_usd: None,
            last_updated: Utc::now(),
            source: source.into(),
        }
    }

    pub fn with_quoter(mut self, quoter: Address) -> Self {
        self.quoter = Some(quoter);
        self
    }

    pub fn with_last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = at;
        self
    }

    /// Mark as trusted (tests and the built-in address book)
    pub fn validated(mut self) -> Self {
        self.validated = true;
        self.validation_errors.clear();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_tier_table() {
        assert_eq!(DexProtocolType::AmmV3.default_fee_tiers(), vec![100, 500, 3000, 10000]);
        assert_eq!(DexProtocolType::AmmV2.default_fee_tiers(), vec![3000]);
        assert_eq!(DexProtocolType::Balancer.default_fee_tiers(), vec![100, 500, 1000, 3000]);
        assert_eq!(DexProtocolType::StableSwap.default_fee_tiers(), vec![400]);
        assert!(DexProtocolType::Unknown.default_fee_tiers().is_empty());
    }

    #[test]
    fn test_candidate_starts_unvalidated() {
        let venue = Venue::candidate(
            "uniswap-v2",
            1,
            DexProtocolType::AmmV2,
            Address::repeat_byte(1),
            Some(Address::repeat_byte(2)),
            "test",
        );
        assert!(!venue.validated);
        assert_eq!(venue.default_fee, 3000);
        assert!(venue.clone().validated().validated);
    }
}
