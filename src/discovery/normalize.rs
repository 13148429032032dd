//! Mapping catalog vocabularies onto ours

use alloy_primitives::Address;

use crate::registry::DexProtocolType;
use crate::tokens::{self, normalize_address};

const AVALANCHE: u64 = 43114;
const FANTOM: u64 = 250;

/// Chain id for a catalog's chain name or a scanner's network slug.
/// Unmapped names are `None` and the record is skipped.
pub fn chain_id_for(name: &str) -> Option<u64> {
    let id = match name.trim().to_ascii_lowercase().as_str() {
        "ethereum" | "eth" | "mainnet" => tokens::ETHEREUM,
        "bsc" | "binance" | "bnb" | "bnb chain" => tokens::BSC,
        "polygon" | "polygon_pos" | "matic" => tokens::POLYGON,
        "arbitrum" | "arbitrum one" | "arbitrum_one" => tokens::ARBITRUM,
        "optimism" | "op mainnet" => tokens::OPTIMISM,
        "base" => tokens::BASE,
        "avalanche" | "avax" => AVALANCHE,
        "fantom" | "ftm" => FANTOM,
        _ => return None,
    };
    Some(id)
}

/// Network slug the scanner API uses for a chain
pub fn scanner_network(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        tokens::ETHEREUM => Some("eth"),
        tokens::BSC => Some("bsc"),
        tokens::POLYGON => Some("polygon_pos"),
        tokens::ARBITRUM => Some("arbitrum"),
        tokens::OPTIMISM => Some("optimism"),
        tokens::BASE => Some("base"),
        AVALANCHE => Some("avax"),
        FANTOM => Some("ftm"),
        _ => None,
    }
}

pub fn scanner_networks() -> impl Iterator<Item = (u64, &'static str)> {
    [
        tokens::ETHEREUM,
        tokens::BSC,
        tokens::POLYGON,
        tokens::ARBITRUM,
        tokens::OPTIMISM,
        tokens::BASE,
        AVALANCHE,
        FANTOM,
    ]
    .into_iter()
    .filter_map(|id| scanner_network(id).map(|slug| (id, slug)))
}

/// Protocol type for a category label; anything unrecognized is `Unknown`
pub fn protocol_for_category(category: &str) -> DexProtocolType {
    let c = category.trim().to_ascii_lowercase().replace(['_', ' '], "-");
    match c.as_str() {
        "amm-v2" | "uniswap-v2" | "v2" | "constant-product" | "xyk" => DexProtocolType::AmmV2,
        "amm-v3" | "uniswap-v3" | "v3" | "clmm" | "concentrated-liquidity" => DexProtocolType::AmmV3,
        "stableswap" | "stable-swap" | "curve" | "stable" => DexProtocolType::StableSwap,
        "balancer" | "weighted" | "weighted-pool" => DexProtocolType::Balancer,
        "custom" => DexProtocolType::Custom,
        _ => DexProtocolType::Unknown,
    }
}

/// Protocol type from a category, falling back to hints in the venue name
/// ("Uniswap V3", "sushiswap-v2") when the category is generic.
pub fn protocol_for(category: Option<&str>, name: &str) -> DexProtocolType {
    if let Some(category) = category {
        let protocol = protocol_for_category(category);
        if protocol != DexProtocolType::Unknown {
            return protocol;
        }
    }

    let n = name.to_ascii_lowercase();
    if n.contains("v3") || n.contains("clmm") || n.contains("concentrated") {
        DexProtocolType::AmmV3
    } else if n.contains("v2") {
        DexProtocolType::AmmV2
    } else if n.contains("curve") || n.contains("stable") {
        DexProtocolType::StableSwap
    } else if n.contains("balancer") {
        DexProtocolType::Balancer
    } else {
        DexProtocolType::Unknown
    }
}

/// Registry key: lowercase slug, suffixed with the chain id off mainnet
pub fn venue_name(name: &str, chain_id: u64) -> String {
    let slug: String = name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if chain_id == tokens::ETHEREUM {
        slug
    } else {
        format!("{}-{}", slug, chain_id)
    }
}

/// Optional address field; empty or unparsable is `None`
pub fn optional_address(raw: Option<&str>) -> Option<Address> {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| normalize_address(s).ok())
        .filter(|a| *a != Address::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_names() {
        assert_eq!(chain_id_for("Ethereum"), Some(1));
        assert_eq!(chain_id_for("polygon_pos"), Some(137));
        assert_eq!(chain_id_for(" BSC "), Some(56));
        assert_eq!(chain_id_for("Solana"), None);
        assert_eq!(scanner_network(8453), Some("base"));
        assert_eq!(chain_id_for(scanner_network(42161).unwrap()), Some(42161));
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(protocol_for_category("Uniswap V3"), DexProtocolType::AmmV3);
        assert_eq!(protocol_for_category("amm_v2"), DexProtocolType::AmmV2);
        assert_eq!(protocol_for_category("Stable Swap"), DexProtocolType::StableSwap);
        assert_eq!(protocol_for_category("Yield"), DexProtocolType::Unknown);
    }

    #[test]
    fn test_name_hints_when_category_generic() {
        assert_eq!(protocol_for(Some("Dexes"), "SushiSwap V2"), DexProtocolType::AmmV2);
        assert_eq!(protocol_for(None, "Uniswap V3"), DexProtocolType::AmmV3);
        assert_eq!(protocol_for(Some("Balancer"), "Uniswap V3"), DexProtocolType::Balancer);
        assert_eq!(protocol_for(Some("Dexes"), "Mystery"), DexProtocolType::Unknown);
    }

    #[test]
    fn test_venue_names() {
        assert_eq!(venue_name("Uniswap V3", 1), "uniswap-v3");
        assert_eq!(venue_name("  Pancake  Swap (V2)", 56), "pancake-swap-v2-56");
    }

    #[test]
    fn test_optional_address() {
        assert!(optional_address(None).is_none());
        assert!(optional_address(Some("")).is_none());
        assert!(optional_address(Some("not-an-address")).is_none());
        assert!(optional_address(Some("0x0000000000000000000000000000000000000000")).is_none());
        assert!(optional_address(Some("0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f")).is_some());
    }
}
