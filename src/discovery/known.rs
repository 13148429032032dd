//! Built-in address book of well-known venues

use alloy_primitives::{address, Address};
use async_trait::async_trait;

use super::{DiscoveryError, DiscoverySource};
use crate::registry::{DexProtocolType, Venue};
use crate::tokens::{ARBITRUM, BASE, BSC, ETHEREUM};

const SOURCE: &str = "address-book";

struct KnownVenue {
    name: &'static str,
    chain_id: u64,
    protocol: DexProtocolType,
    factory: Address,
    router: Address,
    quoter: Option<Address>,
}

const KNOWN_VENUES: &[KnownVenue] = &[
    // Ethereum
    KnownVenue {
        name: "uniswap-v2",
        chain_id: ETHEREUM,
        protocol: DexProtocolType::AmmV2,
        factory: address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
        router: address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
        quoter: None,
    },
    KnownVenue {
        name: "uniswap-v3",
        chain_id: ETHEREUM,
        protocol: DexProtocolType::AmmV3,
        factory: address!("1F98431c8aD98523631AE4a59f267346ea31F984"),
        router: address!("E592427A0AEce92De3Edee1F18E0157C05861564"),
        quoter: Some(address!("b27308f9F90D607463bb33eA1BeBb41C27CE5AB6")),
    },
    KnownVenue {
        name: "sushiswap",
        chain_id: ETHEREUM,
        protocol: DexProtocolType::AmmV2,
        factory: address!("C0AEe478e3658e2610c5F7A4A2E1777cE9e4f2Ac"),
        router: address!("d9e1cE17f2641f24aE83637ab66a2cca9C378B9F"),
        quoter: None,
    },
    // Base
    KnownVenue {
        name: "uniswap-v3-base",
        chain_id: BASE,
        protocol: DexProtocolType::AmmV3,
        factory: address!("33128a8fC17869897dcE68Ed026d694621f6FDfD"),
        router: address!("2626664c2603336E57B271c5C0b26F421741e481"),
        quoter: Some(address!("3d4e44Eb1374240CE5F1B871ab261CD16335B76a")),
    },
    KnownVenue {
        name: "baseswap",
        chain_id: BASE,
        protocol: DexProtocolType::AmmV2,
        factory: address!("FDa619b6d20975be80A10332cD39b9a4b0FAa8BB"),
        router: address!("327Df1E6de05895d2ab08513aaDD9313Fe505d86"),
        quoter: None,
    },
    // Arbitrum
    KnownVenue {
        name: "uniswap-v3-arbitrum",
        chain_id: ARBITRUM,
        protocol: DexProtocolType::AmmV3,
        factory: address!("1F98431c8aD98523631AE4a59f267346ea31F984"),
        router: address!("E592427A0AEce92De3Edee1F18E0157C05861564"),
        quoter: Some(address!("b27308f9F90D607463bb33eA1BeBb41C27CE5AB6")),
    },
    // BSC
    KnownVenue {
        name: "pancakeswap-v2",
        chain_id: BSC,
        protocol: DexProtocolType::AmmV2,
        factory: address!("cA143Ce32Fe78f1f7019d7d551a6402fC5350c73"),
        router: address!("10ED43C718714eb63d5aA57B78B54704E256024E"),
        quoter: None,
    },
    KnownVenue {
        name: "pancakeswap-v3",
        chain_id: BSC,
        protocol: DexProtocolType::AmmV3,
        factory: address!("0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865"),
        router: address!("13f4EA83D0bd40E75C8222255bc855a974568Dd4"),
        quoter: Some(address!("B048Bbc1Ee6b733FFfCFb9e9CeF7375518e25997")),
    },
];

/// Candidates from the address book. No network, never fails.
#[derive(Debug, Default)]
pub struct KnownVenueSource;

impl KnownVenueSource {
    pub fn new() -> Self {
        Self
    }

    fn to_venue(known: &KnownVenue) -> Venue {
        let venue = Venue::candidate(
            known.name,
            known.chain_id,
            known.protocol,
            known.factory,
            Some(known.router),
            SOURCE,
        );

        match known.quoter {
            Some(quoter) => venue.with_quoter(quoter),
            None => venue,
        }
    }
}

#[async_trait]
impl DiscoverySource for KnownVenueSource {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn initialize(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn fetch(&self, chain_filter: Option<u64>) -> Result<Vec<Venue>, DiscoveryError> {
        Ok(KNOWN_VENUES
            .iter()
            .filter(|k| chain_filter.map_or(true, |c| c == k.chain_id))
            .map(Self::to_venue)
            .collect())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_mainnet_book() {
        let venues = assert_ok!(KnownVenueSource::new().fetch(Some(ETHEREUM)).await);
        assert_eq!(venues.len(), 3);
        assert!(venues.iter().all(|v| v.chain_id == ETHEREUM && !v.validated));

        let v3 = venues.iter().find(|v| v.name == "uniswap-v3").unwrap();
        assert_eq!(v3.protocol, DexProtocolType::AmmV3);
        assert_eq!(v3.fee_tiers, vec![100, 500, 3000, 10000]);
        assert!(v3.quoter.is_some());
    }

    #[tokio::test]
    async fn test_unknown_chain_is_empty() {
        assert!(KnownVenueSource::new().fetch(Some(999)).await.unwrap().is_empty());
        assert_eq!(KnownVenueSource::new().fetch(None).await.unwrap().len(), KNOWN_VENUES.len());
    }

    #[test]
    fn test_names_unique() {
        let mut names: Vec<_> = KNOWN_VENUES.iter().map(|k| k.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), KNOWN_VENUES.len());
    }
}
