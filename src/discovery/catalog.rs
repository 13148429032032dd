//! Protocol catalog API (a JSON array of protocol records)

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::http::{get_json, HttpSourceState};
use super::normalize::{chain_id_for, optional_address, protocol_for, venue_name};
use super::{DiscoveryError, DiscoverySource};
use crate::registry::Venue;
use crate::retry::RetryPolicy;

const SOURCE: &str = "catalog";

#[derive(Debug, Default, Deserialize)]
struct ContractSet {
    #[serde(default)]
    factory: Option<String>,
    #[serde(default)]
    router: Option<String>,
    #[serde(default)]
    quoter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    chains: Vec<String>,
    #[serde(default)]
    tvl: Option<f64>,
    #[serde(default, rename = "volume24h")]
    volume_24h: Option<f64>,
    /// Per-chain contracts keyed by the catalog's chain name
    #[serde(default)]
    contracts: HashMap<String, ContractSet>,
    /// Single-chain records may list contracts inline
    #[serde(flatten)]
    inline: ContractSet,
}

impl CatalogRecord {
    fn contracts_for(&self, chain: &str) -> &ContractSet {
        self.contracts
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(chain))
            .map(|(_, set)| set)
            .unwrap_or(&self.inline)
    }

    /// One venue per mapped chain that has a factory address
    fn into_venues(self, chain_filter: Option<u64>) -> Vec<Venue> {
        let protocol = protocol_for(self.category.as_deref(), &self.name);
        let mut venues = Vec::new();

        for chain in &self.chains {
            let Some(chain_id) = chain_id_for(chain) else {
                continue;
            };
            if chain_filter.is_some_and(|c| c != chain_id) {
                continue;
            }

            let contracts = self.contracts_for(chain);
            let Some(factory) = optional_address(contracts.factory.as_deref()) else {
                debug!("Catalog entry {} on {} has no factory address", self.name, chain);
                continue;
            };

            let mut venue = Venue::candidate(
                venue_name(&self.name, chain_id),
                chain_id,
                protocol,
                factory,
                optional_address(contracts.router.as_deref()),
                SOURCE,
            );
            venue.quoter = optional_address(contracts.quoter.as_deref());
            venue.tvl_usd = self.tvl;
            venue.volume_24h_usd = self.volume_24h;
            venues.push(venue);
        }
        venues
    }
}

/// Records that fail to decode are skipped individually
fn parse_catalog(records: Vec<serde_json::Value>, chain_filter: Option<u64>) -> Vec<Venue> {
    records
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<CatalogRecord>(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping catalog record: {}", e);
                None
            }
        })
        .flat_map(|record| record.into_venues(chain_filter))
        .collect()
}

pub struct CatalogSource {
    url: String,
    state: HttpSourceState,
}

impl CatalogSource {
    pub fn new(url: impl Into<String>, ttl: Duration, lock_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            state: HttpSourceState::new(ttl, lock_timeout, retry),
        }
    }
}

#[async_trait]
impl DiscoverySource for CatalogSource {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn initialize(&self) -> Result<(), DiscoveryError> {
        self.state.initialize().await
    }

    async fn fetch(&self, chain_filter: Option<u64>) -> Result<Vec<Venue>, DiscoveryError> {
        if let Some(venues) = self.state.cached(chain_filter).await {
            debug!("Catalog cache hit ({} venues)", venues.len());
            return Ok(venues);
        }

        let client = self.state.client().await?;
        let Some(records) = get_json::<Vec<serde_json::Value>>(&client, &self.url, &self.state.retry).await? else {
            return Ok(Vec::new());
        };

        let venues = parse_catalog(records, chain_filter);
        info!("📖 Catalog listed {} venues", venues.len());
        self.state.remember(chain_filter, &venues).await;
        Ok(venues)
    }

    async fn close(&self) {
        self.state.close().await;
    }
}
