//! DEX scanner API (JSON:API `data[]`, one request per network)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http::{get_json, HttpSourceState};
use super::normalize::{optional_address, protocol_for, scanner_network, scanner_networks, venue_name};
use super::{DiscoveryError, DiscoverySource};
use crate::registry::Venue;
use crate::retry::RetryPolicy;

const SOURCE: &str = "scanner";

#[derive(Debug, Deserialize)]
struct DexList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DexResource {
    id: String,
    #[serde(default)]
    attributes: DexAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct DexAttributes {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    factory_address: Option<String>,
    #[serde(default)]
    router_address: Option<String>,
    #[serde(default)]
    quoter_address: Option<String>,
}

fn parse_dexes(list: DexList, chain_id: u64) -> Vec<Venue> {
    let mut venues = Vec::new();
    for raw in list.data {
        let dex: DexResource = match serde_json::from_value(raw) {
            Ok(dex) => dex,
            Err(e) => {
                debug!("Skipping scanner entry: {}", e);
                continue;
            }
        };
        let attrs = dex.attributes;
        let label = attrs.name.clone().unwrap_or_else(|| dex.id.clone());

        let Some(factory) = optional_address(attrs.factory_address.as_deref()) else {
            debug!("Scanner entry {} on chain {} has no factory address", dex.id, chain_id);
            continue;
        };

        let mut venue = Venue::candidate(
            venue_name(&dex.id, chain_id),
            chain_id,
            protocol_for(attrs.category.as_deref(), &label),
            factory,
            optional_address(attrs.router_address.as_deref()),
            SOURCE,
        );
        venue.quoter = optional_address(attrs.quoter_address.as_deref());
        venues.push(venue);
    }
    venues
}

pub struct ScannerSource {
    /// Either a template containing `{network}` or a base URL
    url: String,
    state: HttpSourceState,
}

impl ScannerSource {
    pub fn new(url: impl Into<String>, ttl: Duration, lock_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            state: HttpSourceState::new(ttl, lock_timeout, retry),
        }
    }

    fn network_url(&self, network: &str) -> String {
        if self.url.contains("{network}") {
            self.url.replace("{network}", network)
        } else {
            format!("{}/networks/{}/dexes", self.url.trim_end_matches('/'), network)
        }
    }
}

#[async_trait]
impl DiscoverySource for ScannerSource {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn initialize(&self) -> Result<(), DiscoveryError> {
        self.state.initialize().await
    }

    /// Networks are queried one after another to stay under rate limits.
    /// A network that fails is skipped; the fetch only errors if all did.
    async fn fetch(&self, chain_filter: Option<u64>) -> Result<Vec<Venue>, DiscoveryError> {
        if let Some(venues) = self.state.cached(chain_filter).await {
            debug!("Scanner cache hit ({} venues)", venues.len());
            return Ok(venues);
        }

        let networks: Vec<(u64, &str)> = match chain_filter {
            Some(chain_id) => match scanner_network(chain_id) {
                Some(slug) => vec![(chain_id, slug)],
                None => return Ok(Vec::new()),
            },
            None => scanner_networks().collect(),
        };

        let client = self.state.client().await?;
        let mut venues = Vec::new();
        let mut last_error = None;
        let mut answered = 0;

        for (chain_id, network) in &networks {
            match get_json::<DexList>(&client, &self.network_url(network), &self.state.retry).await {
                Ok(Some(list)) => {
                    answered += 1;
                    venues.extend(parse_dexes(list, *chain_id));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Scanner request for {} failed: {}", network, e);
                    last_error = Some(e);
                }
            }
        }

        if answered == 0 {
            return match last_error {
                Some(e) => Err(e),
                None => Ok(venues),
            };
        }

        info!("🔭 Scanner listed {} venues across {} networks", venues.len(), answered);
        self.state.remember(chain_filter, &venues).await;
        Ok(venues)
    }

    async fn close(&self) {
        self.state.close().await;
    }
}
