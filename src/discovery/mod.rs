//! Venue discovery
//!
//! Sources turn external catalogs (or the built-in address book) into
//! candidate venues. The manager fans out to every source at once, so one
//! slow or broken catalog costs nothing but its own venues.

mod catalog;
mod http;
mod known;
pub mod normalize;
mod scanner;

pub use catalog::CatalogSource;
pub use known::KnownVenueSource;
pub use scanner::ScannerSource;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::registry::{Venue, VenueRegistry};
use crate::retry::RetryPolicy;
use crate::validator::VenueValidator;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("source {0} is closed")]
    Closed(String),
}

#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire network resources. Safe to call more than once.
    async fn initialize(&self) -> Result<(), DiscoveryError>;

    /// Candidate venues, optionally for one chain only
    async fn fetch(&self, chain_filter: Option<u64>) -> Result<Vec<Venue>, DiscoveryError>;

    /// Release network resources and forget cached results
    async fn close(&self);
}

/// What one `discover_and_register` pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub discovered: usize,
    pub validated: usize,
    pub registered: usize,
    pub rejected: usize,
}

pub struct DiscoveryManager {
    sources: Vec<Arc<dyn DiscoverySource>>,
}

impl DiscoveryManager {
    pub fn new(sources: Vec<Arc<dyn DiscoverySource>>) -> Self {
        Self { sources }
    }

    /// Built-in address book first, then whichever catalogs are configured
    pub fn from_config(config: &Config) -> Self {
        let ttl = Duration::from_secs(config.discovery_cache_ttl_secs);
        let lock_timeout = Duration::from_millis(config.lock_timeout_ms);
        let retry: RetryPolicy = config.retry;

        let mut sources: Vec<Arc<dyn DiscoverySource>> = vec![Arc::new(KnownVenueSource::new())];
        if let Some(url) = config.catalog_url.as_deref().filter(|u| !u.is_empty()) {
            sources.push(Arc::new(CatalogSource::new(url, ttl, lock_timeout, retry)));
        }
        if let Some(url) = config.scanner_url.as_deref().filter(|u| !u.is_empty()) {
            sources.push(Arc::new(ScannerSource::new(url, ttl, lock_timeout, retry)));
        }
        Self::new(sources)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn initialize_all(&self) {
        let results = join_all(self.sources.iter().map(|s| s.initialize())).await;
        for (source, result) in self.sources.iter().zip(results) {
            if let Err(e) = result {
                warn!("Discovery source {} failed to initialize: {}", source.name(), e);
            }
        }
    }

    pub async fn close_all(&self) {
        join_all(self.sources.iter().map(|s| s.close())).await;
    }

    /// Candidates from every source, concurrently.
    ///
    /// A failing source contributes nothing. Duplicates are dropped keeping
    /// the earlier source's record, matched by name or by (chain, factory).
    pub async fn discover(&self, chain_filter: Option<u64>) -> Vec<Venue> {
        let results = join_all(self.sources.iter().map(|s| s.fetch(chain_filter))).await;

        let mut names = HashSet::new();
        let mut factories = HashSet::new();
        let mut venues = Vec::new();

        for (source, result) in self.sources.iter().zip(results) {
            let found = match result {
                Ok(found) => found,
                Err(e) => {
                    warn!("Discovery source {} failed, contributing 0 venues: {}", source.name(), e);
                    continue;
                }
            };
            debug!("{} returned {} candidates", source.name(), found.len());

            for venue in found {
                if !names.insert(venue.name.clone()) || !factories.insert((venue.chain_id, venue.factory)) {
                    debug!("Skipping duplicate venue {} from {}", venue.name, source.name());
                    continue;
                }
                venues.push(venue);
            }
        }

        info!("🛰️  Discovered {} candidate venues from {} sources", venues.len(), self.sources.len());
        venues
    }

    /// Discover, validate and upsert. Invalid venues are stored too, with
    /// their errors, so the operator can see why they are not scanned.
    pub async fn discover_and_register(
        &self,
        chain_filter: Option<u64>,
        validator: &VenueValidator,
        registry: &VenueRegistry,
    ) -> DiscoverySummary {
        let candidates = self.discover(chain_filter).await;
        let mut summary = DiscoverySummary {
            discovered: candidates.len(),
            ..Default::default()
        };

        for venue in validator.validate_all(candidates).await {
            if venue.validated {
                summary.validated += 1;
            }
            let name = venue.name.clone();
            match registry.upsert(venue).await {
                Ok(true) => summary.registered += 1,
                Ok(false) => debug!("{} unchanged (stored record is as new)", name),
                Err(e) => {
                    warn!("Rejected venue {}: {}", name, e);
                    summary.rejected += 1;
                }
            }
        }

        info!(
            "📚 Registry: {} registered, {} validated, {} rejected",
            summary.registered, summary.validated, summary.rejected
        );
        summary
    }
}
