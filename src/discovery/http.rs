//! JSON over HTTP for the catalog-backed sources

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::DiscoveryError;
use crate::cache::TtlCache;
use crate::registry::Venue;
use crate::retry::RetryPolicy;

const REQUEST_TIMEOUT_SECS: u64 = 15;

pub(crate) fn build_client() -> Result<Client, DiscoveryError> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("spotter/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(DiscoveryError::Http)
}

/// Transport failures and 5xx/429 are worth another attempt
fn should_retry(e: &DiscoveryError) -> bool {
    match e {
        DiscoveryError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
        DiscoveryError::Status(code) => *code == StatusCode::TOO_MANY_REQUESTS.as_u16() || *code >= 500,
        _ => false,
    }
}

async fn get_once<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, DiscoveryError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(DiscoveryError::Status(status.as_u16()));
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| DiscoveryError::Malformed(e.to_string()))
}

/// GET and decode. Non-200 and malformed bodies come back as `Ok(None)`;
/// only transport failures that outlast the retries are errors.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    retry: &RetryPolicy,
) -> Result<Option<T>, DiscoveryError> {
    match retry.run(url, should_retry, || get_once::<T>(client, url)).await {
        Ok(value) => Ok(Some(value)),
        Err(DiscoveryError::Status(code)) => {
            warn!("{} answered HTTP {}; treating as empty", url, code);
            Ok(None)
        }
        Err(DiscoveryError::Malformed(reason)) => {
            warn!("{} returned malformed JSON ({}); treating as empty", url, reason);
            Ok(None)
        }
        Err(e) => {
            debug!("{} failed: {}", url, e);
            Err(e)
        }
    }
}

/// Client plus result cache shared by the HTTP-backed sources
pub(crate) struct HttpSourceState {
    client: RwLock<Option<Client>>,
    cache: TtlCache<Option<u64>, Vec<Venue>>,
    pub(crate) retry: RetryPolicy,
}

impl HttpSourceState {
    pub(crate) fn new(ttl: Duration, lock_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client: RwLock::new(None),
            cache: TtlCache::new(ttl, lock_timeout),
            retry,
        }
    }

    pub(crate) async fn initialize(&self) -> Result<(), DiscoveryError> {
        let mut client = self.client.write().await;
        if client.is_none() {
            *client = Some(build_client()?);
        }
        Ok(())
    }

    /// The client, created on first use if `initialize` was skipped
    pub(crate) async fn client(&self) -> Result<Client, DiscoveryError> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }
        self.initialize().await?;
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| DiscoveryError::Malformed("client unavailable".to_string()))
    }

    pub(crate) async fn close(&self) {
        self.client.write().await.take();
        self.cache.clear().await;
    }

    pub(crate) async fn cached(&self, chain_filter: Option<u64>) -> Option<Vec<Venue>> {
        self.cache.get(&chain_filter).await
    }

    pub(crate) async fn remember(&self, chain_filter: Option<u64>, venues: &[Venue]) {
        self.cache.insert(chain_filter, venues.to_vec()).await;
    }
}
