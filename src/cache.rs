//! Price/Pair Cache
//!
//! Short-lived memo of per-venue pair lists and directional quotes so one
//! polling interval does not repeat the same chain reads. The lock is only
//! held around map access; callers fetch from the network outside of it and
//! write the result back afterwards.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::config::Config;
use crate::venues::TokenPair;

/// "1 `token_in` priced in `token_out`" on one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub venue: String,
    pub token_in: Address,
    pub token_out: Address,
    pub price: f64,
    pub captured_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(venue: impl Into<String>, token_in: Address, token_out: Address, price: f64) -> Self {
        Self {
            venue: venue.into(),
            token_in,
            token_out,
            price,
            captured_at: Utc::now(),
        }
    }
}

// ============================================
// GENERIC TTL MAP
// ============================================

pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (V, Instant)>>,
    ttl: Duration,
    lock_timeout: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + std::fmt::Debug,
    V: Clone,
{
    pub fn new(ttl: Duration, lock_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            lock_timeout,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value, if any. Expired entries and lock timeouts are misses.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = match tokio::time::timeout(self.lock_timeout, self.entries.read()).await {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Cache read lock timed out for {:?}; treating as miss", key);
                return None;
            }
        };

        match entries.get(key) {
            Some((value, captured)) if captured.elapsed() < self.ttl => {
                trace!("Cache hit {:?}", key);
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Unconditional overwrite with `(value, now)`. Returns false when the
    /// write was dropped because the lock could not be taken in time.
    pub async fn insert(&self, key: K, value: V) -> bool {
        match tokio::time::timeout(self.lock_timeout, self.entries.write()).await {
            Ok(mut entries) => {
                entries.insert(key, (value, Instant::now()));
                true
            }
            Err(_) => {
                debug!("Cache write lock timed out for {:?}; write dropped", key);
                false
            }
        }
    }

    /// Evict stale entries, returning how many went
    pub async fn purge_expired(&self) -> usize {
        let Ok(mut entries) = tokio::time::timeout(self.lock_timeout, self.entries.write()).await else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, (_, captured)| captured.elapsed() < ttl);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ============================================
// PRICE / PAIR CACHE
// ============================================

type PairsKey = (String, u64);
type QuoteKey = (String, Address, Address);

pub struct PriceCache {
    pairs: TtlCache<PairsKey, Vec<TokenPair>>,
    quotes: TtlCache<QuoteKey, PriceQuote>,
}

impl PriceCache {
    pub fn new(price_ttl: Duration, pair_ttl: Duration, lock_timeout: Duration) -> Self {
        Self {
            pairs: TtlCache::new(pair_ttl, lock_timeout),
            quotes: TtlCache::new(price_ttl, lock_timeout),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_millis(config.price_ttl_ms),
            Duration::from_secs(config.pair_ttl_secs),
            Duration::from_millis(config.lock_timeout_ms),
        )
    }

    pub async fn pairs(&self, venue: &str, filter_hash: u64) -> Option<Vec<TokenPair>> {
        self.pairs.get(&(venue.to_string(), filter_hash)).await
    }

    pub async fn store_pairs(&self, venue: &str, filter_hash: u64, pairs: Vec<TokenPair>) -> bool {
        self.pairs.insert((venue.to_string(), filter_hash), pairs).await
    }

    pub async fn quote(&self, venue: &str, token_in: Address, token_out: Address) -> Option<PriceQuote> {
        self.quotes.get(&(venue.to_string(), token_in, token_out)).await
    }

    pub async fn store_quote(&self, quote: PriceQuote) -> bool {
        let key = (quote.venue.clone(), quote.token_in, quote.token_out);
        self.quotes.insert(key, quote).await
    }

    pub async fn purge_expired(&self) -> usize {
        let purged = self.pairs.purge_expired().await + self.quotes.purge_expired().await;
        if purged > 0 {
            debug!("🧹 Purged {} expired cache entries", purged);
        }
        purged
    }
}
