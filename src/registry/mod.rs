//! Venue Registry
//!
//! Holds every known venue keyed by name, with update-if-newer semantics and
//! write-through JSON persistence. Mutations are serialized by a writer mutex;
//! readers only take the map's read lock. All lock waits are bounded so a
//! stuck writer turns into a soft failure for one operation, not a stall.

mod venue;

pub use venue::{DexProtocolType, Venue};

use alloy_primitives::Address;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry lock not acquired within {0:?} ({1})")]
    LockTimeout(Duration, &'static str),

    #[error("venue {venue} is missing its {contract} address")]
    MissingContract { venue: String, contract: &'static str },

    #[error("registry storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub struct VenueRegistry {
    path: Option<PathBuf>,
    venues: RwLock<HashMap<String, Venue>>,
    writer: Mutex<()>,
    lock_timeout: Duration,
}

impl VenueRegistry {
    /// Registry without persistence
    pub fn in_memory(lock_timeout: Duration) -> Self {
        Self {
            path: None,
            venues: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            lock_timeout,
        }
    }

    /// Open a persisted registry, loading every stored venue.
    /// A missing file is an empty registry.
    pub async fn open<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();

        let venues = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<Venue> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|v| (v.name.clone(), v)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!("📚 Venue registry loaded {} venues from {}", venues.len(), path.display());

        Ok(Self {
            path: Some(path),
            venues: RwLock::new(venues),
            writer: Mutex::new(()),
            lock_timeout,
        })
    }

    /// Insert an unseen venue, or replace the stored one when the incoming
    /// record is strictly newer. Returns whether anything changed.
    pub async fn upsert(&self, venue: Venue) -> Result<bool, RegistryError> {
        if venue.factory == Address::ZERO {
            return Err(RegistryError::MissingContract {
                venue: venue.name,
                contract: "factory",
            });
        }
        if venue.router.is_none() {
            return Err(RegistryError::MissingContract {
                venue: venue.name,
                contract: "router",
            });
        }

        let _writer = self.lock_writer("upsert").await?;

        // The writer mutex is held, so the map cannot move between the check
        // and the commit below. Memory only changes once the file is written.
        let snapshot = {
            let venues = self.read_map().await?;
            if let Some(existing) = venues.get(&venue.name) {
                if venue.last_updated <= existing.last_updated {
                    debug!("Registry: {} unchanged (stored record is as new)", venue.name);
                    return Ok(false);
                }
            }
            let mut list: Vec<Venue> = venues.values().filter(|v| v.name != venue.name).cloned().collect();
            list.push(venue.clone());
            list.sort_by(|a, b| a.name.cmp(&b.name));
            list
        };

        self.persist(&snapshot).await?;

        debug!("Registry: upsert {} (validated: {})", venue.name, venue.validated);
        self.write_map("upsert").await?.insert(venue.name.clone(), venue);
        Ok(true)
    }

    pub async fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        let _writer = self.lock_writer("remove").await?;

        let snapshot = {
            let venues = self.read_map().await?;
            if !venues.contains_key(name) {
                return Ok(false);
            }
            let mut list: Vec<Venue> = venues.values().filter(|v| v.name != name).cloned().collect();
            list.sort_by(|a, b| a.name.cmp(&b.name));
            list
        };

        self.persist(&snapshot).await?;

        self.write_map("remove").await?.remove(name);
        Ok(true)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Venue>, RegistryError> {
        Ok(self.read_map().await?.get(name).cloned())
    }

    /// Look up by factory; the address is already canonical by construction
    pub async fn get_by_factory_address(&self, factory: &Address) -> Result<Option<Venue>, RegistryError> {
        Ok(self
            .read_map()
            .await?
            .values()
            .find(|v| v.factory == *factory)
            .cloned())
    }

    pub async fn list_by_chain(&self, chain_id: u64) -> Result<Vec<Venue>, RegistryError> {
        self.filtered(|v| v.chain_id == chain_id).await
    }

    pub async fn list_by_protocol(&self, protocol: DexProtocolType) -> Result<Vec<Venue>, RegistryError> {
        self.filtered(|v| v.protocol == protocol).await
    }

    /// Validated venues on a chain, the only ones the detector may scan
    pub async fn usable(&self, chain_id: u64) -> Result<Vec<Venue>, RegistryError> {
        self.filtered(|v| v.validated && v.chain_id == chain_id).await
    }

    pub async fn all(&self) -> Result<Vec<Venue>, RegistryError> {
        self.filtered(|_| true).await
    }

    pub async fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.read_map().await?.len())
    }

    /// Write the current state out (shutdown path)
    pub async fn flush(&self) -> Result<(), RegistryError> {
        let _writer = self.lock_writer("flush").await?;
        let snapshot = Self::sorted(&*self.read_map().await?);
        self.persist(&snapshot).await
    }

    async fn filtered<F>(&self, keep: F) -> Result<Vec<Venue>, RegistryError>
    where
        F: Fn(&Venue) -> bool,
    {
        let venues = self.read_map().await?;
        let mut list: Vec<Venue> = venues.values().filter(|v| keep(v)).cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    fn sorted(venues: &HashMap<String, Venue>) -> Vec<Venue> {
        let mut list: Vec<Venue> = venues.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    async fn lock_writer(&self, op: &'static str) -> Result<tokio::sync::MutexGuard<'_, ()>, RegistryError> {
        tokio::time::timeout(self.lock_timeout, self.writer.lock())
            .await
            .map_err(|_| RegistryError::LockTimeout(self.lock_timeout, op))
    }

    async fn write_map(
        &self,
        op: &'static str,
    ) -> Result<tokio::sync::RwLockWriteGuard<'_, HashMap<String, Venue>>, RegistryError> {
        tokio::time::timeout(self.lock_timeout, self.venues.write())
            .await
            .map_err(|_| RegistryError::LockTimeout(self.lock_timeout, op))
    }

    async fn read_map(&self) -> Result<tokio::sync::RwLockReadGuard<'_, HashMap<String, Venue>>, RegistryError> {
        tokio::time::timeout(self.lock_timeout, self.venues.read())
            .await
            .map_err(|_| RegistryError::LockTimeout(self.lock_timeout, "read"))
    }

    /// Atomic replace: write a sibling temp file, then rename over the target
    async fn persist(&self, venues: &[Venue]) -> Result<(), RegistryError> {
        let Some(path) = &self.path else { return Ok(()) };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(venues)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!("Registry persisted {} venues to {}", venues.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use futures::future::join_all;
    use std::sync::Arc;

    fn venue(name: &str, factory_byte: u8) -> Venue {
        Venue::candidate(
            name,
            1,
            DexProtocolType::AmmV2,
            Address::repeat_byte(factory_byte),
            Some(Address::repeat_byte(0xee)),
            "test",
        )
    }

    fn registry() -> VenueRegistry {
        VenueRegistry::in_memory(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_upsert_inserts_unseen() {
        let reg = registry();
        assert!(reg.upsert(venue("uni", 1)).await.unwrap());
        assert_eq!(reg.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_older_is_noop() {
        let reg = registry();
        let now = Utc::now();
        let stored = venue("uni", 1).with_last_updated(now);
        reg.upsert(stored.clone()).await.unwrap();

        let mut older = venue("uni", 2).with_last_updated(now - ChronoDuration::seconds(10));
        older.tvl_usd = Some(1.0);
        assert!(!reg.upsert(older).await.unwrap());

        // Same timestamp is not newer either
        assert!(!reg.upsert(venue("uni", 3).with_last_updated(now)).await.unwrap());

        assert_eq!(reg.get("uni").await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_upsert_newer_replaces() {
        let reg = registry();
        let now = Utc::now();
        reg.upsert(venue("uni", 1).with_last_updated(now)).await.unwrap();

        let newer = venue("uni", 2).with_last_updated(now + ChronoDuration::seconds(10));
        assert!(reg.upsert(newer.clone()).await.unwrap());
        assert_eq!(reg.get("uni").await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_missing_contracts_are_rejected() {
        let reg = registry();

        let mut no_router = venue("a", 1);
        no_router.router = None;
        assert!(matches!(
            reg.upsert(no_router).await,
            Err(RegistryError::MissingContract { contract: "router", .. })
        ));

        let no_factory = venue("b", 0);
        assert!(matches!(
            reg.upsert(no_factory).await,
            Err(RegistryError::MissingContract { contract: "factory", .. })
        ));
        assert_eq!(reg.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookups_and_remove() {
        let reg = registry();
        reg.upsert(venue("uni", 1).validated()).await.unwrap();
        let mut v3 = venue("pancake", 2);
        v3.protocol = DexProtocolType::AmmV3;
        v3.chain_id = 8453;
        reg.upsert(v3).await.unwrap();

        let found = reg.get_by_factory_address(&Address::repeat_byte(2)).await.unwrap();
        assert_eq!(found.map(|v| v.name), Some("pancake".to_string()));

        assert_eq!(reg.list_by_chain(1).await.unwrap().len(), 1);
        assert_eq!(reg.list_by_protocol(DexProtocolType::AmmV3).await.unwrap().len(), 1);
        assert_eq!(reg.usable(1).await.unwrap().len(), 1);
        assert!(reg.usable(8453).await.unwrap().is_empty());

        assert!(reg.remove("uni").await.unwrap());
        assert!(!reg.remove("uni").await.unwrap());
        assert!(reg.get("uni").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_through_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("venues.json");

        {
            let reg = VenueRegistry::open(&path, Duration::from_secs(1)).await.unwrap();
            reg.upsert(venue("uni", 1).validated()).await.unwrap();
            reg.upsert(venue("sushi", 2)).await.unwrap();
            reg.remove("sushi").await.unwrap();
        }

        let reopened = VenueRegistry::open(&path, Duration::from_secs(1)).await.unwrap();
        let all = reopened.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "uni");
        assert!(all[0].validated);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("d");
        let reg = VenueRegistry::open(store_dir.join("venues.json"), Duration::from_secs(1))
            .await
            .unwrap();
        reg.upsert(venue("uni", 1).validated()).await.unwrap();

        // Storage directory turns into a plain file
        std::fs::remove_dir_all(&store_dir).unwrap();
        std::fs::write(&store_dir, b"not a directory").unwrap();

        let added = reg.upsert(venue("sushi", 2).validated()).await;
        assert!(matches!(added, Err(RegistryError::Io(_))));
        assert!(reg.get("sushi").await.unwrap().is_none());
        assert_eq!(reg.usable(1).await.unwrap().len(), 1);

        let newer = venue("uni", 3).with_last_updated(Utc::now() + ChronoDuration::seconds(60));
        assert!(reg.upsert(newer).await.is_err());
        assert_eq!(
            reg.get("uni").await.unwrap().map(|v| v.factory),
            Some(Address::repeat_byte(1))
        );

        assert!(reg.remove("uni").await.is_err());
        assert!(reg.get("uni").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("venues.json");
        let reg = Arc::new(VenueRegistry::open(&path, Duration::from_secs(5)).await.unwrap());

        let tasks = (0..20u8).map(|i| {
            let reg = reg.clone();
            async move { reg.upsert(venue(&format!("venue-{}", i), i + 1)).await }
        });
        for result in join_all(tasks).await {
            assert!(result.unwrap());
        }

        let reopened = VenueRegistry::open(&path, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 20);
    }
}
