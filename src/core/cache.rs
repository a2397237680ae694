use super::decision::FetchRecord;
use crate::store::{KeyLocks, PersistentStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// A cached payload together with when it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub fetch_record: FetchRecord,
}

/// Entry metadata without the payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EntrySummary {
    pub key: String,
    pub fetch_record: FetchRecord,
}

/// Typed view over the persistent store for cached upstream data.
///
/// Unreadable entries are logged and reported as misses. Only storage I/O
/// failures surface as errors.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn PersistentStore>,
    locks: Arc<KeyLocks>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn PersistentStore>, locks: Arc<KeyLocks>) -> Self {
        Self { store, locks }
    }

    /// Serialises decide, fetch and put for one key.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let bytes = self
            .store
            .get(key)
            .await
            .with_context(|| format!("Failed to read cache key: {key}"))?;
        let Some(bytes) = bytes else {
            debug!("Cache MISS for key: {}", key);
            return Ok(None);
        };
        let entry = decode(key, &bytes);
        if entry.is_some() {
            debug!("Cache HIT for key: {}", key);
        }
        Ok(entry)
    }

    pub async fn put<T: Serialize>(&self, entry: &CacheEntry<T>) -> Result<()> {
        let bytes = serde_json::to_vec(entry)
            .with_context(|| format!("Failed to encode cache entry: {}", entry.key))?;
        self.store
            .put(&entry.key, bytes)
            .await
            .with_context(|| format!("Failed to write cache key: {}", entry.key))?;
        debug!("Cache PUT for key: {}", entry.key);
        Ok(())
    }

    /// Most recent readable entry under `prefix` whose key sorts before
    /// `before`. Keys are expected to end in an ISO date.
    pub async fn latest_before<T: DeserializeOwned>(
        &self,
        prefix: &str,
        before: &str,
    ) -> Result<Option<CacheEntry<T>>> {
        let entries = self
            .store
            .scan_prefix(prefix)
            .await
            .with_context(|| format!("Failed to scan cache prefix: {prefix}"))?;
        Ok(entries
            .iter()
            .rev()
            .filter(|(key, _)| key.as_str() < before)
            .find_map(|(key, bytes)| decode(key, bytes)))
    }

    pub async fn summaries(&self, prefix: &str) -> Result<Vec<EntrySummary>> {
        let entries = self
            .store
            .scan_prefix(prefix)
            .await
            .with_context(|| format!("Failed to scan cache prefix: {prefix}"))?;
        Ok(entries
            .iter()
            .filter_map(|(key, bytes)| decode::<EntrySummary>(key, bytes))
            .collect())
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Corrupt cache entry for key {}: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ClockWindow;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn entry(key: &str, day: u32, payload: i32) -> CacheEntry<i32> {
        let at = NaiveDate::from_ymd_opt(2025, 11, day)
            .unwrap()
            .and_hms_opt(10, 1, 0)
            .unwrap();
        CacheEntry {
            key: key.to_string(),
            payload,
            fetch_record: FetchRecord::at(at, &ClockWindow::default()),
        }
    }

    fn cache() -> (CacheStore, Arc<dyn PersistentStore>) {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        (
            CacheStore::new(Arc::clone(&store), Arc::new(KeyLocks::new())),
            store,
        )
    }

    #[tokio::test]
    async fn test_cache_get_put() {
        let (cache, _) = cache();

        assert!(cache.get::<i32>("stocks:2025-11-05").await.unwrap().is_none());

        let e = entry("stocks:2025-11-05", 5, 123);
        cache.put(&e).await.unwrap();
        assert_eq!(cache.get::<i32>("stocks:2025-11-05").await.unwrap(), Some(e));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (cache, store) = cache();
        store
            .put("stocks:2025-11-05", b"{\"key\": 1".to_vec())
            .await
            .unwrap();

        let result = cache.get::<i32>("stocks:2025-11-05").await;
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_before_skips_future_and_corrupt() {
        let (cache, store) = cache();
        cache.put(&entry("stocks:2025-11-03", 3, 1)).await.unwrap();
        store.put("stocks:2025-11-04", b"garbage".to_vec()).await.unwrap();
        cache.put(&entry("stocks:2025-11-05", 5, 3)).await.unwrap();
        cache.put(&entry("currencies:2025-11-04", 4, 9)).await.unwrap();

        let found = cache
            .latest_before::<i32>("stocks:", "stocks:2025-11-05")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.key, "stocks:2025-11-03");
        assert_eq!(found.payload, 1);

        let none = cache
            .latest_before::<i32>("stocks:", "stocks:2025-11-03")
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_summaries_skip_payload() {
        let (cache, _) = cache();
        cache.put(&entry("stocks:2025-11-03", 3, 1)).await.unwrap();
        cache.put(&entry("stocks:2025-11-04", 4, 2)).await.unwrap();

        let summaries = cache.summaries("stocks:").await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].fetch_record.fetched_at, "2025-11-04 10:01:00");
    }
}
