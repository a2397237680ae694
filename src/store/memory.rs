use super::PersistentStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Process-local store backed by an ordered map.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        debug!("Store PUT for key: {}", key);
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        debug!("Store REMOVE for key: {}", key);
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let map = self.inner.read().await;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_get_put_remove() {
        let store = MemoryStore::new();

        assert!(store.get("key1").await.unwrap().is_none());

        store.put("key1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("key1").await.unwrap(), Some(vec![1, 2, 3]));

        store.remove("key1").await.unwrap();
        assert!(store.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_prefix_scan() {
        let store = MemoryStore::new();
        store.put("records:u1:transactions:a", vec![1]).await.unwrap();
        store.put("records:u1:transactions:b", vec![2]).await.unwrap();
        store.put("records:u10:transactions:c", vec![3]).await.unwrap();
        store.put("records:u2:transactions:d", vec![4]).await.unwrap();

        let entries = store.scan_prefix("records:u1:").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|(k, _)| k.starts_with("records:u1:")));
    }
}
