pub mod disk;
pub mod locks;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

pub use disk::DiskStore;
pub use locks::KeyLocks;
pub use memory::MemoryStore;

/// Durable byte-oriented key-value store shared by the cache, the quota
/// tracker and user records.
///
/// Implementations must be safe to call from many request handlers at once.
/// Read-modify-write sequences are serialised by callers through [`KeyLocks`].
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
