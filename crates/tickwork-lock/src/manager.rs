use std::fmt;
use std::sync::Arc;

use tickwork_core::config::LockDriver;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    cache::{CacheLockStore, SharedCache},
    error::{LockError, Result},
    memory::MemoryLockStore,
    store::LockStore,
};

/// Thin facade over exactly one [`LockStore`].
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl LockManager {
    /// Wrap a pre-built store.
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Process-local locking.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryLockStore::new()))
    }

    /// Fleet-wide locking through `cache`, with a random owner token.
    pub fn cache(cache: Arc<dyn SharedCache>) -> Self {
        Self::cache_with_owner(cache, Uuid::new_v4().to_string())
    }

    /// Fleet-wide locking through `cache`, writing `owner` as the lock value.
    pub fn cache_with_owner(cache: Arc<dyn SharedCache>, owner: impl Into<String>) -> Self {
        Self::new(Arc::new(CacheLockStore::new(cache, owner)))
    }

    /// Build from a configured driver.
    ///
    /// # Errors
    ///
    /// - `MissingCache` — `driver` is `cache` and `cache` is `None`.
    pub fn from_driver(driver: LockDriver, cache: Option<Arc<dyn SharedCache>>) -> Result<Self> {
        let manager = match driver {
            LockDriver::Memory => Self::memory(),
            LockDriver::Cache => Self::cache(cache.ok_or(LockError::MissingCache)?),
        };
        info!(driver = manager.driver(), "lock manager ready");
        Ok(manager)
    }

    /// Build from a driver name (`"memory"` or `"cache"`).
    pub fn from_driver_name(name: &str, cache: Option<Arc<dyn SharedCache>>) -> Result<Self> {
        let driver = name
            .parse::<LockDriver>()
            .map_err(|_| LockError::UnknownDriver(name.to_string()))?;
        Self::from_driver(driver, cache)
    }

    pub fn driver(&self) -> &'static str {
        self.store.driver()
    }

    pub async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let won = self.store.acquire(key, ttl_secs).await?;
        debug!(key, ttl_secs, won, "lock acquire");
        Ok(won)
    }

    pub async fn release(&self, key: &str) -> Result<()> {
        debug!(key, "lock release");
        self.store.release(key).await
    }

    pub async fn force_acquire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        info!(key, ttl_secs, "lock force-acquired");
        self.store.force_acquire(key, ttl_secs).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("driver", &self.driver())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[test]
    fn cache_driver_without_collaborator_is_a_config_error() {
        let err = LockManager::from_driver(LockDriver::Cache, None).unwrap_err();
        assert!(matches!(err, LockError::MissingCache));
    }

    #[test]
    fn unknown_driver_name_is_rejected() {
        let err = LockManager::from_driver_name("zookeeper", None).unwrap_err();
        assert!(matches!(err, LockError::UnknownDriver(ref d) if d == "zookeeper"));
    }

    #[test]
    fn driver_names() {
        assert_eq!(LockManager::from_driver_name("memory", None).unwrap().driver(), "memory");
        let cache: Arc<dyn SharedCache> = Arc::new(InMemoryCache::new());
        assert_eq!(
            LockManager::from_driver_name("cache", Some(cache)).unwrap().driver(),
            "cache"
        );
    }

    #[tokio::test]
    async fn forwards_all_operations() {
        let manager = LockManager::memory();
        assert!(manager.acquire("k", 60).await.unwrap());
        assert!(manager.exists("k").await.unwrap());
        assert!(!manager.acquire("k", 60).await.unwrap());
        manager.release("k").await.unwrap();
        assert!(!manager.exists("k").await.unwrap());
        manager.force_acquire("k", 60).await.unwrap();
        assert!(manager.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn clones_share_the_store() {
        let a = LockManager::memory();
        let b = a.clone();
        assert!(a.acquire("k", 60).await.unwrap());
        assert!(!b.acquire("k", 60).await.unwrap());
    }

    #[tokio::test]
    async fn two_managers_on_one_cache_exclude_each_other() {
        let cache: Arc<dyn SharedCache> = Arc::new(InMemoryCache::new());
        let a = LockManager::cache_with_owner(cache.clone(), "a");
        let b = LockManager::cache_with_owner(cache, "b");
        assert!(a.acquire("task:x:202401010000", 60).await.unwrap());
        assert!(!b.acquire("task:x:202401010000", 60).await.unwrap());
    }
}
