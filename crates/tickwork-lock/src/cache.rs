use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;

use crate::{error::Result, memory::expiry, store::LockStore};

/// Shared key/value cache with per-key TTL.
///
/// `add` must be atomic add-if-absent in the backing service; that single
/// property is what makes [`CacheLockStore`] safe across processes.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn add(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// Store `value` unconditionally.
    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Delete `key`. Missing keys are not an error.
    async fn forget(&self, key: &str) -> Result<()>;

    async fn has(&self, key: &str) -> Result<bool>;
}

/// Lock store delegating to a [`SharedCache`].
///
/// The stored value is the owner token of the node that took the lock, so an
/// operator inspecting the cache can tell who holds a window.
pub struct CacheLockStore {
    cache: Arc<dyn SharedCache>,
    owner: String,
}

impl CacheLockStore {
    pub fn new(cache: Arc<dyn SharedCache>, owner: impl Into<String>) -> Self {
        Self {
            cache,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[async_trait]
impl LockStore for CacheLockStore {
    async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.cache.add(key, &self.owner, ttl_secs).await
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.cache.forget(key).await
    }

    async fn force_acquire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.cache.put(key, &self.owner, ttl_secs).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.cache.has(key).await
    }

    fn driver(&self) -> &'static str {
        "cache"
    }
}

// ---------------------------------------------------------------------------
// InMemoryCache
// ---------------------------------------------------------------------------

/// Process-local [`SharedCache`].
///
/// Only "shared" between clones of the same `Arc`. Useful for single-host
/// deployments that still want the cache driver, and for tests.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a live key.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.value().1 > now)
            .map(|e| e.value().0.clone())
    }
}

fn deadline(ttl_secs: u64) -> Instant {
    expiry(Instant::now(), ttl_secs)
}

#[async_trait]
impl SharedCache for InMemoryCache {
    async fn add(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let now = Instant::now();
        let added = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().1 > now {
                    false
                } else {
                    held.insert((value.to_string(), deadline(ttl_secs)));
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert((value.to_string(), deadline(ttl_secs)));
                true
            }
        };
        Ok(added)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), deadline(ttl_secs)));
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let Some(expires) = self.entries.get(key).map(|e| e.value().1) else {
            return Ok(false);
        };
        if expires > now {
            return Ok(true);
        }
        self.entries.remove_if(key, |_, (_, exp)| *exp <= now);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn two_nodes() -> (Arc<InMemoryCache>, CacheLockStore, CacheLockStore) {
        let cache = Arc::new(InMemoryCache::new());
        let a = CacheLockStore::new(cache.clone(), "node-a");
        let b = CacheLockStore::new(cache.clone(), "node-b");
        (cache, a, b)
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_node_wins_a_window() {
        let (cache, a, b) = two_nodes();
        assert!(a.acquire("task:report:202406010300", 60).await.unwrap());
        assert!(!b.acquire("task:report:202406010300", 60).await.unwrap());
        assert_eq!(cache.get("task:report:202406010300").as_deref(), Some("node-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_lets_another_node_in() {
        let (_cache, a, b) = two_nodes();
        assert!(a.acquire("k", 1).await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!a.exists("k").await.unwrap());
        assert!(b.acquire("k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn release_then_acquire() {
        let (_cache, a, b) = two_nodes();
        assert!(a.acquire("k", 300).await.unwrap());
        a.release("k").await.unwrap();
        assert!(b.acquire("k", 300).await.unwrap());
        // Releasing twice is harmless.
        b.release("k").await.unwrap();
        b.release("k").await.unwrap();
    }

    #[tokio::test]
    async fn force_acquire_takes_over() {
        let (cache, a, b) = two_nodes();
        assert!(a.acquire("k", 300).await.unwrap());
        b.force_acquire("k", 300).await.unwrap();
        assert_eq!(cache.get("k").as_deref(), Some("node-b"));
        assert!(a.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow() {
        let (cache, a, b) = two_nodes();
        assert!(a.acquire("k", u64::MAX).await.unwrap());
        assert!(!b.acquire("k", u64::MAX).await.unwrap());
        b.force_acquire("k", u64::MAX).await.unwrap();
        assert_eq!(cache.get("k").as_deref(), Some("node-b"));
    }

    #[tokio::test]
    async fn concurrent_acquires_have_one_winner() {
        let cache = Arc::new(InMemoryCache::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = CacheLockStore::new(cache.clone(), format!("node-{i}"));
            handles.push(tokio::spawn(async move {
                store.acquire("contended", 60).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
