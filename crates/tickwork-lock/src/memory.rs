use std::time::Duration;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;

use crate::{error::Result, store::LockStore};

/// In-process lock store: key → expiry instant.
///
/// Exclusion holds only inside this process; several nodes each running a
/// `MemoryLockStore` will all win the same key. Expired entries are treated
/// as absent and evicted lazily when touched.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: DashMap<String, Instant>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires| *expires > now);
        before - self.entries.len()
    }
}

/// Longest TTL any store honours: ten years.
pub(crate) const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// `now + ttl_secs`, with the TTL capped at [`MAX_TTL_SECS`].
pub(crate) fn expiry(now: Instant, ttl_secs: u64) -> Instant {
    let ttl = Duration::from_secs(ttl_secs.min(MAX_TTL_SECS));
    now.checked_add(ttl).unwrap_or(now)
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so check-and-set is atomic.
        let won = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if *held.get() > now {
                    false
                } else {
                    held.insert(expiry(now, ttl_secs));
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(expiry(now, ttl_secs));
                true
            }
        };
        Ok(won)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn force_acquire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.entries
            .insert(key.to_string(), expiry(Instant::now(), ttl_secs));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let Some(expires) = self.entries.get(key).map(|e| *e.value()) else {
            return Ok(false);
        };
        if expires > now {
            return Ok(true);
        }
        self.entries.remove_if(key, |_, exp| *exp <= now);
        Ok(false)
    }

    fn driver(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_is_exclusive_until_ttl_elapses() {
        let store = MemoryLockStore::new();
        assert!(store.acquire("k", 1).await.unwrap());
        assert!(!store.acquire("k", 1).await.unwrap());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(store.acquire("k", 1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn release_allows_immediate_reacquire() {
        let store = MemoryLockStore::new();
        assert!(store.acquire("k", 300).await.unwrap());
        store.release("k").await.unwrap();
        assert!(store.acquire("k", 300).await.unwrap());
    }

    #[tokio::test]
    async fn release_of_missing_key_is_fine() {
        let store = MemoryLockStore::new();
        store.release("never-held").await.unwrap();
        assert!(!store.exists("never-held").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn exists_evicts_expired_entries() {
        let store = MemoryLockStore::new();
        store.acquire("k", 2).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn force_acquire_overrides_holder() {
        let store = MemoryLockStore::new();
        assert!(store.acquire("k", 1).await.unwrap());
        store.force_acquire("k", 60).await.unwrap();

        // The forced TTL replaced the original one-second window.
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.exists("k").await.unwrap());
        assert!(!store.acquire("k", 1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired() {
        let store = MemoryLockStore::new();
        store.acquire("short", 1).await.unwrap();
        store.acquire("long", 100).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.exists("long").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_is_capped_not_overflowed() {
        let store = MemoryLockStore::new();
        assert!(store.acquire("k", u64::MAX).await.unwrap());
        assert!(!store.acquire("k", 1).await.unwrap());
        store.force_acquire("k", u64::MAX).await.unwrap();
        assert!(store.exists("k").await.unwrap());

        let now = Instant::now();
        assert_eq!(expiry(now, u64::MAX), expiry(now, MAX_TTL_SECS));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryLockStore::new();
        assert!(store.acquire("task:a:202401010000", 60).await.unwrap());
        assert!(store.acquire("task:b:202401010000", 60).await.unwrap());
        assert!(store.acquire("task:a:202401010001", 60).await.unwrap());
    }
}
