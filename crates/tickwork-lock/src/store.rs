use async_trait::async_trait;

use crate::error::Result;

/// Keyed mutual exclusion with a time-to-live.
///
/// Values are opaque; only existence and expiry matter.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically create the lock if absent (or expired).
    ///
    /// Returns `true` only for the caller that created it. Check-and-set must
    /// be a single atomic step in the backing medium.
    async fn acquire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Remove the lock. Missing or expired keys are not an error.
    async fn release(&self, key: &str) -> Result<()>;

    /// Overwrite the lock regardless of the current holder.
    async fn force_acquire(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// Whether a non-expired lock exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Short driver name for logs.
    fn driver(&self) -> &'static str;
}
