//! `tickwork-lock` — minimal distributed mutual exclusion for task windows.
//!
//! # Stores
//!
//! | Store              | Scope          | Backing                          |
//! |--------------------|----------------|----------------------------------|
//! | `MemoryLockStore`  | one process    | in-process map of expiry instants |
//! | `CacheLockStore`   | whole fleet    | any [`SharedCache`] (atomic add)  |
//!
//! [`LockManager`] selects one store by driver name and forwards to it.
//! Contention is not an error: `acquire` simply returns `false`.

pub mod cache;
pub mod error;
pub mod manager;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_cache;
pub mod store;

pub use cache::{CacheLockStore, InMemoryCache, SharedCache};
pub use error::{LockError, Result};
pub use manager::LockManager;
pub use memory::MemoryLockStore;
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
pub use store::LockStore;
