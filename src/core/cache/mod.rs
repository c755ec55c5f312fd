//! Atomic cache capability.
//!
//! The duplicate detector never locks anything locally; every guarantee it
//! gives comes from the backing store's insert-if-absent being atomic across
//! all callers. Implementations:
//! - [`MemcachedCache`] – production adapter over a memcached cluster
//! - [`MemoryCache`] – process-local store for tests and single-node setups

pub mod memcached;
pub mod memory;

pub use memcached::{MemcachedCache, MemcachedOptions};
pub use memory::{Clock, ManualClock, MemoryCache, SystemClock};

use crate::core::error::CacheError;

/// Distributed key-value store exposing atomic "insert if absent with TTL".
///
/// Implementations must be safe to share across threads without external
/// locking.
pub trait AtomicCache: Send + Sync {
    /// Stores `value` under `key` only if the key does not exist yet.
    ///
    /// Returns `Ok(true)` when the key was newly inserted and `Ok(false)`
    /// when it already existed. A `ttl_secs` of `0` means the entry never
    /// expires.
    fn insert_if_absent(&self, key: &str, value: &[u8], ttl_secs: u32)
        -> Result<bool, CacheError>;
}
