use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use crate::core::cache::AtomicCache;
use crate::core::error::CacheError;

/// Millisecond time source used for entry expiry.
pub trait Clock: Send + Sync + Debug {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct StoredEntry {
    #[allow(dead_code)]
    value: Vec<u8>,
    /// Absolute expiry in ms; `None` never expires.
    expires_at: Option<u64>,
}

impl StoredEntry {
    #[inline]
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(at) if now_ms >= at)
    }
}

/// Inserts between automatic sweeps of expired entries.
pub const DEFAULT_PURGE_INTERVAL: u64 = 1024;

/// [`MemoryCache`] is a process-local [`AtomicCache`].
///
/// DashMap's entry API holds the shard lock for the whole check-and-insert,
/// which makes `insert_if_absent` atomic for every thread in the process.
/// It gives no guarantee across processes.
///
/// Expired entries are swept every `purge_interval` inserts.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, StoredEntry>,
    clock: Arc<dyn Clock>,
    inserts: AtomicU64,
    purge_interval: u64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            inserts: AtomicU64::new(0),
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }

    /// Sweeps expired entries every `every` inserts; `0` disables sweeping.
    pub fn with_purge_interval(mut self, every: u64) -> Self {
        self.purge_interval = every;
        self
    }

    fn maybe_purge(&self) {
        if self.purge_interval == 0 {
            return;
        }
        let n = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.purge_interval == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                trace!(removed, "expired entries purged");
            }
        }
    }

    /// Returns `true` if `key` is present and not expired.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

impl AtomicCache for MemoryCache {
    fn insert_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: u32,
    ) -> Result<bool, CacheError> {
        let now = self.clock.now_ms();
        let fresh = StoredEntry {
            value: value.to_vec(),
            expires_at: (ttl_secs > 0).then(|| now + u64::from(ttl_secs) * 1000),
        };

        let inserted = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    trace!(key, "expired entry replaced");
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };

        // Shard guard is released here; retain would deadlock under it.
        self.maybe_purge();
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_at(start_ms: u64) -> (Arc<ManualClock>, MemoryCache) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let cache = MemoryCache::with_clock(clock.clone());
        (clock, cache)
    }

    #[test]
    fn second_insert_is_rejected() {
        let (_clock, cache) = cache_at(1_000);
        assert!(cache.insert_if_absent("k", b"1", 10).unwrap());
        assert!(!cache.insert_if_absent("k", b"1", 10).unwrap());
        assert!(cache.contains("k"));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let (clock, cache) = cache_at(1_000);
        assert!(cache.insert_if_absent("k", b"1", 10).unwrap());

        clock.advance(Duration::from_millis(9_999));
        assert!(!cache.insert_if_absent("k", b"1", 10).unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(!cache.contains("k"));
        assert!(cache.insert_if_absent("k", b"1", 10).unwrap());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let (clock, cache) = cache_at(0);
        assert!(cache.insert_if_absent("k", b"1", 0).unwrap());
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert!(!cache.insert_if_absent("k", b"1", 0).unwrap());
    }

    #[test]
    fn purge_drops_only_expired() {
        let (clock, cache) = cache_at(0);
        cache.insert_if_absent("short", b"1", 1).unwrap();
        cache.insert_if_absent("long", b"1", 60).unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("long"));
    }

    #[test]
    fn inserts_sweep_expired_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::with_clock(clock.clone()).with_purge_interval(4);

        for key in ["a", "b", "c"] {
            cache.insert_if_absent(key, b"1", 1).unwrap();
        }
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.len(), 3);

        // Fourth insert triggers the sweep.
        cache.insert_if_absent("d", b"1", 60).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("d"));
    }

    #[test]
    fn zero_interval_disables_sweeping() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = MemoryCache::with_clock(clock.clone()).with_purge_interval(0);

        cache.insert_if_absent("a", b"1", 1).unwrap();
        clock.advance(Duration::from_secs(2));
        for key in ["b", "c", "d", "e"] {
            cache.insert_if_absent(key, b"1", 60).unwrap();
        }
        assert_eq!(cache.len(), 5);
    }
}
