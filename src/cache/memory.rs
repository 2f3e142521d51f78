//! Memory Store Module
//!
//! In-process backend: a HashMap of entries plus the eviction policy, both
//! guarded by one store-wide lock. Entries are stamped with the monotonic
//! clock, so TTLs hold across wall-clock steps.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{monotonic_ms, CacheBackend, CacheEntry, CacheKey, CacheStats, EvictionPolicy};
use crate::config::{CacheConfig, SizeUnit};
use crate::error::Result;

#[derive(Debug)]
struct MemoryInner {
    entries: HashMap<CacheKey, CacheEntry>,
    policy: EvictionPolicy,
    stats: CacheStats,
}

impl MemoryInner {
    /// Drops `key` from storage and policy, counting it as an expiration or
    /// an eviction depending on its TTL state at `now`.
    fn discard(&mut self, key: &CacheKey, now: u64) {
        self.policy.remove(key);
        if let Some(entry) = self.entries.remove(key) {
            if entry.is_expired_at(now) {
                self.stats.record_expirations(1);
            } else {
                self.stats.record_evictions(1);
            }
        }
    }
}

// == Memory Cache Store ==
/// Thread-safe in-memory cache with LRU eviction and TTL support.
#[derive(Debug)]
pub struct MemoryCacheStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCacheStore {
    // == Constructor ==
    /// Creates a store bounded by `maxsize` counted in `unit`.
    pub fn new(maxsize: Option<u64>, unit: SizeUnit) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                policy: EvictionPolicy::new(maxsize, unit),
                stats: CacheStats::new(maxsize),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.maxsize, config.size_unit))
    }

    /// Shared read path; `counted` decides whether the lookup shows up in
    /// the hit/miss counters.
    fn read(&self, key: &CacheKey, counted: bool) -> Option<Vec<u8>> {
        let now = monotonic_ms();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(key) {
            None => {
                if counted {
                    inner.stats.record_miss();
                }
                return None;
            }
            Some(entry) if entry.is_expired_at(now) => true,
            Some(entry) => {
                entry.touch(now);
                false
            }
        };

        if expired {
            debug!(key = %key, "memory entry expired on read");
            inner.discard(key, now);
            if counted {
                inner.stats.record_miss();
            }
            return None;
        }

        inner.policy.touch(key, now);
        if counted {
            inner.stats.record_hit();
        }
        inner.entries.get(key).map(|entry| entry.payload.clone())
    }
}

impl CacheBackend for MemoryCacheStore {
    // == Get ==
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.read(key, true))
    }

    fn peek(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self.read(key, false))
    }

    // == Put ==
    fn put(&self, key: &CacheKey, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = monotonic_ms();
        let entry = CacheEntry::created_at(*key, payload, ttl, now);
        let mut inner = self.inner.lock();

        let victims = inner.policy.admit(entry.meta(), now);
        inner.entries.insert(*key, entry);
        for victim in &victims {
            // The policy already forgot the victim
            inner.discard(&victim.key, now);
        }
        if !victims.is_empty() {
            debug!(count = victims.len(), "memory store evicted entries");
        }
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.policy.remove(key);
        Ok(inner.entries.remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.policy.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    // == Sweep ==
    fn sweep_expired(&self) -> Result<usize> {
        let now = monotonic_ms();
        let mut inner = self.inner.lock();
        let expired = inner.policy.expired(now);
        for key in &expired {
            inner.discard(key, now);
        }
        Ok(expired.len())
    }

    fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.set_usage(inner.entries.len(), inner.policy.total_bytes());
        stats
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::{self, sleep};

    fn k(label: &str) -> CacheKey {
        CacheKey::for_label(label)
    }

    fn store(maxsize: Option<u64>) -> MemoryCacheStore {
        MemoryCacheStore::new(maxsize, SizeUnit::Entries)
    }

    #[test]
    fn test_store_put_and_get() {
        let store = store(Some(100));

        store.put(&k("key1"), b"value1".to_vec(), None).unwrap();

        assert_eq!(store.get(&k("key1")).unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let store = store(Some(100));
        assert_eq!(store.get(&k("nope")).unwrap(), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_store_peek_leaves_counters_alone() {
        let store = store(Some(100));
        store.put(&k("key1"), vec![7], None).unwrap();

        assert_eq!(store.peek(&k("key1")).unwrap(), Some(vec![7]));
        assert_eq!(store.peek(&k("other")).unwrap(), None);

        let stats = store.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[test]
    fn test_store_stamps_entries_on_monotonic_clock() {
        let store = store(None);
        let before = monotonic_ms();
        store.put(&k("key1"), vec![1], Some(Duration::from_secs(3600))).unwrap();

        let inner = store.inner.lock();
        let entry = &inner.entries[&k("key1")];
        assert!(entry.created_at >= before && entry.created_at <= monotonic_ms());
        assert_eq!(entry.expires_at, Some(entry.created_at + 3_600_000));
        assert!(entry.created_at < crate::cache::current_timestamp_ms() / 2);
    }

    #[test]
    fn test_store_invalidate() {
        let store = store(Some(100));
        store.put(&k("key1"), vec![1], None).unwrap();

        assert!(store.invalidate(&k("key1")).unwrap());
        assert!(!store.invalidate(&k("key1")).unwrap());
        assert!(store.is_empty());
        assert_eq!(store.get(&k("key1")).unwrap(), None);
    }

    #[test]
    fn test_store_overwrite() {
        let store = store(Some(100));

        store.put(&k("key1"), b"v1".to_vec(), Some(Duration::from_secs(1))).unwrap();
        store.put(&k("key1"), b"v2".to_vec(), None).unwrap();

        assert_eq!(store.get(&k("key1")).unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.len(), 1);

        // overwrite dropped the old TTL
        sleep(Duration::from_millis(1100));
        assert_eq!(store.get(&k("key1")).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_store_ttl_expiration() {
        let store = store(Some(100));
        store.put(&k("key1"), vec![1], Some(Duration::from_secs(1))).unwrap();

        assert!(store.get(&k("key1")).unwrap().is_some());

        sleep(Duration::from_millis(1100));

        assert_eq!(store.get(&k("key1")).unwrap(), None);
        assert!(store.is_empty());
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let store = store(Some(2));

        store.put(&k("A"), vec![1], None).unwrap();
        store.put(&k("B"), vec![2], None).unwrap();
        store.get(&k("A")).unwrap();
        store.put(&k("C"), vec![3], None).unwrap();

        assert!(store.get(&k("A")).unwrap().is_some());
        assert_eq!(store.get(&k("B")).unwrap(), None);
        assert!(store.get(&k("C")).unwrap().is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_store_single_slot_scenario() {
        let store = store(Some(1));

        store.put(&k("x"), b"1".to_vec(), None).unwrap();
        store.put(&k("y"), b"2".to_vec(), None).unwrap();

        assert_eq!(store.get(&k("x")).unwrap(), None);
        assert_eq!(store.get(&k("y")).unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_store_byte_bound() {
        let store = MemoryCacheStore::new(Some(10), SizeUnit::Bytes);

        store.put(&k("a"), vec![0; 6], None).unwrap();
        store.put(&k("b"), vec![0; 6], None).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get(&k("b")).unwrap().is_some());
        assert_eq!(store.stats().total_bytes, 6);
    }

    #[test]
    fn test_store_sweep_expired() {
        let store = store(None);

        store.put(&k("short"), vec![1], Some(Duration::from_secs(1))).unwrap();
        store.put(&k("long"), vec![2], Some(Duration::from_secs(10))).unwrap();

        sleep(Duration::from_millis(1100));

        assert_eq!(store.sweep_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&k("long")).unwrap().is_some());
    }

    #[test]
    fn test_store_clear() {
        let store = store(None);
        store.put(&k("a"), vec![1], None).unwrap();
        store.put(&k("b"), vec![1], None).unwrap();

        store.clear().unwrap();

        assert!(store.is_empty());
        assert_eq!(store.stats().total_bytes, 0);
    }

    #[test]
    fn test_store_concurrent_access() {
        let store = Arc::new(store(Some(64)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = k(&format!("{t}-{}", i % 16));
                        store.put(&key, vec![t as u8; 8], None).unwrap();
                        if let Some(payload) = store.get(&key).unwrap() {
                            assert_eq!(payload.len(), 8);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store.len() <= 64);
        let stats = store.stats();
        assert_eq!(stats.total_entries, store.len());
    }
}
