//! Eviction Policy Module
//!
//! Pure TTL + LRU decision logic shared by the memory and disk stores. No I/O;
//! the stores apply the decisions to their own storage.

use std::collections::BTreeSet;

use crate::cache::{CacheKey, EntryMeta, RecencyIndex};
use crate::config::SizeUnit;

// == Eviction Policy ==
/// Tracks live entries and picks victims under capacity pressure.
///
/// Expired entries are always chosen before live ones, oldest `created_at`
/// first; after that the least recently used entry goes.
#[derive(Debug)]
pub struct EvictionPolicy {
    maxsize: Option<u64>,
    unit: SizeUnit,
    recency: RecencyIndex,
    /// (expires_at, created_at, key) for entries that carry a TTL
    expiries: BTreeSet<(u64, u64, CacheKey)>,
}

impl EvictionPolicy {
    // == Constructor ==
    pub fn new(maxsize: Option<u64>, unit: SizeUnit) -> Self {
        Self {
            maxsize,
            unit,
            recency: RecencyIndex::new(),
            expiries: BTreeSet::new(),
        }
    }

    // == Is Expired ==
    /// True iff `entry.expires_at` is set and `now >= expires_at`.
    pub fn is_expired(entry: &EntryMeta, now: u64) -> bool {
        entry.is_expired_at(now)
    }

    // == Touch ==
    /// Promotes `key` to most recently used.
    pub fn touch(&mut self, key: &CacheKey, now: u64) -> bool {
        self.recency.touch(key, now)
    }

    // == Admit ==
    /// Records `meta` as the most recently used entry, then returns the
    /// entries that must go to bring usage back within `maxsize`.
    ///
    /// Victims are already removed from the policy. The admitted key itself
    /// can be a victim when it alone exceeds a byte bound.
    pub fn admit(&mut self, meta: EntryMeta, now: u64) -> Vec<EntryMeta> {
        self.record(meta);
        self.shrink(now)
    }

    /// Evicts until usage is within `maxsize`: expired entries first, oldest
    /// `created_at` first, then least recently used.
    pub fn shrink(&mut self, now: u64) -> Vec<EntryMeta> {
        let mut victims = Vec::new();
        if !self.over_capacity() {
            return victims;
        }

        let mut expired: Vec<(u64, u64, CacheKey)> = self
            .expired_range(now)
            .map(|&(expires_at, created_at, key)| (created_at, expires_at, key))
            .collect();
        expired.sort();
        for (_, _, key) in expired {
            if !self.over_capacity() {
                break;
            }
            victims.extend(self.remove(&key));
        }

        while self.over_capacity() {
            let Some(oldest) = self.recency.peek_oldest().map(|m| m.key) else {
                break;
            };
            victims.extend(self.remove(&oldest));
        }

        victims
    }

    /// Records `meta` at the front without evicting anything.
    pub fn record(&mut self, meta: EntryMeta) {
        self.forget_expiry(&meta.key);
        if let Some(expires_at) = meta.expires_at {
            self.expiries.insert((expires_at, meta.created_at, meta.key));
        }
        self.recency.insert(meta);
    }

    /// Appends `meta` as least recently used; for rebuilding persisted order.
    pub fn restore(&mut self, meta: EntryMeta) {
        self.forget_expiry(&meta.key);
        if let Some(expires_at) = meta.expires_at {
            self.expiries.insert((expires_at, meta.created_at, meta.key));
        }
        self.recency.push_oldest(meta);
    }

    // == Remove ==
    pub fn remove(&mut self, key: &CacheKey) -> Option<EntryMeta> {
        let meta = self.recency.remove(key)?;
        if let Some(expires_at) = meta.expires_at {
            self.expiries.remove(&(expires_at, meta.created_at, meta.key));
        }
        Some(meta)
    }

    // == Expired ==
    /// Keys whose TTL has elapsed at `now`, soonest expiry first.
    pub fn expired(&self, now: u64) -> Vec<CacheKey> {
        self.expired_range(now).map(|&(_, _, key)| key).collect()
    }

    // == Queries ==
    pub fn get(&self, key: &CacheKey) -> Option<&EntryMeta> {
        self.recency.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.recency.contains(key)
    }

    pub fn len(&self) -> usize {
        self.recency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recency.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.recency.total_bytes()
    }

    pub fn maxsize(&self) -> Option<u64> {
        self.maxsize
    }

    /// Current usage in the configured unit.
    pub fn usage(&self) -> u64 {
        match self.unit {
            SizeUnit::Entries => self.recency.len() as u64,
            SizeUnit::Bytes => self.recency.total_bytes(),
        }
    }

    pub fn over_capacity(&self) -> bool {
        matches!(self.maxsize, Some(max) if self.usage() > max)
    }

    /// Live entries, most recently used first.
    pub fn iter(&self) -> impl Iterator<Item = &EntryMeta> + '_ {
        self.recency.iter()
    }

    pub fn clear(&mut self) {
        self.recency.clear();
        self.expiries.clear();
    }

    fn expired_range(&self, now: u64) -> impl Iterator<Item = &(u64, u64, CacheKey)> + '_ {
        self.expiries
            .iter()
            .take_while(move |&&(expires_at, _, _)| expires_at <= now)
    }

    fn forget_expiry(&mut self, key: &CacheKey) {
        if let Some(old) = self.recency.get(key) {
            if let Some(expires_at) = old.expires_at {
                self.expiries.remove(&(expires_at, old.created_at, old.key));
            }
        }
    }
}
