//! Cache Module
//!
//! Function-result caching with TTL expiration and LRU eviction over two
//! interchangeable backends: an in-process memory store and a durable disk
//! store.

mod codec;
mod disk;
mod entry;
mod facade;
mod flight;
mod key;
mod lru;
mod memory;
mod policy;
mod stats;


use std::time::Duration;

use crate::error::Result;

// Re-export public types
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use disk::DiskCacheStore;
pub use entry::{current_timestamp_ms, monotonic_ms, CacheEntry, EntryMeta};
pub use facade::CacheFacade;
pub use key::{fingerprint, ArgValue, CacheArg, CacheKey, CallArgs, KeyFingerprinter};
pub use lru::RecencyIndex;
pub use memory::MemoryCacheStore;
pub use policy::EvictionPolicy;
pub use stats::CacheStats;

// == Backend Trait ==
/// Storage seam shared by the memory and disk stores.
///
/// Backends store serialized payloads; encoding values is the facade's job.
pub trait CacheBackend: Send + Sync {
    /// Returns the payload for `key`, or None on a miss. Expired entries are
    /// removed and reported as misses.
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Same as `get`, but counts neither a hit nor a miss. For re-checking a
    /// key whose lookup outcome was already recorded.
    fn peek(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Stores `payload` under `key`, replacing any previous entry. `ttl` of
    /// None means the entry never expires.
    fn put(&self, key: &CacheKey, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`. Returns true if an entry was removed.
    fn invalidate(&self, key: &CacheKey) -> Result<bool>;

    /// Removes every entry.
    fn clear(&self) -> Result<()>;

    /// Number of entries currently tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry. Returns how many were removed.
    fn sweep_expired(&self) -> Result<usize>;

    fn stats(&self) -> CacheStats;

    /// Persists any buffered bookkeeping. No-op for volatile backends.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
