//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support, and
//! the two clocks entries are stamped with.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;

// == Entry Meta ==
/// Bookkeeping the eviction policy needs about an entry, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: CacheKey,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Last access timestamp (Unix milliseconds)
    pub last_accessed: u64,
    /// Payload size in bytes
    pub size_bytes: u64,
}

impl EntryMeta {
    /// Boundary condition: expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(expires) if now >= expires)
    }
}

// == Cache Entry ==
/// A stored, serialized call result plus its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Serialized value
    pub payload: Vec<u8>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Last access timestamp (Unix milliseconds)
    pub last_accessed: u64,
    /// Payload size in bytes
    pub size_bytes: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL, stamped with the current time.
    pub fn new(key: CacheKey, payload: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self::created_at(key, payload, ttl, current_timestamp_ms())
    }

    /// Creates an entry as if written at `now`.
    pub fn created_at(key: CacheKey, payload: Vec<u8>, ttl: Option<Duration>, now: u64) -> Self {
        let size_bytes = payload.len() as u64;
        Self {
            key,
            payload,
            created_at: now,
            expires_at: expiry_from(now, ttl),
            last_accessed: now,
            size_bytes,
        }
    }

    // == Is Expired ==
    /// Expired once `now >= expires_at`, with `now` on the same clock the
    /// entry was stamped with.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.meta().is_expired_at(now)
    }

    /// Records an access at `now`.
    pub fn touch(&mut self, now: u64) {
        self.last_accessed = now;
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed: self.last_accessed,
            size_bytes: self.size_bytes,
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
///
/// Used where timestamps outlive the process, i.e. on disk.
pub fn current_timestamp_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Milliseconds elapsed on a monotonic clock since its first use in this
/// process. Unaffected by wall-clock steps; meaningless across processes.
pub fn monotonic_ms() -> u64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let elapsed = ORIGIN.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Expiration timestamp for an entry written at `now` with `ttl`.
pub fn expiry_from(now: u64, ttl: Option<Duration>) -> Option<u64> {
    ttl.map(|ttl| now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)))
}
