//! Configuration Module
//!
//! Immutable settings for a cache instance, built in code or loaded from
//! environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CacheError, Result};

// == Defaults ==
/// Entry bound used by `CacheConfig::memory`
pub const DEFAULT_MAXSIZE: u64 = 128;

/// TTL used by `CacheConfig::memory`
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(10);

/// TTL used by `CacheConfig::disk`
pub const DEFAULT_DISK_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Directory used when `YCACHE_CACHE_DIR` is unset
pub const DEFAULT_CACHE_DIR: &str = ".temp";

/// How long a caller waits on another caller computing the same key
pub const DEFAULT_SINGLE_FLIGHT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval of the background expiration sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// == Size Unit ==
/// What `maxsize` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeUnit {
    /// Number of live entries
    #[default]
    Entries,
    /// Sum of payload sizes in bytes
    Bytes,
}

impl SizeUnit {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "entries" | "count" => Some(SizeUnit::Entries),
            "bytes" => Some(SizeUnit::Bytes),
            _ => None,
        }
    }
}

// == Cache Config ==
/// Settings for one cache instance.
///
/// A config is consumed by the store constructors and never changes
/// afterwards.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity bound; `None` means unbounded (TTL-only eviction) and
    /// `Some(0)` disables caching
    pub maxsize: Option<u64>,
    /// Unit of `maxsize`
    pub size_unit: SizeUnit,
    /// Default expiration applied to every entry, `None` = never expires
    pub ttl: Option<Duration>,
    /// Root directory of the disk backend
    pub cache_dir: Option<PathBuf>,
    /// Whether argument types participate in fingerprinting
    pub type_sensitive: bool,
    /// Deduplicate concurrent computations of the same key
    pub single_flight: bool,
    /// Bounded wait on a single-flight slot, `None` waits forever
    pub single_flight_timeout: Option<Duration>,
    /// Fall back to pass-through execution on storage faults
    pub degrade_on_storage_error: bool,
    /// Interval for the background sweep task
    pub sweep_interval: Duration,
}

impl CacheConfig {
    // == Presets ==
    /// Defaults for an in-process cache: 128 entries, 10 second TTL.
    pub fn memory() -> Self {
        Self {
            maxsize: Some(DEFAULT_MAXSIZE),
            ttl: Some(DEFAULT_MEMORY_TTL),
            ..Self::default()
        }
    }

    /// Defaults for a disk cache rooted at `dir`: unbounded, 24 hour TTL.
    pub fn disk(dir: impl Into<PathBuf>) -> Self {
        Self {
            maxsize: None,
            ttl: Some(DEFAULT_DISK_TTL),
            cache_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `YCACHE_MAXSIZE` - Capacity bound (default: unbounded)
    /// - `YCACHE_SIZE_UNIT` - `entries` or `bytes` (default: entries)
    /// - `YCACHE_TTL_SECS` - Default TTL in seconds (default: never expires)
    /// - `YCACHE_CACHE_DIR` - Disk backend directory (default: `.temp`)
    /// - `YCACHE_TYPE_SENSITIVE` - `true`/`false` (default: true)
    /// - `YCACHE_SWEEP_INTERVAL_SECS` - Sweep frequency (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            maxsize: env::var("YCACHE_MAXSIZE")
                .ok()
                .and_then(|v| v.parse().ok()),
            size_unit: env::var("YCACHE_SIZE_UNIT")
                .ok()
                .and_then(|v| SizeUnit::parse(&v))
                .unwrap_or_default(),
            ttl: env::var("YCACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            cache_dir: Some(
                env::var("YCACHE_CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_DIR)),
            ),
            type_sensitive: env::var("YCACHE_TYPE_SENSITIVE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.type_sensitive),
            sweep_interval: env::var("YCACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            ..defaults
        }
    }

    // == Builders ==
    pub fn with_maxsize(mut self, maxsize: Option<u64>) -> Self {
        self.maxsize = maxsize;
        self
    }

    pub fn with_size_unit(mut self, unit: SizeUnit) -> Self {
        self.size_unit = unit;
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_type_sensitive(mut self, type_sensitive: bool) -> Self {
        self.type_sensitive = type_sensitive;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool, timeout: Option<Duration>) -> Self {
        self.single_flight = enabled;
        self.single_flight_timeout = timeout;
        self
    }

    pub fn with_degrade_on_storage_error(mut self, degrade: bool) -> Self {
        self.degrade_on_storage_error = degrade;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    // == Queries ==
    /// True when `maxsize` is zero and every call passes straight through.
    pub fn is_disabled(&self) -> bool {
        self.maxsize == Some(0)
    }

    /// Checks settings shared by both backends.
    pub fn validate(&self) -> Result<()> {
        if self.ttl == Some(Duration::ZERO) {
            return Err(CacheError::InvalidConfig(
                "ttl must be positive; use None for entries that never expire".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates and returns the disk directory.
    pub fn require_cache_dir(&self) -> Result<&PathBuf> {
        self.validate()?;
        self.cache_dir.as_ref().ok_or_else(|| {
            CacheError::InvalidConfig("cache_dir is required for the disk backend".to_string())
        })
    }
}

impl Default for CacheConfig {
    /// Unbounded, never-expiring, type-sensitive cache with single-flight on.
    fn default() -> Self {
        Self {
            maxsize: None,
            size_unit: SizeUnit::Entries,
            ttl: None,
            cache_dir: None,
            type_sensitive: true,
            single_flight: true,
            single_flight_timeout: Some(DEFAULT_SINGLE_FLIGHT_TIMEOUT),
            degrade_on_storage_error: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}
