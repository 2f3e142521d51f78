//! Cache Facade Module
//!
//! Memoizes producer results: fingerprint the call, look the key up, run the
//! producer on a miss and store what it returns. Storage faults degrade to
//! pass-through execution; producer errors are returned as-is and never
//! cached.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::flight::{Flight, FlightGroup};
use crate::cache::{
    CacheBackend, CacheKey, CacheStats, CallArgs, Codec, DiskCacheStore, JsonCodec,
    KeyFingerprinter, MemoryCacheStore,
};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// Whether a backend read is the call's own lookup or a later re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Counted,
    Recheck,
}

// == Cache Facade ==
/// Front door of a cache instance.
///
/// Cloning is cheap and clones share the backend and the single-flight
/// state.
pub struct CacheFacade<C: Codec = JsonCodec> {
    backend: Arc<dyn CacheBackend>,
    codec: Arc<C>,
    fingerprinter: KeyFingerprinter,
    ttl: Option<Duration>,
    disabled: bool,
    single_flight: bool,
    single_flight_timeout: Option<Duration>,
    degrade: bool,
    flights: Arc<FlightGroup>,
}

impl<C: Codec> Clone for CacheFacade<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            codec: Arc::clone(&self.codec),
            fingerprinter: self.fingerprinter,
            ttl: self.ttl,
            disabled: self.disabled,
            single_flight: self.single_flight,
            single_flight_timeout: self.single_flight_timeout,
            degrade: self.degrade,
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<C: Codec> fmt::Debug for CacheFacade<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFacade")
            .field("codec", &self.codec.name())
            .field("ttl", &self.ttl)
            .field("disabled", &self.disabled)
            .field("single_flight", &self.single_flight)
            .field("entries", &self.backend.len())
            .finish_non_exhaustive()
    }
}

impl CacheFacade<JsonCodec> {
    // == Constructors ==
    /// In-process cache configured by `config`.
    pub fn memory(config: &CacheConfig) -> Result<Self> {
        let store = MemoryCacheStore::from_config(config)?;
        Ok(Self::with_backend(Arc::new(store), config))
    }

    /// Disk cache rooted at `config.cache_dir`.
    ///
    /// Fails with `StorageUnavailable` if the directory cannot be created,
    /// written or locked.
    pub fn disk(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        if config.is_disabled() {
            // Nothing will ever be stored; leave the filesystem alone
            let store = MemoryCacheStore::new(Some(0), config.size_unit);
            return Ok(Self::with_backend(Arc::new(store), config));
        }
        let store = DiskCacheStore::open(config)?;
        Ok(Self::with_backend(Arc::new(store), config))
    }

    /// Wraps an existing backend, e.g. one shared with a sweep task.
    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            codec: Arc::new(JsonCodec),
            fingerprinter: KeyFingerprinter::new(config.type_sensitive),
            ttl: config.ttl,
            disabled: config.is_disabled(),
            single_flight: config.single_flight,
            single_flight_timeout: config.single_flight_timeout,
            degrade: config.degrade_on_storage_error,
            flights: Arc::new(FlightGroup::new()),
        }
    }
}

impl<C: Codec> CacheFacade<C> {
    /// Swaps the payload codec. Entries written with another codec will not
    /// decode and get recomputed.
    pub fn with_codec<D: Codec>(self, codec: D) -> CacheFacade<D> {
        CacheFacade {
            backend: self.backend,
            codec: Arc::new(codec),
            fingerprinter: self.fingerprinter,
            ttl: self.ttl,
            disabled: self.disabled,
            single_flight: self.single_flight,
            single_flight_timeout: self.single_flight_timeout,
            degrade: self.degrade,
            flights: self.flights,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// True when `maxsize` is zero and every call passes straight through.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn fingerprint(&self, call: &CallArgs) -> Result<CacheKey> {
        self.fingerprinter.fingerprint(call)
    }

    // == Get Or Compute ==
    /// Returns the cached value for `call`, or runs `producer` and caches its
    /// result under the default TTL.
    pub fn get_or_compute<V, E, F>(&self, call: &CallArgs, producer: F) -> std::result::Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> std::result::Result<V, E>,
    {
        self.get_or_compute_with_ttl(call, self.ttl, producer)
    }

    /// Same as [`get_or_compute`](Self::get_or_compute) with an explicit TTL
    /// for a freshly computed entry.
    pub fn get_or_compute_with_ttl<V, E, F>(
        &self,
        call: &CallArgs,
        ttl: Option<Duration>,
        producer: F,
    ) -> std::result::Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> std::result::Result<V, E>,
    {
        if self.disabled {
            return producer();
        }
        let key = self.fingerprinter.fingerprint(call)?;

        // Only this first lookup counts toward the hit/miss statistics
        let mut epoch = self.flights.epoch();
        if let Some(value) = self.lookup(&key, Lookup::Counted)? {
            return Ok(value);
        }
        if !self.single_flight {
            return self.compute(&key, ttl, producer);
        }

        loop {
            match self.flights.join(&key, self.single_flight_timeout) {
                Flight::Leader(_guard) => {
                    // Another flight may have stored the key since our miss
                    if self.flights.epoch() != epoch {
                        if let Some(value) = self.lookup(&key, Lookup::Recheck)? {
                            return Ok(value);
                        }
                    }
                    return self.compute(&key, ttl, producer);
                }
                Flight::Followed => {
                    epoch = self.flights.epoch();
                    if let Some(value) = self.lookup(&key, Lookup::Recheck)? {
                        return Ok(value);
                    }
                    // The leader failed or its result was not cacheable
                }
                Flight::TimedOut => {
                    warn!(key = %key, "single-flight wait timed out, computing independently");
                    return self.compute(&key, ttl, producer);
                }
            }
        }
    }

    /// Runs [`get_or_compute`](Self::get_or_compute) on tokio's blocking
    /// pool. Panics in the producer are resumed on the caller.
    pub async fn get_or_compute_async<V, E, F>(
        &self,
        call: CallArgs,
        producer: F,
    ) -> std::result::Result<V, E>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        E: From<CacheError> + Send + 'static,
        F: FnOnce() -> std::result::Result<V, E> + Send + 'static,
    {
        let facade = self.clone();
        match tokio::task::spawn_blocking(move || facade.get_or_compute(&call, producer)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(CacheError::Io(io::Error::new(io::ErrorKind::Interrupted, e.to_string())).into()),
        }
    }

    // == Maintenance ==
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        self.backend.invalidate(key)
    }

    /// Drops the cached result of one call.
    pub fn invalidate_call(&self, call: &CallArgs) -> Result<bool> {
        let key = self.fingerprinter.fingerprint(call)?;
        self.backend.invalidate(&key)
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    pub fn sweep_expired(&self) -> Result<usize> {
        self.backend.sweep_expired()
    }

    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    // == Internals ==
    fn lookup<V: DeserializeOwned>(&self, key: &CacheKey, mode: Lookup) -> Result<Option<V>> {
        let found = match mode {
            Lookup::Counted => self.backend.get(key),
            Lookup::Recheck => self.backend.peek(key),
        };
        let payload = match found {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(key = %key, "cache miss");
                return Ok(None);
            }
            Err(e) => {
                self.tolerate("lookup", key, e)?;
                return Ok(None);
            }
        };

        match self.codec.deserialize(&payload) {
            Ok(value) => {
                debug!(key = %key, "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(
                    key = %key,
                    codec = self.codec.name(),
                    error = %e,
                    "cached payload does not decode, recomputing"
                );
                if let Err(e) = self.backend.invalidate(key) {
                    self.tolerate("invalidate", key, e)?;
                }
                Ok(None)
            }
        }
    }

    fn compute<V, E, F>(&self, key: &CacheKey, ttl: Option<Duration>, producer: F) -> std::result::Result<V, E>
    where
        V: Serialize,
        E: From<CacheError>,
        F: FnOnce() -> std::result::Result<V, E>,
    {
        let value = producer()?;
        self.store(key, &value, ttl)?;
        Ok(value)
    }

    fn store<V: Serialize>(&self, key: &CacheKey, value: &V, ttl: Option<Duration>) -> Result<()> {
        let payload = match self.codec.serialize(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    key = %key,
                    codec = self.codec.name(),
                    error = %e,
                    "result not serializable, returning it uncached"
                );
                return Ok(());
            }
        };
        if let Err(e) = self.backend.put(key, payload, ttl) {
            self.tolerate("store", key, e)?;
        }
        Ok(())
    }

    /// Swallows storage faults when degradation is on; anything else surfaces.
    fn tolerate(&self, op: &'static str, key: &CacheKey, err: CacheError) -> Result<()> {
        if self.degrade && err.is_storage_fault() {
            warn!(op, key = %key, error = %err, "cache storage fault, passing through");
            Ok(())
        } else {
            Err(err)
        }
    }
}
