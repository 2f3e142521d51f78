//! Disk Store Module
//!
//! Durable backend rooted at `cache_dir`:
//! - `<hex key>.entry` - one file per entry, header + payload
//! - `index.json` - recency order and expiry metadata, MRU first
//! - `.lock` - advisory lock serializing mutations across processes
//!
//! Every file is written to a temp file in the same directory and renamed
//! into place, so readers never see a partial entry or index.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{
    current_timestamp_ms, CacheBackend, CacheEntry, CacheKey, CacheStats, EntryMeta,
    EvictionPolicy,
};
use crate::config::{CacheConfig, SizeUnit};
use crate::error::{CacheError, Result};

// == On-disk Constants ==
const ENTRY_MAGIC: &[u8; 4] = b"YCE1";
/// magic + created_at + expires_at + payload_len + key + checksum
const HEADER_LEN: usize = 4 + 8 + 8 + 8 + CacheKey::LEN + 32;
const NEVER_EXPIRES: u64 = u64::MAX;
const ENTRY_EXT: &str = "entry";
const TEMP_EXT: &str = "tmp";
const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = ".lock";
const INDEX_VERSION: u32 = 1;
/// Temp files older than this belong to writers that died before renaming
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);
/// Buffered recency bumps before the index is rewritten from a read
const TOUCH_FLUSH_THRESHOLD: usize = 1024;

// == Entry File Format ==
fn encode_entry(entry: &CacheEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + entry.payload.len());
    buf.extend_from_slice(ENTRY_MAGIC);
    buf.extend_from_slice(&entry.created_at.to_le_bytes());
    buf.extend_from_slice(&entry.expires_at.unwrap_or(NEVER_EXPIRES).to_le_bytes());
    buf.extend_from_slice(&(entry.payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(entry.key.as_bytes());
    buf.extend_from_slice(&Sha256::digest(&entry.payload));
    buf.extend_from_slice(&entry.payload);
    buf
}

struct EntryHeader {
    created_at: u64,
    expires_at: Option<u64>,
    payload_len: u64,
    key: CacheKey,
    checksum: [u8; 32],
}

impl EntryHeader {
    fn parse(bytes: &[u8], expected: &CacheKey) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::CorruptEntry("truncated header".to_string()));
        }
        if &bytes[..4] != ENTRY_MAGIC {
            return Err(CacheError::CorruptEntry("bad magic".to_string()));
        }
        let mut key = [0u8; CacheKey::LEN];
        key.copy_from_slice(&bytes[28..28 + CacheKey::LEN]);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[60..HEADER_LEN]);

        let expires_raw = read_u64(bytes, 12);
        let header = Self {
            created_at: read_u64(bytes, 4),
            expires_at: (expires_raw != NEVER_EXPIRES).then_some(expires_raw),
            payload_len: read_u64(bytes, 20),
            key: CacheKey::from_bytes(key),
            checksum,
        };
        if header.key != *expected {
            return Err(CacheError::CorruptEntry("key mismatch".to_string()));
        }
        Ok(header)
    }

    fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed: self.created_at,
            size_bytes: self.payload_len,
        }
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn decode_entry(expected: &CacheKey, bytes: &[u8]) -> Result<CacheEntry> {
    let header = EntryHeader::parse(bytes, expected)?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != header.payload_len {
        return Err(CacheError::CorruptEntry(format!(
            "size mismatch: header says {}, found {}",
            header.payload_len,
            payload.len()
        )));
    }
    if Sha256::digest(payload).as_slice() != header.checksum {
        return Err(CacheError::CorruptEntry("checksum mismatch".to_string()));
    }
    Ok(CacheEntry {
        key: header.key,
        payload: payload.to_vec(),
        created_at: header.created_at,
        expires_at: header.expires_at,
        last_accessed: header.created_at,
        size_bytes: header.payload_len,
    })
}

/// Reads only the header of an entry file, checking the file length.
fn read_entry_meta(path: &Path, expected: &CacheKey) -> Result<EntryMeta> {
    let mut file = File::open(path)?;
    let mut head = [0u8; HEADER_LEN];
    if let Err(e) = file.read_exact(&mut head) {
        return Err(match e.kind() {
            io::ErrorKind::UnexpectedEof => CacheError::CorruptEntry("truncated header".to_string()),
            _ => e.into(),
        });
    }
    let header = EntryHeader::parse(&head, expected)?;
    let len = file.metadata()?.len();
    if len != HEADER_LEN as u64 + header.payload_len {
        return Err(CacheError::CorruptEntry("size mismatch".to_string()));
    }
    Ok(header.meta())
}

// == Index File ==
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    generation: u64,
    /// Most recently used first
    entries: Vec<EntryMeta>,
}

/// Identity of the index file on disk; changes whenever any process
/// renames a new index into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexStamp {
    len: u64,
    modified: Option<SystemTime>,
    inode: u64,
}

impl IndexStamp {
    fn of(path: &Path) -> io::Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Self {
                len: meta.len(),
                modified: meta.modified().ok(),
                inode: inode_of(&meta),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> u64 {
    0
}

// == Directory Lock ==
/// Exclusive advisory lock on the cache directory, released on drop.
struct DirLock<'a> {
    file: &'a File,
}

impl<'a> DirLock<'a> {
    fn acquire(file: &'a File, dir: &Path) -> Result<Self> {
        lock_exclusive(file)
            .map_err(|e| CacheError::storage(dir, format!("cannot lock cache directory: {e}")))?;
        Ok(Self { file })
    }
}

impl Drop for DirLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = unlock(self.file) {
            warn!(error = %e, "failed to release cache directory lock");
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    loop {
        // SAFETY: the descriptor is owned by `file`, which outlives the call
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: as above
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

// Other platforms rely on the in-process mutex only.
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

// == Disk State ==
#[derive(Debug)]
struct DiskState {
    policy: EvictionPolicy,
    stats: CacheStats,
    generation: u64,
    stamp: Option<IndexStamp>,
    /// Recency bumps not yet written to the index, oldest first
    pending_touches: Vec<(CacheKey, u64)>,
    dirty: bool,
}

impl DiskState {
    fn replay_touches(&mut self) {
        let touches = std::mem::take(&mut self.pending_touches);
        for (key, at) in &touches {
            self.policy.touch(key, *at);
        }
        self.pending_touches = touches;
    }
}

// == Disk Cache Store ==
/// Persistent cache shared safely between threads and processes.
#[derive(Debug)]
pub struct DiskCacheStore {
    dir: PathBuf,
    lock_file: File,
    state: Mutex<DiskState>,
}

impl DiskCacheStore {
    // == Constructor ==
    /// Opens (or creates) the cache at `config.cache_dir`.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let dir = config.require_cache_dir()?.clone();
        Self::open_with(dir, config.maxsize, config.size_unit)
    }

    /// Opens the cache at `dir`, reconciling the index with the entry files
    /// present and applying `maxsize`.
    pub fn open_with(dir: impl Into<PathBuf>, maxsize: Option<u64>, unit: SizeUnit) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| CacheError::storage(&dir, format!("cannot create directory: {e}")))?;
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| CacheError::storage(&dir, format!("directory not writable: {e}")))?;

        let store = Self {
            dir,
            lock_file,
            state: Mutex::new(DiskState {
                policy: EvictionPolicy::new(maxsize, unit),
                stats: CacheStats::new(maxsize),
                generation: 0,
                stamp: None,
                pending_touches: Vec::new(),
                dirty: false,
            }),
        };

        {
            let mut state = store.state.lock();
            let _lock = DirLock::acquire(&store.lock_file, &store.dir)?;
            store.remove_stale_temps();
            store
                .load(&mut state)
                .and_then(|()| {
                    let now = current_timestamp_ms();
                    let victims = state.policy.shrink(now);
                    store.delete_victims(&mut state, &victims, now);
                    store.persist(&mut state)
                })
                .map_err(|e| match e {
                    CacheError::Io(io) => CacheError::storage(&store.dir, io),
                    other => other,
                })?;
            info!(
                dir = %store.dir.display(),
                entries = state.policy.len(),
                "disk cache opened"
            );
        }

        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.to_hex(), ENTRY_EXT))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    // == File Helpers ==
    /// Writes `bytes` to a fresh temp file in the cache directory and syncs it.
    fn write_temp(&self, stem: &str, bytes: &[u8]) -> Result<PathBuf> {
        let temp = self
            .dir
            .join(format!(".{}.{}.{}", stem, Uuid::new_v4().simple(), TEMP_EXT));
        let written = File::create(&temp).and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(temp)
    }

    /// Renames `temp` over `target`; the temp file is removed on failure.
    fn commit_temp(&self, temp: &Path, target: &Path) -> Result<()> {
        if let Err(e) = fs::rename(temp, target) {
            let _ = fs::remove_file(temp);
            return Err(e.into());
        }
        self.sync_dir();
        Ok(())
    }

    fn sync_dir(&self) {
        #[cfg(unix)]
        if let Err(e) = File::open(&self.dir).and_then(|dir| dir.sync_all()) {
            debug!(error = %e, "directory sync failed");
        }
    }

    /// Deletes an entry file. Ok(false) if it was already gone.
    fn remove_entry_file(&self, key: &CacheKey) -> io::Result<bool> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_entry_keys(&self) -> Result<HashSet<CacheKey>> {
        let mut keys = HashSet::new();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::from_hex)
            {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    fn remove_stale_temps(&self) {
        let Ok(dirents) = fs::read_dir(&self.dir) else {
            return;
        };
        let mut removed = 0usize;
        for dirent in dirents.flatten() {
            let name = dirent.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with('.') || !name.ends_with(TEMP_EXT) {
                continue;
            }
            let stale = dirent
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= STALE_TEMP_AGE);
            if stale && fs::remove_file(dirent.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "removed abandoned temp files");
        }
    }

    // == Index Maintenance ==
    fn read_index(&self) -> Option<IndexFile> {
        let bytes = match fs::read(self.index_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "cannot read cache index, rebuilding");
                return None;
            }
        };
        match serde_json::from_slice::<IndexFile>(&bytes) {
            Ok(index) if index.version == INDEX_VERSION => Some(index),
            Ok(index) => {
                warn!(version = index.version, "unknown cache index version, rebuilding");
                None
            }
            Err(e) => {
                warn!(error = %e, "corrupt cache index, rebuilding");
                None
            }
        }
    }

    /// Rebuilds the in-memory policy from the index and the entry files
    /// actually present. Caller holds the directory lock.
    fn load(&self, state: &mut DiskState) -> Result<()> {
        let present = self.list_entry_keys()?;
        state.policy.clear();

        let mut known = HashSet::new();
        if let Some(index) = self.read_index() {
            state.generation = state.generation.max(index.generation);
            for meta in index.entries {
                if present.contains(&meta.key) && known.insert(meta.key) {
                    state.policy.restore(meta);
                }
            }
        }

        // Files missing from the index are most likely writes whose index
        // update was lost; adopt them as the most recently used.
        let mut adopted = Vec::new();
        for key in present.difference(&known) {
            match read_entry_meta(&self.entry_path(key), key) {
                Ok(meta) => adopted.push(meta),
                Err(CacheError::CorruptEntry(reason)) => {
                    warn!(key = %key, %reason, "removing corrupt cache entry");
                    let _ = self.remove_entry_file(key);
                }
                Err(e) => return Err(e),
            }
        }
        adopted.sort_by_key(|meta| meta.created_at);
        for meta in adopted {
            state.policy.record(meta);
        }

        state.replay_touches();
        state.stamp = IndexStamp::of(&self.index_path())?;
        Ok(())
    }

    /// Reloads the index if another process rewrote it since we last looked.
    /// Caller holds the directory lock.
    fn refresh(&self, state: &mut DiskState) -> Result<()> {
        let stamp = IndexStamp::of(&self.index_path())?;
        if stamp.is_some() && stamp == state.stamp {
            return Ok(());
        }

        match stamp.and_then(|_| self.read_index()) {
            Some(index) => {
                if index.generation != state.generation {
                    debug!(generation = index.generation, "reloading cache index");
                    state.policy.clear();
                    for meta in index.entries {
                        state.policy.restore(meta);
                    }
                    state.generation = index.generation;
                    state.replay_touches();
                }
                state.stamp = stamp;
                Ok(())
            }
            None => self.load(state),
        }
    }

    /// Atomically rewrites the index from the in-memory policy. Caller holds
    /// the directory lock.
    fn persist(&self, state: &mut DiskState) -> Result<()> {
        let index = IndexFile {
            version: INDEX_VERSION,
            generation: state.generation + 1,
            entries: state.policy.iter().copied().collect(),
        };
        let bytes =
            serde_json::to_vec(&index).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let temp = self.write_temp("index", &bytes)?;
        self.commit_temp(&temp, &self.index_path())?;

        state.generation = index.generation;
        state.stamp = IndexStamp::of(&self.index_path())?;
        state.pending_touches.clear();
        state.dirty = false;
        Ok(())
    }

    /// Deletes victim files; races with other evictors are harmless.
    fn delete_victims(&self, state: &mut DiskState, victims: &[EntryMeta], now: u64) {
        for victim in victims {
            if let Err(e) = self.remove_entry_file(&victim.key) {
                warn!(key = %victim.key, error = %e, "failed to delete evicted entry");
            }
            if victim.is_expired_at(now) {
                state.stats.record_expirations(1);
            } else {
                state.stats.record_evictions(1);
            }
        }
        if !victims.is_empty() {
            debug!(count = victims.len(), "disk store evicted entries");
        }
    }

    // == Read Path ==
    fn read_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => decode_entry(key, &bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-reads `key` under the directory lock, deleting it if it is corrupt
    /// or expired. Returns the entry if a valid one is in place.
    fn settle(&self, state: &mut DiskState, key: &CacheKey, now: u64) -> Result<Option<CacheEntry>> {
        match self.read_entry(key) {
            Ok(Some(entry)) if !entry.is_expired_at(now) => Ok(Some(entry)),
            Ok(Some(_)) => {
                debug!(key = %key, "disk entry expired on read");
                self.remove_entry_file(key)?;
                state.policy.remove(key);
                state.stats.record_expirations(1);
                Ok(None)
            }
            Ok(None) => {
                state.policy.remove(key);
                Ok(None)
            }
            Err(CacheError::CorruptEntry(reason)) => {
                warn!(key = %key, %reason, "removing corrupt cache entry");
                self.remove_entry_file(key)?;
                state.policy.remove(key);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Queues the recency bump for a key the policy has just touched.
    fn record_hit(state: &mut DiskState, key: &CacheKey, now: u64, counted: bool) {
        state.pending_touches.push((*key, now));
        state.dirty = true;
        if counted {
            state.stats.record_hit();
        }
    }

    /// Starts tracking `entry` as the most recently used and evicts whatever
    /// no longer fits. Caller holds the directory lock and has just read the
    /// entry file.
    fn adopt(&self, state: &mut DiskState, entry: &CacheEntry, now: u64) -> Result<()> {
        let mut meta = entry.meta();
        meta.last_accessed = now;
        let victims = state.policy.admit(meta, now);
        self.delete_victims(state, &victims, now);
        self.persist(state)
    }

    /// Lock-free file read first; falls back to [`read_locked`](Self::read_locked)
    /// for anything that needs fixing up or that the policy does not track.
    fn read(&self, key: &CacheKey, counted: bool) -> Result<Option<Vec<u8>>> {
        let now = current_timestamp_ms();
        match self.read_entry(key) {
            Ok(Some(entry)) if !entry.is_expired_at(now) => {
                let mut state = self.state.lock();
                if !state.policy.touch(key, now) {
                    // Written by another process, or removed since the read
                    return self.read_locked(&mut state, key, now, counted);
                }
                Self::record_hit(&mut state, key, now, counted);
                if state.pending_touches.len() >= TOUCH_FLUSH_THRESHOLD {
                    if let Err(e) = self.flush_locked(&mut state) {
                        warn!(error = %e, "failed to persist recency index");
                    }
                }
                return Ok(Some(entry.payload));
            }
            Ok(None) => {
                let mut state = self.state.lock();
                if state.policy.remove(key).is_some() {
                    state.dirty = true;
                }
                if counted {
                    state.stats.record_miss();
                }
                return Ok(None);
            }
            // expired or corrupt: settle under the lock
            Ok(Some(_)) | Err(CacheError::CorruptEntry(_)) => {}
            Err(e) => return Err(e),
        }

        let mut state = self.state.lock();
        self.read_locked(&mut state, key, now, counted)
    }

    /// Re-reads `key` under the directory lock, after catching up with
    /// index changes made by other processes.
    fn read_locked(
        &self,
        state: &mut DiskState,
        key: &CacheKey,
        now: u64,
        counted: bool,
    ) -> Result<Option<Vec<u8>>> {
        let _lock = DirLock::acquire(&self.lock_file, &self.dir)?;
        self.refresh(state)?;
        match self.settle(state, key, now)? {
            Some(entry) => {
                if state.policy.touch(key, now) {
                    Self::record_hit(state, key, now, counted);
                } else {
                    self.adopt(state, &entry, now)?;
                    if counted {
                        state.stats.record_hit();
                    }
                }
                Ok(Some(entry.payload))
            }
            None => {
                if counted {
                    state.stats.record_miss();
                }
                self.persist(state)?;
                Ok(None)
            }
        }
    }

    fn flush_locked(&self, state: &mut DiskState) -> Result<()> {
        let _lock = DirLock::acquire(&self.lock_file, &self.dir)?;
        self.refresh(state)?;
        self.persist(state)
    }

    fn commit_put(&self, state: &mut DiskState, temp: &Path, entry: &CacheEntry) -> Result<()> {
        let _lock = DirLock::acquire(&self.lock_file, &self.dir)?;
        self.refresh(state)?;
        self.commit_temp(temp, &self.entry_path(&entry.key))?;

        let now = current_timestamp_ms();
        let victims = state.policy.admit(entry.meta(), now);
        self.delete_victims(state, &victims, now);
        self.persist(state)
    }
}

impl CacheBackend for DiskCacheStore {
    // == Get ==
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.read(key, true)
    }

    fn peek(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.read(key, false)
    }

    // == Put ==
    fn put(&self, key: &CacheKey, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(*key, payload, ttl);
        let temp = self.write_temp(&key.to_hex(), &encode_entry(&entry))?;

        let mut state = self.state.lock();
        let result = self.commit_put(&mut state, &temp, &entry);
        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let mut state = self.state.lock();
        let _lock = DirLock::acquire(&self.lock_file, &self.dir)?;
        self.refresh(&mut state)?;
        let tracked = state.policy.remove(key).is_some();
        let removed = self.remove_entry_file(key)?;
        self.persist(&mut state)?;
        Ok(tracked || removed)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        let _lock = DirLock::acquire(&self.lock_file, &self.dir)?;
        let keys = self.list_entry_keys()?;
        for key in &keys {
            self.remove_entry_file(key)?;
        }
        state.policy.clear();
        self.persist(&mut state)?;
        info!(removed = keys.len(), dir = %self.dir.display(), "disk cache cleared");
        Ok(())
    }

    fn len(&self) -> usize {
        self.state.lock().policy.len()
    }

    // == Sweep ==
    fn sweep_expired(&self) -> Result<usize> {
        let now = current_timestamp_ms();
        let mut state = self.state.lock();
        let _lock = DirLock::acquire(&self.lock_file, &self.dir)?;
        self.refresh(&mut state)?;

        let expired = state.policy.expired(now);
        for key in &expired {
            state.policy.remove(key);
            if let Err(e) = self.remove_entry_file(key) {
                warn!(key = %key, error = %e, "failed to delete expired entry");
            }
        }
        state.stats.record_expirations(expired.len());
        if !expired.is_empty() || state.dirty {
            self.persist(&mut state)?;
        }
        Ok(expired.len())
    }

    fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.set_usage(state.policy.len(), state.policy.total_bytes());
        stats
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.dirty {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }
}

impl Drop for DiskCacheStore {
    fn drop(&mut self) {
        if let Err(e) = CacheBackend::flush(self) {
            warn!(error = %e, dir = %self.dir.display(), "failed to flush cache index on close");
        }
    }
}
