//! Disk-backed response cache.
//!
//! Layout under the cache directory:
//! - `index.json`: key -> payload file name, store time, insertion sequence and size
//! - `<sha256(key)>.bin`: one payload file per entry
//!
//! Recently read payloads are also kept in a bounded in-memory tier, so a
//! repeated hit skips the file read. The tier only holds keys the index holds
//! and expires with them.
//!
//! The index and the memory tier sit behind one mutex per cache, so two
//! fetches of the same URL cannot interleave their get/evict/put steps. File
//! reads and writes happen while that lock is held; callers on a shared async
//! runtime should expect `get`/`put` to block for the duration of one file
//! operation.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::url::GopherUrl;

const INDEX_FILE: &str = "index.json";
const PAYLOAD_EXT: &str = "bin";
pub const DEFAULT_MEMORY_ENTRIES: usize = 100;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Cache index error: {0}")]
    Index(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub stored_at: SystemTime,
    pub size_bytes: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: HashMap<String, IndexEntry>,
    #[serde(default)]
    next_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    stored_at_ms: u64,
    size_bytes: u64,
    /// Breaks ties between entries stored in the same millisecond.
    #[serde(default)]
    seq: u64,
}

impl CacheIndex {
    fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}

/// Least-recently-used payloads, bounded by entry count.
#[derive(Debug, Default)]
struct MemoryTier {
    capacity: usize,
    entries: HashMap<String, MemoryEntry>,
    clock: u64,
}

#[derive(Debug)]
struct MemoryEntry {
    payload: Vec<u8>,
    last_used: u64,
}

impl MemoryTier {
    fn new(capacity: usize) -> Self {
        MemoryTier {
            capacity,
            ..Default::default()
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = clock;
            entry.payload.clone()
        })
    }

    fn insert(&mut self, key: &str, payload: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        self.clock += 1;
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                payload,
                last_used: self.clock,
            },
        );
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

struct CacheState {
    index: CacheIndex,
    memory: MemoryTier,
}

pub struct ResponseCache {
    dir: PathBuf,
    max_size: u64,
    expiration: Duration,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    /// Open (or create) a cache in `dir`. A corrupt index starts the cache
    /// over empty rather than failing.
    pub fn open(
        dir: impl Into<PathBuf>,
        max_size: u64,
        expiration: Duration,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut index = match fs::read(dir.join(INDEX_FILE)) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!(dir = %dir.display(), error = %e, "Corrupt cache index, starting empty");
                CacheIndex::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => CacheIndex::default(),
            Err(e) => return Err(e.into()),
        };
        let max_seq = index.entries.values().map(|e| e.seq + 1).max().unwrap_or(0);
        index.next_seq = index.next_seq.max(max_seq);

        let cache = ResponseCache {
            dir,
            max_size,
            expiration,
            state: Mutex::new(CacheState {
                index,
                memory: MemoryTier::new(DEFAULT_MEMORY_ENTRIES),
            }),
        };
        cache.remove_orphans();
        debug!(
            dir = %cache.dir.display(),
            entries = cache.len(),
            bytes = cache.total_size(),
            "Opened cache"
        );
        Ok(cache)
    }

    /// Bound the in-memory tier to `entries` payloads; 0 turns it off.
    pub fn with_memory_entries(self, entries: usize) -> Self {
        self.state.lock().memory = MemoryTier::new(entries);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Cached payload for `url`, or `None` when absent, expired or unreadable.
    pub fn get(&self, url: &GopherUrl) -> Option<CacheEntry> {
        self.get_key(&url.cache_key(), now_ms())
    }

    /// Store `payload` for `url`, replacing any previous entry, then evict the
    /// oldest other entries until the total fits in `max_size`.
    pub fn put(&self, url: &GopherUrl, payload: &[u8]) -> Result<(), CacheError> {
        self.put_key(&url.cache_key(), payload, now_ms())
    }

    pub fn remove(&self, url: &GopherUrl) -> bool {
        let mut state = self.state.lock();
        let removed = self.drop_entry(&mut state, &url.cache_key());
        if removed {
            self.persist_or_warn(&state.index);
        }
        removed
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        for entry in state.index.entries.values() {
            remove_file_if_present(&self.dir.join(&entry.file))?;
        }
        state.index.entries.clear();
        state.memory.entries.clear();
        self.save_index(&state.index)
    }

    /// Drop every expired entry; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let mut state = self.state.lock();
        let stale: Vec<String> = state
            .index
            .entries
            .iter()
            .filter(|(_, e)| self.is_stale(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.drop_entry(&mut state, key);
        }
        if !stale.is_empty() {
            self.persist_or_warn(&state.index);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_size(&self) -> u64 {
        self.state.lock().index.total_size()
    }

    /// Payloads currently held in memory.
    pub fn memory_len(&self) -> usize {
        self.state.lock().memory.entries.len()
    }

    fn get_key(&self, key: &str, now: u64) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let entry = state.index.entries.get(key)?.clone();

        if self.is_stale(&entry, now) {
            debug!(key, "Cache entry expired");
            self.drop_entry(&mut state, key);
            self.persist_or_warn(&state.index);
            return None;
        }

        if let Some(payload) = state.memory.get(key) {
            return Some(to_cache_entry(key, &entry, payload));
        }

        match fs::read(self.dir.join(&entry.file)) {
            Ok(payload) if payload.len() as u64 == entry.size_bytes => {
                state.memory.insert(key, payload.clone());
                Some(to_cache_entry(key, &entry, payload))
            }
            Ok(_) => {
                warn!(key, "Cached payload size mismatch, dropping entry");
                self.drop_entry(&mut state, key);
                self.persist_or_warn(&state.index);
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to read cached payload");
                self.drop_entry(&mut state, key);
                self.persist_or_warn(&state.index);
                None
            }
        }
    }

    fn put_key(&self, key: &str, payload: &[u8], stored_at_ms: u64) -> Result<(), CacheError> {
        let size_bytes = payload.len() as u64;
        let mut state = self.state.lock();

        if size_bytes > self.max_size {
            debug!(key, size_bytes, max = self.max_size, "Payload larger than cache, not storing");
            if self.drop_entry(&mut state, key) {
                self.save_index(&state.index)?;
            }
            return Ok(());
        }

        let file = payload_file_name(key);
        write_atomic(&self.dir.join(&file), payload)?;

        let seq = state.index.next_seq;
        state.index.next_seq += 1;
        state.index.entries.insert(
            key.to_string(),
            IndexEntry {
                file,
                stored_at_ms,
                size_bytes,
                seq,
            },
        );
        state.memory.insert(key, payload.to_vec());

        self.evict(&mut state, key);
        self.save_index(&state.index)
    }

    /// Drop entries oldest first, never `keep`, until the total fits.
    fn evict(&self, state: &mut CacheState, keep: &str) {
        let mut total = state.index.total_size();
        if total <= self.max_size {
            return;
        }

        let mut by_age: Vec<(String, u64, u64, u64)> = state
            .index
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != keep)
            .map(|(k, e)| (k.clone(), e.stored_at_ms, e.seq, e.size_bytes))
            .collect();
        by_age.sort_by_key(|(_, stored_at, seq, _)| (*stored_at, *seq));

        for (key, _, _, size) in by_age {
            if total <= self.max_size {
                break;
            }
            debug!(key = %key, size, "Evicting cache entry");
            self.drop_entry(state, &key);
            total -= size;
        }
    }

    fn is_stale(&self, entry: &IndexEntry, now: u64) -> bool {
        u128::from(now.saturating_sub(entry.stored_at_ms)) > self.expiration.as_millis()
    }

    fn drop_entry(&self, state: &mut CacheState, key: &str) -> bool {
        state.memory.remove(key);
        match state.index.entries.remove(key) {
            Some(entry) => {
                if let Err(e) = remove_file_if_present(&self.dir.join(&entry.file)) {
                    warn!(key, error = %e, "Failed to delete cached payload");
                }
                true
            }
            None => false,
        }
    }

    fn save_index(&self, index: &CacheIndex) -> Result<(), CacheError> {
        let raw = serde_json::to_vec(index)?;
        write_atomic(&self.dir.join(INDEX_FILE), &raw)?;
        Ok(())
    }

    fn persist_or_warn(&self, index: &CacheIndex) {
        if let Err(e) = self.save_index(index) {
            warn!(dir = %self.dir.display(), error = %e, "Failed to save cache index");
        }
    }

    /// Payload files the index doesn't know about, left by a crash between
    /// writing a payload and saving the index.
    fn remove_orphans(&self) {
        let state = self.state.lock();
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in read_dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXT) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !state.index.entries.values().any(|e| e.file == name) {
                debug!(file = %name, "Removing orphaned cache payload");
                let _ = fs::remove_file(&path);
            }
        }
    }
}

fn to_cache_entry(key: &str, entry: &IndexEntry, payload: Vec<u8>) -> CacheEntry {
    CacheEntry {
        key: key.to_string(),
        payload,
        stored_at: UNIX_EPOCH + Duration::from_millis(entry.stored_at_ms),
        size_bytes: entry.size_bytes,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn payload_file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{}.{}", hex::encode(hasher.finalize()), PAYLOAD_EXT)
}

fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn write_atomic(final_path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = final_path.with_extension("tmp");
    let result = (|| {
        let mut f = File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
        fs::rename(&tmp, final_path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
