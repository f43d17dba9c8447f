//! TTL cache of flag states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::FlagState;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagStoreStats {
    pub size: usize,
    pub valid_count: usize,
    pub stale_count: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheEntry {
    flag: FlagState,
    fetched_at: Instant,
    expires_at: Instant,
    /// Milliseconds since the store's epoch; written on every fresh read.
    last_accessed_ms: AtomicU64,
}

impl CacheEntry {
    fn new(flag: FlagState, ttl: Duration, epoch: Instant) -> Self {
        let fetched_at = Instant::now();
        Self {
            flag,
            fetched_at,
            expires_at: fetched_at + ttl,
            last_accessed_ms: AtomicU64::new(elapsed_ms(epoch)),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

fn elapsed_ms(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

/// In-memory flag cache with TTL and stale-read support.
///
/// Readers proceed in parallel under a shared lock; writers are exclusive.
/// Expired entries stay readable through [`get_stale`](Self::get_stale) until
/// overwritten, deleted, or evicted. Eviction is FIFO by insertion time
/// (smallest `fetched_at`), not LRU, so churning readers cannot extend the
/// life of stale entries indefinitely.
pub struct FlagStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    max_size: usize,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FlagStore {
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            max_size,
            epoch: Instant::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh read: returns the flag only if present and unexpired.
    ///
    /// Records a hit on success and a miss when the entry is absent or
    /// expired.
    pub fn get(&self, key: &str) -> Option<FlagState> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry
                    .last_accessed_ms
                    .store(elapsed_ms(self.epoch), Ordering::Relaxed);
                tracing::debug!("cache hit: {key}");
                Some(entry.flag.clone())
            }
            Some(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("cache miss (expired): {key}");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stale read: returns the flag regardless of expiry, without touching
    /// the hit/miss counters.
    pub fn get_stale(&self, key: &str) -> Option<FlagState> {
        self.entries.read().get(key).map(|e| e.flag.clone())
    }

    /// Inserts with the store's default TTL.
    pub fn set(&self, key: impl Into<String>, flag: FlagState) {
        self.set_with_ttl(key, flag, self.default_ttl);
    }

    /// Inserts with an explicit TTL instead of the store default.
    pub fn set_with_ttl(&self, key: impl Into<String>, flag: FlagState, ttl: Duration) {
        let key = key.into();
        let mut entries = self.entries.write();

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            Self::evict_oldest(&mut entries);
        }

        tracing::debug!("cache set: {key} (ttl: {ttl:?})");
        entries.insert(key, CacheEntry::new(flag, ttl, self.epoch));
    }

    /// Inserts a batch with the store's default TTL.
    pub fn set_many(&self, flags: Vec<FlagState>) {
        self.set_many_with_ttl(flags, self.default_ttl);
    }

    pub fn set_many_with_ttl(&self, flags: Vec<FlagState>, ttl: Duration) {
        for flag in flags {
            self.set_with_ttl(flag.key.clone(), flag, ttl);
        }
    }

    /// Whether the key is present, fresh or stale.
    pub fn has(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Whether the key is present but expired.
    pub fn is_stale(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .map(|e| e.is_expired())
            .unwrap_or(false)
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            tracing::debug!("cache delete: {key}");
        }
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let size = entries.len();
        entries.clear();
        tracing::debug!("cache cleared: {size} entries");
    }

    /// Replaces the whole flag set in one exclusive section, so readers see
    /// either the old set or the new one, never a mix.
    pub fn replace_all(&self, flags: Vec<FlagState>, ttl: Duration) {
        let mut entries = self.entries.write();
        entries.clear();
        for flag in flags {
            entries.insert(flag.key.clone(), CacheEntry::new(flag, ttl, self.epoch));
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Every stored flag, including stale ones.
    pub fn all(&self) -> Vec<FlagState> {
        self.entries.read().values().map(|e| e.flag.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    pub fn stats(&self) -> FlagStoreStats {
        let entries = self.entries.read();
        let stale_count = entries.values().filter(|e| e.is_expired()).count();

        FlagStoreStats {
            size: entries.len(),
            valid_count: entries.len() - stale_count,
            stale_count,
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.fetched_at)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            tracing::debug!("cache evicted oldest: {key}");
            entries.remove(&key);
        }
    }
}
