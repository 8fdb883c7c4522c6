//! Bounded in-memory tier with least-recently-used eviction.

use mnemo_core::EntryKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::envelope::{CachedEnvelope, Lookup};
use super::key::CacheKey;
use super::traits::CacheStats;

struct HotEntry<T> {
    envelope: Arc<CachedEnvelope<T>>,
    /// Tick of the most recent access. Updated under the read lock.
    last_access: AtomicU64,
}

/// Memory tier for one [`EntryKind`].
///
/// Reads only take the shared lock and record recency through an atomic
/// tick, so concurrent readers never block each other. Writes take the
/// exclusive lock for the duration of a map insert or eviction. Nothing in
/// here performs I/O.
///
/// A poisoned lock is recovered rather than reported: every entry in this
/// tier can be re-derived from the disk tier or the remote source.
pub struct HotCache<T> {
    kind: EntryKind,
    capacity: usize,
    entries: RwLock<HashMap<CacheKey, HotEntry<T>>>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T> HotCache<T> {
    /// Create an empty tier holding at most `capacity` entries (minimum 1).
    pub fn new(kind: EntryKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`. Expired entries are returned with `is_expired` set.
    pub fn get(&self, key: &CacheKey) -> Option<Lookup<T>> {
        let entries = self.read();
        match entries.get(key) {
            Some(entry) => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Lookup::new(Arc::clone(&entry.envelope)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace `key`, evicting the least recently used entry when
    /// a new key would exceed capacity.
    pub fn put(&self, key: CacheKey, envelope: CachedEnvelope<T>) {
        let entry = HotEntry {
            envelope: Arc::new(envelope),
            last_access: AtomicU64::new(self.tick()),
        };

        let mut entries = self.write();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(kind = %self.kind, key = %victim, "hot cache eviction");
            }
        }
        entries.insert(key, entry);
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.write().remove(key).is_some()
    }

    /// Remove every entry whose key the predicate accepts.
    pub fn remove_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    pub fn evict_all(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, HotEntry<T>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, HotEntry<T>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for HotCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotCache")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
