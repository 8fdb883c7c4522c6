//! Byte-store backend trait for the disk tier, and cache statistics.

use async_trait::async_trait;
use mnemo_core::MnemoResult;

use super::key::CacheKey;

/// Predicate over cache keys, used for bulk removal.
pub type KeyPredicate<'a> = &'a (dyn Fn(&CacheKey) -> bool + Send + Sync);

/// Pluggable byte store behind [`RecordStore`](super::RecordStore).
///
/// Backends only move opaque bytes; envelope encoding, schema checks, and
/// expiry live in the record store. Each call is an independent unit of
/// work: a failure never leaves a partially written key.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Read the bytes stored under `key`.
    async fn load_bytes(&self, key: &CacheKey) -> MnemoResult<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous value.
    async fn save_bytes(&self, key: &CacheKey, bytes: Vec<u8>) -> MnemoResult<()>;

    /// Remove `key`. Returns whether it existed.
    async fn remove(&self, key: &CacheKey) -> MnemoResult<bool>;

    /// Remove every key the predicate accepts. Returns the number removed.
    async fn remove_matching(&self, predicate: KeyPredicate<'_>) -> MnemoResult<u64>;

    /// Every key currently stored.
    async fn keys(&self) -> MnemoResult<Vec<CacheKey>>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
