//! Typed envelope persistence on top of a [`RecordBackend`].
//!
//! # Persisted Layout
//!
//! Values are JSON objects `{schema_version, fetched_at, ttl_ms, payload}`.
//! An entry that fails to decode, or was written under a different
//! [`SCHEMA_VERSION`], is treated as a miss: it is logged, removed, and
//! never surfaced as an error.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mnemo_core::{MnemoResult, StorageError, StoreConfig, Timestamp, SCHEMA_VERSION};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use super::envelope::CachedEnvelope;
use super::key::CacheKey;
use super::lmdb_backend::LmdbRecordBackend;
use super::memory_backend::MemoryRecordBackend;
use super::traits::RecordBackend;

#[derive(Serialize, Deserialize)]
struct PersistedEnvelope<T> {
    schema_version: u32,
    fetched_at: Timestamp,
    ttl_ms: u64,
    payload: T,
}

/// Why a stored entry was thrown away instead of returned.
#[derive(Debug, thiserror::Error)]
enum Discard {
    #[error("schema version {found} does not match {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("undecodable entry: {0}")]
    Undecodable(#[from] serde_json::Error),
}

fn ttl_to_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<CachedEnvelope<T>, Discard> {
    let header: PersistedEnvelope<IgnoredAny> = serde_json::from_slice(bytes)?;
    if header.schema_version != SCHEMA_VERSION {
        return Err(Discard::SchemaMismatch {
            found: header.schema_version,
            expected: SCHEMA_VERSION,
        });
    }
    let persisted: PersistedEnvelope<T> = serde_json::from_slice(bytes)?;
    Ok(CachedEnvelope::stamped(
        persisted.payload,
        persisted.fetched_at,
        Duration::from_millis(persisted.ttl_ms),
    ))
}

/// Disk tier of the cache.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn RecordBackend>) -> Self {
        Self { backend }
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordBackend::new()))
    }

    /// LMDB store under `path`.
    pub fn open_lmdb<P: AsRef<Path>>(path: P, map_size_mb: usize) -> MnemoResult<Self> {
        let backend = LmdbRecordBackend::open(&path, map_size_mb).map_err(|e| {
            StorageError::OpenFailed {
                path: path.as_ref().display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// LMDB when a path is configured, memory otherwise.
    pub fn from_config(config: &StoreConfig) -> MnemoResult<Self> {
        match &config.path {
            Some(path) => Self::open_lmdb(path, config.map_size_mb),
            None => Ok(Self::in_memory()),
        }
    }

    /// Load the envelope stored under `key`.
    ///
    /// Expired envelopes are returned as-is; callers check `is_expired`.
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> MnemoResult<Option<CachedEnvelope<T>>> {
        let Some(bytes) = self.backend.load_bytes(key).await? else {
            return Ok(None);
        };

        match decode::<T>(&bytes) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(reason) => {
                tracing::warn!(key = %key, error = %reason, "discarding cached entry");
                if let Err(e) = self.backend.remove(key).await {
                    tracing::warn!(key = %key, error = %e, "failed to remove discarded entry");
                }
                Ok(None)
            }
        }
    }

    /// Persist `envelope` under `key`, replacing any previous value.
    pub async fn save<T: Serialize + Sync>(
        &self,
        key: &CacheKey,
        envelope: &CachedEnvelope<T>,
    ) -> MnemoResult<()> {
        let persisted = PersistedEnvelope {
            schema_version: SCHEMA_VERSION,
            fetched_at: envelope.fetched_at,
            ttl_ms: ttl_to_millis(envelope.ttl),
            payload: &envelope.payload,
        };
        let bytes = serde_json::to_vec(&persisted).map_err(|e| StorageError::EncodeFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.save_bytes(key, bytes).await
    }

    pub async fn remove(&self, key: &CacheKey) -> MnemoResult<bool> {
        self.backend.remove(key).await
    }

    /// Remove every entry whose key the predicate accepts.
    pub async fn remove_all<F>(&self, predicate: F) -> MnemoResult<u64>
    where
        F: Fn(&CacheKey) -> bool + Send + Sync,
    {
        self.backend.remove_matching(&predicate).await
    }

    /// Drop expired and unreadable entries. Overlay entries are kept.
    pub async fn purge_expired(&self) -> MnemoResult<u64> {
        let now = Utc::now();
        let mut purged = 0u64;

        for key in self.backend.keys().await? {
            if !key.kind().is_disposable() {
                continue;
            }
            let Some(bytes) = self.backend.load_bytes(&key).await? else {
                continue;
            };
            let stale = match decode::<IgnoredAny>(&bytes) {
                Ok(envelope) => envelope.is_expired_at(now),
                Err(_) => true,
            };
            if stale && self.backend.remove(&key).await? {
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::debug!(purged, "purged expired cache entries");
        }
        Ok(purged)
    }

    /// Drop every entry except local overlays.
    pub async fn clear(&self) -> MnemoResult<u64> {
        self.remove_all(|key| key.kind().is_disposable()).await
    }

    pub async fn keys(&self) -> MnemoResult<Vec<CacheKey>> {
        self.backend.keys().await
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}
