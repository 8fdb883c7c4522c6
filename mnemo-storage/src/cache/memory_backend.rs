//! In-process byte store for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use mnemo_core::{MnemoResult, StorageError};

use super::key::CacheKey;
use super::traits::{KeyPredicate, RecordBackend};

/// Disk-tier stand-in that keeps everything in a map. Contents are lost when
/// the backend is dropped.
#[derive(Debug, Default)]
pub struct MemoryRecordBackend {
    entries: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryRecordBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordBackend for MemoryRecordBackend {
    async fn load_bytes(&self, key: &CacheKey) -> MnemoResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn save_bytes(&self, key: &CacheKey, bytes: Vec<u8>) -> MnemoResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.clone(), bytes);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> MnemoResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn remove_matching(&self, predicate: KeyPredicate<'_>) -> MnemoResult<u64> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        Ok((before - entries.len()) as u64)
    }

    async fn keys(&self) -> MnemoResult<Vec<CacheKey>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.keys().cloned().collect())
    }
}
