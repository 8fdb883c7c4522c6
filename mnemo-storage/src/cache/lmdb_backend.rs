//! LMDB-backed disk tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts.
//!
//! # Transactions
//!
//! - Read transactions for `load_bytes` and `keys`
//! - One write transaction per `save_bytes`, `remove`, and `remove_matching`
//!
//! LMDB serializes writers across the whole environment, so two saves to
//! unrelated keys still queue behind each other.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use mnemo_core::{MnemoError, MnemoResult, StorageError};

use super::key::CacheKey;
use super::traits::{KeyPredicate, RecordBackend};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to MnemoError.
impl From<LmdbStoreError> for MnemoError {
    fn from(e: LmdbStoreError) -> Self {
        MnemoError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

/// Persistent byte store in a single unnamed LMDB database.
pub struct LmdbRecordBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl LmdbRecordBackend {
    /// Open (or create) the store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: each environment directory is opened by exactly one
        // backend per process; callers own the path they hand in.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "opened LMDB record store");

        Ok(Self { env, db })
    }

    /// Iterate over every stored key, returning raw and decoded forms.
    ///
    /// Keys that do not decode (written by a different layout) are kept in
    /// the raw list with `None` so callers can decide whether to drop them.
    fn scan_keys(&self) -> Result<Vec<(Vec<u8>, Option<CacheKey>)>, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            match result {
                Ok((raw, _)) => keys.push((raw.to_vec(), CacheKey::decode(raw))),
                Err(_) => continue,
            }
        }

        Ok(keys)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbStoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key.as_slice())
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}

#[async_trait]
impl RecordBackend for LmdbRecordBackend {
    async fn load_bytes(&self, key: &CacheKey) -> MnemoResult<Option<Vec<u8>>> {
        let encoded_key = key.encode();

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let bytes = self
            .db
            .get(&rtxn, encoded_key.as_slice())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(bytes.map(|b| b.to_vec()))
    }

    async fn save_bytes(&self, key: &CacheKey, bytes: Vec<u8>) -> MnemoResult<()> {
        let encoded_key = key.encode();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, encoded_key.as_slice(), bytes.as_slice())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> MnemoResult<bool> {
        Ok(self.delete_keys(&[key.encode()])? > 0)
    }

    async fn remove_matching(&self, predicate: KeyPredicate<'_>) -> MnemoResult<u64> {
        let doomed: Vec<Vec<u8>> = self
            .scan_keys()?
            .into_iter()
            .filter(|(_, key)| key.as_ref().is_some_and(|k| predicate(k)))
            .map(|(raw, _)| raw)
            .collect();

        Ok(self.delete_keys(&doomed)?)
    }

    async fn keys(&self) -> MnemoResult<Vec<CacheKey>> {
        Ok(self
            .scan_keys()?
            .into_iter()
            .filter_map(|(_, key)| key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::{Collection, EntryKind, RecordId};
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbRecordBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbRecordBackend::open(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn detail_key(id: u64) -> CacheKey {
        CacheKey::detail(Collection::Vocabulary, RecordId::Remote(id))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .save_bytes(&detail_key(1), b"hello".to_vec())
            .await
            .expect("save should succeed");

        let loaded = backend
            .load_bytes(&detail_key(1))
            .await
            .expect("load should succeed");
        assert_eq!(loaded.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        let loaded = backend
            .load_bytes(&detail_key(99))
            .await
            .expect("load should succeed");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .save_bytes(&detail_key(1), vec![1])
            .await
            .expect("save should succeed");
        assert!(backend
            .remove(&detail_key(1))
            .await
            .expect("remove should succeed"));
        assert!(!backend
            .remove(&detail_key(1))
            .await
            .expect("remove should succeed"));
        assert!(backend
            .load_bytes(&detail_key(1))
            .await
            .expect("load should succeed")
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_matching_by_kind() {
        let (backend, _temp_dir) = create_test_backend();

        for id in 0..5 {
            backend
                .save_bytes(&detail_key(id), vec![0])
                .await
                .expect("save should succeed");
        }
        backend
            .save_bytes(&CacheKey::stats(Collection::Vocabulary), vec![0])
            .await
            .expect("save should succeed");
        backend
            .save_bytes(&CacheKey::stats(Collection::KnowledgePoints), vec![0])
            .await
            .expect("save should succeed");

        let removed = backend
            .remove_matching(&|key: &CacheKey| {
                key.collection() == Collection::Vocabulary && key.kind() == EntryKind::Detail
            })
            .await
            .expect("remove_matching should succeed");
        assert_eq!(removed, 5);

        let remaining = backend.keys().await.expect("keys should succeed");
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|k| k.kind() == EntryKind::Stats));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");

        {
            let backend = LmdbRecordBackend::open(temp_dir.path(), 10)
                .expect("backend creation should succeed");
            backend
                .save_bytes(&detail_key(7), b"persisted".to_vec())
                .await
                .expect("save should succeed");
        }

        let reopened =
            LmdbRecordBackend::open(temp_dir.path(), 10).expect("reopen should succeed");
        let loaded = reopened
            .load_bytes(&detail_key(7))
            .await
            .expect("load should succeed");
        assert_eq!(loaded.as_deref(), Some(&b"persisted"[..]));
    }
}
