//! Two-tier cache: a bounded memory tier in front of a persistent disk tier.
//!
//! Both tiers are addressed by [`CacheKey`] and hold [`CachedEnvelope`]s,
//! so freshness travels with the payload rather than being recomputed by
//! whoever reads it.
//!
//! # Example
//!
//! ```ignore
//! let hot = HotCache::new(EntryKind::Detail, 512);
//! let store = RecordStore::open_lmdb("/var/lib/app/cache", 64)?;
//!
//! let key = CacheKey::detail(Collection::Vocabulary, RecordId::Remote(42));
//! let envelope = CachedEnvelope::new(record, config.ttl(EntryKind::Detail));
//! store.save(&key, &envelope).await?;
//! hot.put(key.clone(), envelope);
//!
//! if let Some(lookup) = hot.get(&key) {
//!     if lookup.is_expired {
//!         // refresh, but keep lookup around in case the remote is down
//!     }
//! }
//! ```

pub mod envelope;
pub mod hot;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod record_store;
pub mod traits;

pub use envelope::{CachedEnvelope, Lookup};
pub use hot::HotCache;
pub use key::CacheKey;
pub use lmdb_backend::{LmdbRecordBackend, LmdbStoreError};
pub use memory_backend::MemoryRecordBackend;
pub use record_store::RecordStore;
pub use traits::{CacheStats, KeyPredicate, RecordBackend};
