//! Mnemo Storage - Cache Tiers
//!
//! Memory and disk tiers for the offline-first learning data layer. The
//! repository in `mnemo-sync` decides what goes in them and when.

pub mod cache;

pub use cache::{
    CacheKey, CacheStats, CachedEnvelope, HotCache, KeyPredicate, LmdbRecordBackend,
    LmdbStoreError, Lookup, MemoryRecordBackend, RecordBackend, RecordStore,
};
