//! Mnemo Core - Entity Types
//!
//! Pure data structures for the offline-first learning data layer. All other
//! crates depend on this one. Cache tiers live in `mnemo-storage`, the
//! repository and remote contracts in `mnemo-sync`.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod query;
pub mod record;
pub mod update;

pub use config::{BatchConfig, CacheConfig, MnemoConfig, StoreConfig};
pub use error::{
    AuthError, ConfigError, ErrorCategory, MnemoError, MnemoResult, RemoteFailure, StorageError,
    ValidationError,
};
pub use query::{
    Collection, EntryKind, ListQuery, QueryFingerprint, RecordScope, SortKey, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
pub use record::{
    Category, CollectionStats, LearningRecord, Mastery, PendingFields, RecordContent, RecordId,
    SyncState, MASTERED_THRESHOLD, REVIEW_CORRECT_STEP, REVIEW_INCORRECT_STEP,
};
pub use update::{
    AckStatus, Mutation, MutationAck, MutationRequest, MutationToken, NewRecord, Operations,
    RecordUpdate, ReviewOutcome,
};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Version of the persisted envelope layout. Entries written under any other
/// version are treated as cache misses.
pub const SCHEMA_VERSION: u32 = 1;
