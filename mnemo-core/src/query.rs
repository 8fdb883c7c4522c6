//! Collections, scopes, and list queries

use crate::{LearningRecord, ValidationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Default number of records per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Logical record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Vocabulary,
    KnowledgePoints,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Vocabulary, Collection::KnowledgePoints];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vocabulary => "vocabulary",
            Self::KnowledgePoints => "knowledge_points",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of cached payload.
///
/// Freshness (TTL) and hot-tier capacity are properties of the kind, never
/// of individual records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    List,
    Detail,
    Stats,
    Taxonomy,
    /// Device-side records awaiting sync. Never expires, never invalidated.
    LocalOverlay,
}

impl EntryKind {
    pub const ALL: [EntryKind; 5] = [
        EntryKind::List,
        EntryKind::Detail,
        EntryKind::Stats,
        EntryKind::Taxonomy,
        EntryKind::LocalOverlay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Detail => "detail",
            Self::Stats => "stats",
            Self::Taxonomy => "taxonomy",
            Self::LocalOverlay => "overlay",
        }
    }

    /// Whether entries of this kind are dropped by mutation invalidation,
    /// expiry purges, and sign-out clears.
    pub fn is_disposable(&self) -> bool {
        !matches!(self, Self::LocalOverlay)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named subset of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecordScope {
    #[default]
    Active,
    Archived,
    Favorite,
}

impl RecordScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Favorite => "favorite",
        }
    }

    /// Whether `record` belongs in this scope. Archived records only ever
    /// appear in the archived scope.
    pub fn admits(&self, record: &LearningRecord) -> bool {
        match self {
            Self::Active => !record.archived,
            Self::Archived => record.archived,
            Self::Favorite => record.favorite && !record.archived,
        }
    }
}

/// Sort order for list results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortKey {
    /// Most recently modified first
    #[default]
    ModifiedDesc,
    ModifiedAsc,
    /// Weakest records first
    MasteryAsc,
    MistakesDesc,
    TitleAsc,
}

impl SortKey {
    /// Primary ordering only. Callers break ties by id.
    pub fn compare(&self, a: &LearningRecord, b: &LearningRecord) -> Ordering {
        match self {
            Self::ModifiedDesc => b.modified_at.cmp(&a.modified_at),
            Self::ModifiedAsc => a.modified_at.cmp(&b.modified_at),
            Self::MasteryAsc => a.mastery.value().total_cmp(&b.mastery.value()),
            Self::MistakesDesc => b.mistake_count.cmp(&a.mistake_count),
            Self::TitleAsc => a.content.title.cmp(&b.content.title),
        }
    }
}

/// Parameters of a list read.
///
/// Tags are held in a `BTreeSet` so two queries naming the same tags in a
/// different order fingerprint identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListQuery {
    pub scope: RecordScope,
    pub subject: Option<String>,
    pub tags: BTreeSet<String>,
    pub sort: SortKey,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            scope: RecordScope::Active,
            subject: None,
            tags: BTreeSet::new(),
            sort: SortKey::default(),
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListQuery {
    pub fn new(scope: RecordScope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ValidationError::InvalidValue {
                field: "page_size".to_string(),
                reason: format!("must be between 1 and {}", MAX_PAGE_SIZE),
            });
        }
        Ok(())
    }

    pub fn is_first_page(&self) -> bool {
        self.page == 0
    }

    /// Whether `record` passes the subject/tag filters (scope excluded).
    pub fn matches_filters(&self, record: &LearningRecord) -> bool {
        if let Some(subject) = &self.subject {
            if record.content.subject.as_deref() != Some(subject.as_str()) {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|tag| record.content.tags.iter().any(|t| t == tag))
    }

    /// Fingerprint of everything except the scope, which is keyed separately.
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.subject.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        for tag in &self.tags {
            hasher.update(tag.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xFFu8]);
        hasher.update([sort_discriminant(self.sort)]);
        hasher.update(self.page.to_le_bytes());
        hasher.update(self.page_size.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; QueryFingerprint::LEN];
        bytes.copy_from_slice(&digest[..QueryFingerprint::LEN]);
        QueryFingerprint(bytes)
    }
}

fn sort_discriminant(sort: SortKey) -> u8 {
    match sort {
        SortKey::ModifiedDesc => 0,
        SortKey::ModifiedAsc => 1,
        SortKey::MasteryAsc => 2,
        SortKey::MistakesDesc => 3,
        SortKey::TitleAsc => 4,
    }
}

/// Truncated SHA-256 of a query's parameters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryFingerprint([u8; QueryFingerprint::LEN]);

impl QueryFingerprint {
    pub const LEN: usize = 16;

    /// Fingerprint of a parameterless read (detail, stats, taxonomy).
    pub const EMPTY: QueryFingerprint = QueryFingerprint([0u8; QueryFingerprint::LEN]);

    pub fn from_bytes(bytes: [u8; QueryFingerprint::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; QueryFingerprint::LEN] {
        &self.0
    }
}

impl fmt::Debug for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryFingerprint({})", hex::encode(self.0))
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}
