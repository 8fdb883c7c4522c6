//! Composite cache keys shared by the memory and disk tiers.
//!
//! A `CacheKey` names one cached payload: which collection it belongs to,
//! what kind of payload it is, the scope or record identifier it covers,
//! and the fingerprint of the query parameters that produced it.

use mnemo_core::{Collection, EntryKind, ListQuery, QueryFingerprint, RecordId};
use std::fmt;

/// Separator byte between variable-length key parts. Never valid in UTF-8.
const SEPARATOR: u8 = 0xFF;

/// Scope used for the per-collection singletons (stats, taxonomy).
const WHOLE_COLLECTION: &str = "all";

/// Scope of the per-collection overlay entry.
const OVERLAY_SCOPE: &str = "pending";

/// Address of a cached payload.
///
/// # Binary Format
///
/// - Byte 0: collection discriminant
/// - Byte 1: entry kind discriminant
/// - Byte 2: separator (0xFF)
/// - Bytes 3..n-17: scope (UTF-8)
/// - Byte n-17: separator (0xFF)
/// - Bytes n-16..n: query fingerprint
///
/// Collection and kind lead the key so that prefix scans cover a whole
/// collection or one kind within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    collection: Collection,
    kind: EntryKind,
    scope: String,
    fingerprint: QueryFingerprint,
}

impl CacheKey {
    pub fn new(
        collection: Collection,
        kind: EntryKind,
        scope: impl Into<String>,
        fingerprint: QueryFingerprint,
    ) -> Self {
        Self {
            collection,
            kind,
            scope: scope.into(),
            fingerprint,
        }
    }

    /// Key of one page of a scoped list read.
    pub fn list(collection: Collection, query: &ListQuery) -> Self {
        Self::new(
            collection,
            EntryKind::List,
            query.scope.as_str(),
            query.fingerprint(),
        )
    }

    pub fn detail(collection: Collection, id: RecordId) -> Self {
        Self::new(
            collection,
            EntryKind::Detail,
            id.to_string(),
            QueryFingerprint::EMPTY,
        )
    }

    pub fn stats(collection: Collection) -> Self {
        Self::new(
            collection,
            EntryKind::Stats,
            WHOLE_COLLECTION,
            QueryFingerprint::EMPTY,
        )
    }

    pub fn taxonomy(collection: Collection) -> Self {
        Self::new(
            collection,
            EntryKind::Taxonomy,
            WHOLE_COLLECTION,
            QueryFingerprint::EMPTY,
        )
    }

    pub fn overlay(collection: Collection) -> Self {
        Self::new(
            collection,
            EntryKind::LocalOverlay,
            OVERLAY_SCOPE,
            QueryFingerprint::EMPTY,
        )
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn fingerprint(&self) -> QueryFingerprint {
        self.fingerprint
    }

    /// Encode for the disk tier.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.scope.len() + QueryFingerprint::LEN);
        bytes.push(collection_to_byte(self.collection));
        bytes.push(kind_to_byte(self.kind));
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.scope.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.fingerprint.as_bytes());
        bytes
    }

    /// Decode a key written by [`CacheKey::encode`].
    ///
    /// Returns `None` for truncated input, misplaced separators, unknown
    /// discriminants, or a scope that is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let min_len = 4 + QueryFingerprint::LEN;
        if bytes.len() < min_len || bytes[2] != SEPARATOR {
            return None;
        }
        let tail = bytes.len() - QueryFingerprint::LEN;
        if bytes[tail - 1] != SEPARATOR {
            return None;
        }

        let collection = byte_to_collection(bytes[0])?;
        let kind = byte_to_kind(bytes[1])?;
        let scope = std::str::from_utf8(&bytes[3..tail - 1]).ok()?;

        let mut fingerprint = [0u8; QueryFingerprint::LEN];
        fingerprint.copy_from_slice(&bytes[tail..]);

        Some(Self {
            collection,
            kind,
            scope: scope.to_string(),
            fingerprint: QueryFingerprint::from_bytes(fingerprint),
        })
    }

    /// Prefix shared by every key of a collection.
    pub fn collection_prefix(collection: Collection) -> [u8; 1] {
        [collection_to_byte(collection)]
    }

    /// Prefix shared by every key of one kind within a collection.
    pub fn collection_kind_prefix(collection: Collection, kind: EntryKind) -> [u8; 3] {
        [collection_to_byte(collection), kind_to_byte(kind), SEPARATOR]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.collection, self.kind, self.scope, self.fingerprint
        )
    }
}

fn collection_to_byte(collection: Collection) -> u8 {
    match collection {
        Collection::Vocabulary => 0,
        Collection::KnowledgePoints => 1,
    }
}

fn byte_to_collection(byte: u8) -> Option<Collection> {
    match byte {
        0 => Some(Collection::Vocabulary),
        1 => Some(Collection::KnowledgePoints),
        _ => None,
    }
}

fn kind_to_byte(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::List => 0,
        EntryKind::Detail => 1,
        EntryKind::Stats => 2,
        EntryKind::Taxonomy => 3,
        EntryKind::LocalOverlay => 4,
    }
}

fn byte_to_kind(byte: u8) -> Option<EntryKind> {
    match byte {
        0 => Some(EntryKind::List),
        1 => Some(EntryKind::Detail),
        2 => Some(EntryKind::Stats),
        3 => Some(EntryKind::Taxonomy),
        4 => Some(EntryKind::LocalOverlay),
        _ => None,
    }
}
