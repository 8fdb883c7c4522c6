//! Learning records and their field groups

use crate::{Collection, NewRecord, ReviewOutcome, Timestamp};
use bitflags::bitflags;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix used in the textual form of device-generated identifiers.
const LOCAL_ID_PREFIX: &str = "local-";

/// Mastery gained by a correct review answer.
pub const REVIEW_CORRECT_STEP: f64 = 0.1;

/// Mastery lost by an incorrect review answer.
pub const REVIEW_INCORRECT_STEP: f64 = 0.2;

/// Mastery at or above which a record counts as mastered.
pub const MASTERED_THRESHOLD: f64 = 0.9;

// ============================================================================
// IDENTITY
// ============================================================================

/// Stable identifier of a learning record.
///
/// Server-assigned ids sort before device surrogates, so merged output that
/// ties on the sort key stays deterministic across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordId {
    /// Identifier assigned by the backend.
    Remote(u64),
    /// Surrogate for a record created on the device and not yet synced.
    Local(Uuid),
}

impl RecordId {
    /// Generate a fresh device surrogate (UUIDv7, creation-time sortable).
    pub fn new_local() -> Self {
        Self::Local(Uuid::now_v7())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "{}", id),
            Self::Local(id) => write!(f, "{}{}", LOCAL_ID_PREFIX, id),
        }
    }
}

impl FromStr for RecordId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(LOCAL_ID_PREFIX) {
            return Uuid::parse_str(rest)
                .map(Self::Local)
                .map_err(|e| format!("invalid local id '{}': {}", s, e));
        }
        s.parse::<u64>()
            .map(Self::Remote)
            .map_err(|e| format!("invalid record id '{}': {}", s, e))
    }
}

// ============================================================================
// MASTERY
// ============================================================================

/// Learning progress in `[0.0, 1.0]`.
///
/// Every constructor clamps, so an out-of-range value can never be stored.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Mastery(f64);

impl Mastery {
    pub const MIN: Mastery = Mastery(0.0);
    pub const MAX: Mastery = Mastery(1.0);

    /// Clamp `value` into range. NaN maps to zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Like [`Mastery::new`] but rejects NaN instead of mapping it.
    pub fn try_new(value: f64) -> Option<Self> {
        if value.is_nan() {
            None
        } else {
            Some(Self::new(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn adjust(self, delta: f64) -> Self {
        Self::new(self.0 + delta)
    }

    pub fn is_mastered(&self) -> bool {
        self.0 >= MASTERED_THRESHOLD
    }
}

impl From<f64> for Mastery {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Mastery> for f64 {
    fn from(value: Mastery) -> Self {
        value.0
    }
}

// ============================================================================
// PENDING EDITS
// ============================================================================

bitflags! {
    /// Field groups carrying a local edit the server has not acknowledged.
    ///
    /// While a group is flagged, the device copy is authoritative for it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PendingFields: u8 {
        /// mastery, mistake_count, correct_count
        const PROGRESS = 0b0000_0001;
        /// archived
        const ARCHIVED = 0b0000_0010;
        /// favorite
        const FAVORITE = 0b0000_0100;
        /// note
        const NOTE = 0b0000_1000;
    }
}

impl Default for PendingFields {
    fn default() -> Self {
        Self::empty()
    }
}

// Manual serde implementation for PendingFields (bitflags 2.x + serde)
impl Serialize for PendingFields {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PendingFields {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

/// Whether the server has ever acknowledged a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncState {
    #[default]
    Synced,
    LocalOnly,
}

// ============================================================================
// RECORD
// ============================================================================

/// Canonical content of a record. The server owns every field here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordContent {
    /// Vocabulary term or knowledge point title
    pub title: String,
    /// Definition, explanation, or the recorded mistake
    pub body: String,
    pub subject: Option<String>,
    pub tags: Vec<String>,
}

/// A vocabulary entry or knowledge point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub id: RecordId,
    pub collection: Collection,
    pub content: RecordContent,
    pub mastery: Mastery,
    pub mistake_count: u32,
    pub correct_count: u32,
    pub archived: bool,
    pub favorite: bool,
    pub note: Option<String>,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    #[serde(default)]
    pub sync_state: SyncState,
    #[serde(default)]
    pub pending: PendingFields,
}

impl LearningRecord {
    /// Build a device-only record from a draft, with a fresh surrogate id.
    pub fn local(collection: Collection, draft: NewRecord) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new_local(),
            collection,
            content: draft.content,
            mastery: draft.mastery,
            mistake_count: draft.mistake_count,
            correct_count: 0,
            archived: false,
            favorite: draft.favorite,
            note: draft.note,
            created_at: now,
            modified_at: now,
            sync_state: SyncState::LocalOnly,
            pending: PendingFields::empty(),
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.sync_state == SyncState::LocalOnly
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Needs to be pushed by the next sync.
    pub fn needs_sync(&self) -> bool {
        self.is_local_only() || self.has_pending()
    }

    /// Record a review answer against the local copy.
    pub fn apply_review(&mut self, outcome: ReviewOutcome) {
        match outcome {
            ReviewOutcome::Correct => {
                self.correct_count = self.correct_count.saturating_add(1);
                self.mastery = self.mastery.adjust(REVIEW_CORRECT_STEP);
            }
            ReviewOutcome::Incorrect => {
                self.mistake_count = self.mistake_count.saturating_add(1);
                self.mastery = self.mastery.adjust(-REVIEW_INCORRECT_STEP);
            }
        }
    }

    /// Copy the field groups in `fields` from `other` onto `self`.
    pub fn copy_fields_from(&mut self, other: &LearningRecord, fields: PendingFields) {
        if fields.contains(PendingFields::PROGRESS) {
            self.mastery = other.mastery;
            self.mistake_count = other.mistake_count;
            self.correct_count = other.correct_count;
        }
        if fields.contains(PendingFields::ARCHIVED) {
            self.archived = other.archived;
        }
        if fields.contains(PendingFields::FAVORITE) {
            self.favorite = other.favorite;
        }
        if fields.contains(PendingFields::NOTE) {
            self.note = other.note.clone();
        }
    }
}

// ============================================================================
// AGGREGATES
// ============================================================================

/// Server-computed summary of a collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub total: u32,
    pub archived: u32,
    pub mastered: u32,
    pub total_mistakes: u64,
    pub average_mastery: f64,
}

/// Classification node (subject, chapter, word list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub record_count: u32,
}
