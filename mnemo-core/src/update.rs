//! Closed set of mutation requests
//!
//! Each variant carries only the fields its group may change, and every
//! request is validated before any I/O.

use crate::{Collection, LearningRecord, Mastery, PendingFields, RecordContent, RecordId, ValidationError};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_BODY_LEN: usize = 10_000;
pub const MAX_NOTE_LEN: usize = 2_000;
pub const MAX_TAGS: usize = 20;

bitflags! {
    /// Remote operations, used as a capability set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Operations: u16 {
        const CREATE = 0b0000_0001;
        const EDIT_CONTENT = 0b0000_0010;
        const PROGRESS = 0b0000_0100;
        const REVIEW = 0b0000_1000;
        const ARCHIVE = 0b0001_0000;
        const FAVORITE = 0b0010_0000;
        const NOTE = 0b0100_0000;
        const DELETE = 0b1000_0000;
    }
}

impl Default for Operations {
    fn default() -> Self {
        Self::all()
    }
}

/// Answer given during a review session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewOutcome {
    Correct,
    Incorrect,
}

/// Draft of a record that does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub content: RecordContent,
    pub mastery: Mastery,
    pub mistake_count: u32,
    pub favorite: bool,
    pub note: Option<String>,
}

impl NewRecord {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            content: RecordContent {
                title: title.into(),
                body: body.into(),
                subject: None,
                tags: Vec::new(),
            },
            mastery: Mastery::MIN,
            mistake_count: 0,
            favorite: false,
            note: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.content.subject = Some(subject.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Draft that recreates `record` on the server.
    pub fn from_record(record: &LearningRecord) -> Self {
        Self {
            content: record.content.clone(),
            mastery: record.mastery,
            mistake_count: record.mistake_count,
            favorite: record.favorite,
            note: record.note.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.content.title)?;
        validate_len("body", &self.content.body, MAX_BODY_LEN)?;
        validate_tags(&self.content.tags)?;
        if let Some(note) = &self.note {
            validate_len("note", note, MAX_NOTE_LEN)?;
        }
        Ok(())
    }
}

/// Change to one field group of an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordUpdate {
    /// Canonical content; only the server can apply it.
    Content {
        title: Option<String>,
        body: Option<String>,
        subject: Option<String>,
        tags: Option<Vec<String>>,
    },
    /// Absolute progress values. Mastery is clamped on write.
    Progress {
        mastery: f64,
        mistake_count: u32,
        correct_count: u32,
    },
    Review { outcome: ReviewOutcome },
    Archive { archived: bool },
    Favorite { favorite: bool },
    Note { note: Option<String> },
    Delete,
}

impl RecordUpdate {
    /// Capability this update needs from the remote source.
    pub fn operation(&self) -> Operations {
        match self {
            Self::Content { .. } => Operations::EDIT_CONTENT,
            Self::Progress { .. } => Operations::PROGRESS,
            Self::Review { .. } => Operations::REVIEW,
            Self::Archive { .. } => Operations::ARCHIVE,
            Self::Favorite { .. } => Operations::FAVORITE,
            Self::Note { .. } => Operations::NOTE,
            Self::Delete => Operations::DELETE,
        }
    }

    /// Field group this update touches when staged on the device.
    /// `None` for updates the device may not own.
    pub fn pending_fields(&self) -> Option<PendingFields> {
        match self {
            Self::Progress { .. } | Self::Review { .. } => Some(PendingFields::PROGRESS),
            Self::Archive { .. } => Some(PendingFields::ARCHIVED),
            Self::Favorite { .. } => Some(PendingFields::FAVORITE),
            Self::Note { .. } => Some(PendingFields::NOTE),
            Self::Content { .. } | Self::Delete => None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Content {
                title,
                body,
                subject: _,
                tags,
            } => {
                if title.is_none() && body.is_none() && tags.is_none() {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: "content".to_string(),
                    });
                }
                if let Some(title) = title {
                    validate_title(title)?;
                }
                if let Some(body) = body {
                    validate_len("body", body, MAX_BODY_LEN)?;
                }
                if let Some(tags) = tags {
                    validate_tags(tags)?;
                }
                Ok(())
            }
            Self::Progress { mastery, .. } => {
                if Mastery::try_new(*mastery).is_none() {
                    return Err(ValidationError::InvalidValue {
                        field: "mastery".to_string(),
                        reason: "must be a number".to_string(),
                    });
                }
                Ok(())
            }
            Self::Note { note: Some(note) } => validate_len("note", note, MAX_NOTE_LEN),
            _ => Ok(()),
        }
    }

    /// Apply this update to a device copy and flag the group as pending.
    pub fn stage_on(&self, record: &mut LearningRecord) -> Result<(), ValidationError> {
        let fields = self
            .pending_fields()
            .ok_or_else(|| ValidationError::NotStageable {
                operation: format!("{:?}", self.operation()),
            })?;
        self.validate()?;
        match self {
            Self::Progress {
                mastery,
                mistake_count,
                correct_count,
            } => {
                record.mastery = Mastery::new(*mastery);
                record.mistake_count = *mistake_count;
                record.correct_count = *correct_count;
            }
            Self::Review { outcome } => record.apply_review(*outcome),
            Self::Archive { archived } => record.archived = *archived,
            Self::Favorite { favorite } => record.favorite = *favorite,
            Self::Note { note } => record.note = note.clone(),
            // rejected by pending_fields() above
            Self::Content { .. } | Self::Delete => {}
        }
        if !record.is_local_only() {
            record.pending |= fields;
        }
        record.modified_at = chrono::Utc::now();
        Ok(())
    }

    /// Absolute-value update that pushes `fields` of `record` to the server.
    pub fn for_pending(record: &LearningRecord, fields: PendingFields) -> Option<Self> {
        if fields == PendingFields::PROGRESS {
            Some(Self::Progress {
                mastery: record.mastery.value(),
                mistake_count: record.mistake_count,
                correct_count: record.correct_count,
            })
        } else if fields == PendingFields::ARCHIVED {
            Some(Self::Archive {
                archived: record.archived,
            })
        } else if fields == PendingFields::FAVORITE {
            Some(Self::Favorite {
                favorite: record.favorite,
            })
        } else if fields == PendingFields::NOTE {
            Some(Self::Note {
                note: record.note.clone(),
            })
        } else {
            None
        }
    }
}

/// Idempotency token echoed back by the server in its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationToken(Uuid);

impl MutationToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Token for creating a device record remotely. Reusing the surrogate id
    /// makes a retried create recognisable by the server.
    pub fn for_local(id: Uuid) -> Self {
        Self(id)
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MutationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Create(NewRecord),
    Update { id: RecordId, update: RecordUpdate },
}

/// One write against the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub token: MutationToken,
    pub collection: Collection,
    pub mutation: Mutation,
}

impl MutationRequest {
    pub fn create(collection: Collection, draft: NewRecord) -> Self {
        Self {
            token: MutationToken::new(),
            collection,
            mutation: Mutation::Create(draft),
        }
    }

    pub fn update(collection: Collection, id: RecordId, update: RecordUpdate) -> Self {
        Self {
            token: MutationToken::new(),
            collection,
            mutation: Mutation::Update { id, update },
        }
    }

    pub fn with_token(mut self, token: MutationToken) -> Self {
        self.token = token;
        self
    }

    pub fn operation(&self) -> Operations {
        match &self.mutation {
            Mutation::Create(_) => Operations::CREATE,
            Mutation::Update { update, .. } => update.operation(),
        }
    }

    pub fn target_id(&self) -> Option<RecordId> {
        match &self.mutation {
            Mutation::Create(_) => None,
            Mutation::Update { id, .. } => Some(*id),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.mutation {
            Mutation::Create(draft) => draft.validate(),
            Mutation::Update { id, update } => {
                if id.is_local() {
                    return Err(ValidationError::InvalidValue {
                        field: "id".to_string(),
                        reason: format!("{} has not been synced yet", id),
                    });
                }
                update.validate()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    Applied,
    /// The server had already applied this token.
    AlreadyApplied,
}

/// Server acknowledgement of a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationAck {
    pub token: Option<MutationToken>,
    pub status: AckStatus,
    /// Server copy after the mutation, when the endpoint returns one.
    pub record: Option<LearningRecord>,
}

impl MutationAck {
    pub fn applied(token: MutationToken, record: Option<LearningRecord>) -> Self {
        Self {
            token: Some(token),
            status: AckStatus::Applied,
            record,
        }
    }

    /// True only when the response proves it answers `token`.
    pub fn confirms(&self, token: &MutationToken) -> bool {
        self.token.as_ref() == Some(token)
    }
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        });
    }
    validate_len("title", title, MAX_TITLE_LEN)
}

fn validate_len(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::InvalidValue {
            field: "tags".to_string(),
            reason: format!("at most {} tags allowed", MAX_TAGS),
        });
    }
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(ValidationError::InvalidValue {
            field: "tags".to_string(),
            reason: "tags must not be blank".to_string(),
        });
    }
    Ok(())
}
