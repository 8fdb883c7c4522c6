//! Merge of a server slice with the device's local slice.
//!
//! Field-level precedence is the whole contract: the server owns identity
//! and canonical content, the device owns every field group it has flagged
//! as pending. Everything here is pure.

use std::collections::BTreeMap;

use mnemo_core::{LearningRecord, ListQuery, RecordId, RecordScope, SortKey, SyncState};

/// Where a merged record came from.
///
/// A server record that picked up pending local edits counts as local: it
/// still has something to push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Server,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedEntry {
    pub record: LearningRecord,
    pub origin: Origin,
}

/// Scope and ordering applied after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOptions {
    pub scope: RecordScope,
    pub sort: SortKey,
}

impl MergeOptions {
    pub fn new(scope: RecordScope, sort: SortKey) -> Self {
        Self { scope, sort }
    }
}

impl From<&ListQuery> for MergeOptions {
    fn from(query: &ListQuery) -> Self {
        Self::new(query.scope, query.sort)
    }
}

/// Ordered, duplicate-free combination of server and local records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedCollection {
    entries: Vec<MergedEntry>,
    options: MergeOptions,
}

impl MergedCollection {
    pub fn entries(&self) -> &[MergedEntry] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &LearningRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn into_records(self) -> Vec<LearningRecord> {
        self.entries.into_iter().map(|e| e.record).collect()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.records().map(|r| r.id).collect()
    }

    pub fn get(&self, id: RecordId) -> Option<&LearningRecord> {
        self.records().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn options(&self) -> MergeOptions {
        self.options
    }

    /// Records that came from the server unchanged.
    pub fn server_part(&self) -> Vec<LearningRecord> {
        self.part(Origin::Server)
    }

    /// Local-only records and records carrying local edits.
    pub fn local_part(&self) -> Vec<LearningRecord> {
        self.part(Origin::Local)
    }

    fn part(&self, origin: Origin) -> Vec<LearningRecord> {
        self.entries
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| e.record.clone())
            .collect()
    }
}

/// Apply field-level precedence to one record known on both sides.
///
/// Identity, canonical content, and creation time come from `server`. Every
/// field group flagged pending on `local` comes from `local`, and those
/// flags stay set on the result until a sync clears them.
pub fn reconcile(server: &LearningRecord, local: &LearningRecord) -> LearningRecord {
    let mut merged = server.clone();
    merged.sync_state = SyncState::Synced;
    merged.pending = local.pending;
    if local.has_pending() {
        merged.copy_fields_from(local, local.pending);
        merged.modified_at = server.modified_at.max(local.modified_at);
    }
    merged
}

/// Merge `server` and `local` into one ordered collection.
///
/// 1. Server records are indexed by id.
/// 2. A local record whose id the server also returned is reconciled with
///    it; any other local record is kept as-is.
/// 3. Records outside the requested scope are dropped.
/// 4. The result is ordered by the sort key, ties broken by id ascending.
pub fn merge(
    server: Vec<LearningRecord>,
    local: Vec<LearningRecord>,
    options: MergeOptions,
) -> MergedCollection {
    let mut by_id: BTreeMap<RecordId, MergedEntry> = BTreeMap::new();

    for record in server {
        by_id.insert(
            record.id,
            MergedEntry {
                record,
                origin: Origin::Server,
            },
        );
    }

    for record in local {
        let entry = match by_id.get(&record.id) {
            Some(existing) if existing.origin == Origin::Server => {
                let merged = reconcile(&existing.record, &record);
                let origin = if merged.has_pending() {
                    Origin::Local
                } else {
                    Origin::Server
                };
                MergedEntry {
                    record: merged,
                    origin,
                }
            }
            _ => MergedEntry {
                record,
                origin: Origin::Local,
            },
        };
        by_id.insert(entry.record.id, entry);
    }

    let mut entries: Vec<MergedEntry> = by_id
        .into_values()
        .filter(|e| options.scope.admits(&e.record))
        .collect();

    entries.sort_by(|a, b| {
        options
            .sort
            .compare(&a.record, &b.record)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });

    MergedCollection { entries, options }
}
