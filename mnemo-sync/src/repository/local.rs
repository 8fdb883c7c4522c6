//! The device overlay: local-only records and pending edits.
//!
//! One overlay per collection, persisted as a never-expiring record store
//! entry and mirrored in its own memory tier. Every read-modify-write of an
//! overlay holds that collection's async lock for the whole cycle.

use mnemo_core::{
    Collection, EntryKind, LearningRecord, MnemoError, MnemoResult, Mutation, MutationAck,
    MutationRequest, MutationToken, NewRecord, PendingFields, RecordId, RecordUpdate, SyncState,
    ValidationError,
};
use mnemo_storage::{CacheKey, CachedEnvelope};
use serde::{Deserialize, Serialize};

use super::{Freshness, Repository};
use crate::batch::BatchOutcome;

/// Records the device owns for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub records: Vec<LearningRecord>,
}

impl Overlay {
    pub fn find(&self, id: RecordId) -> Option<&LearningRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn find_mut(&mut self, id: RecordId) -> Option<&mut LearningRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    fn remove(&mut self, id: RecordId) -> Option<LearningRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear `fields` on `id` if the overlay still holds exactly the values
    /// carried by `acknowledged`. A record left with nothing pending leaves
    /// the overlay.
    fn settle(&mut self, id: RecordId, fields: PendingFields, acknowledged: &RecordUpdate) -> bool {
        let Some(record) = self.find_mut(id) else {
            return false;
        };
        if !record.pending.intersects(fields) {
            return false;
        }
        if RecordUpdate::for_pending(record, fields).as_ref() != Some(acknowledged) {
            // edited again since the push; the newer value stays pending
            return false;
        }
        record.pending.remove(fields);
        let done = !record.needs_sync();
        if done {
            self.remove(id);
        }
        true
    }

    /// Retire local record `local_id` after the server created it from
    /// `pushed`.
    ///
    /// A record edited while the create was in flight moves to `server_id`
    /// with the edited groups pending. Without a server id it stays local
    /// and the create is replayed with the same token next time.
    fn settle_create(
        &mut self,
        local_id: RecordId,
        pushed: &NewRecord,
        server_id: Option<RecordId>,
    ) -> Option<RecordId> {
        let changed = changed_since(pushed, self.find(local_id)?);
        if changed.is_empty() {
            self.remove(local_id);
            return None;
        }
        let server_id = server_id?;
        let record = self.find_mut(local_id)?;
        record.id = server_id;
        record.sync_state = SyncState::Synced;
        record.pending = changed;
        Some(server_id)
    }
}

/// Field groups of `record` that no longer match the draft it was created
/// from. Content cannot be staged, so it is not compared.
fn changed_since(draft: &NewRecord, record: &LearningRecord) -> PendingFields {
    let mut changed = PendingFields::empty();
    if record.mastery != draft.mastery
        || record.mistake_count != draft.mistake_count
        || record.correct_count != 0
    {
        changed |= PendingFields::PROGRESS;
    }
    if record.archived {
        changed |= PendingFields::ARCHIVED;
    }
    if record.favorite != draft.favorite {
        changed |= PendingFields::FAVORITE;
    }
    if record.note != draft.note {
        changed |= PendingFields::NOTE;
    }
    changed
}

/// One mutation produced by [`Repository::sync_pending`].
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// Overlay record the change came from.
    pub record_id: RecordId,
    /// Field group being pushed; empty for a create.
    pub fields: PendingFields,
    pub request: MutationRequest,
}

impl PendingChange {
    pub fn is_create(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every change needed to bring `record` up to date on the server.
    fn for_record(record: &LearningRecord) -> Vec<Self> {
        if record.is_local_only() {
            return match record.id {
                RecordId::Local(uuid) => vec![Self {
                    record_id: record.id,
                    fields: PendingFields::empty(),
                    request: MutationRequest::create(
                        record.collection,
                        NewRecord::from_record(record),
                    )
                    .with_token(MutationToken::for_local(uuid)),
                }],
                RecordId::Remote(_) => Vec::new(),
            };
        }

        record
            .pending
            .iter()
            .filter_map(|fields| {
                RecordUpdate::for_pending(record, fields).map(|update| Self {
                    record_id: record.id,
                    fields,
                    request: MutationRequest::update(record.collection, record.id, update),
                })
            })
            .collect()
    }
}

impl Repository {
    /// Current overlay of `collection`.
    pub async fn overlay(&self, collection: Collection) -> MnemoResult<Overlay> {
        self.load_overlay(collection).await
    }

    pub(crate) async fn load_overlay(&self, collection: Collection) -> MnemoResult<Overlay> {
        let key = CacheKey::overlay(collection);
        if let Some(lookup) = self.inner.tiers.overlay.get(&key) {
            return Ok(lookup.payload().clone());
        }

        match self.inner.store.load::<Overlay>(&key).await? {
            Some(envelope) => {
                let overlay = envelope.payload.clone();
                self.inner.tiers.overlay.put(key, envelope);
                Ok(overlay)
            }
            None => Ok(Overlay::default()),
        }
    }

    async fn save_overlay(&self, collection: Collection, overlay: Overlay) -> MnemoResult<()> {
        let key = CacheKey::overlay(collection);
        let envelope = CachedEnvelope::new(overlay, self.ttl(EntryKind::LocalOverlay));
        self.inner.store.save(&key, &envelope).await?;
        self.inner.tiers.overlay.put(key, envelope);
        Ok(())
    }

    /// Load, modify, and persist the overlay under the collection's lock.
    /// Nothing is written when `f` fails.
    async fn with_overlay<R, F>(&self, collection: Collection, f: F) -> MnemoResult<R>
    where
        F: FnOnce(&mut Overlay) -> MnemoResult<R>,
    {
        let _guard = self.inner.overlay_locks.get(collection).lock().await;
        let mut overlay = self.load_overlay(collection).await?;
        let result = f(&mut overlay)?;
        self.save_overlay(collection, overlay).await?;
        Ok(result)
    }

    /// Add a record that exists only on this device until the next sync.
    pub async fn add_local(
        &self,
        collection: Collection,
        draft: NewRecord,
    ) -> MnemoResult<LearningRecord> {
        draft.validate()?;
        let record = LearningRecord::local(collection, draft);
        let added = record.clone();
        self.with_overlay(collection, move |overlay| {
            overlay.records.push(record);
            Ok(())
        })
        .await?;
        tracing::info!(collection = %collection, id = %added.id, "local record added");
        Ok(added)
    }

    /// Apply `update` to the device copy of a record and keep it pending
    /// until [`sync_pending`](Self::sync_pending) pushes it.
    ///
    /// Only progress, review, archive, favorite, and note changes can be
    /// staged. A server record not yet in the overlay is fetched first.
    pub async fn stage_edit(
        &self,
        collection: Collection,
        id: RecordId,
        update: RecordUpdate,
    ) -> MnemoResult<LearningRecord> {
        if update.pending_fields().is_none() {
            return Err(ValidationError::NotStageable {
                operation: format!("{:?}", update.operation()),
            }
            .into());
        }
        update.validate()?;

        let staged = match self.stage_in_overlay(collection, id, &update, None).await? {
            Some(staged) => staged,
            None if id.is_local() => return Err(MnemoError::NotFound { collection, id }),
            None => {
                let server = self.get(collection, id, Freshness::BestEffort).await?.value;
                if server.collection != collection {
                    return Err(ValidationError::CollectionMismatch {
                        id,
                        expected: collection,
                        actual: server.collection,
                    }
                    .into());
                }
                self.stage_in_overlay(collection, id, &update, Some(server))
                    .await?
                    .ok_or(MnemoError::NotFound { collection, id })?
            }
        };

        tracing::debug!(
            collection = %collection,
            id = %id,
            pending = ?staged.pending,
            "local edit staged"
        );
        Ok(staged)
    }

    /// Stage `update` on the overlay copy of `id`, seeding it from `base`
    /// when the overlay has none. `None` when there is nothing to stage on.
    async fn stage_in_overlay(
        &self,
        collection: Collection,
        id: RecordId,
        update: &RecordUpdate,
        base: Option<LearningRecord>,
    ) -> MnemoResult<Option<LearningRecord>> {
        self.with_overlay(collection, |overlay| {
            if overlay.find(id).is_none() {
                match base {
                    Some(server) => overlay.records.push(server),
                    None => return Ok(None),
                }
            }
            let record = overlay
                .find_mut(id)
                .ok_or(MnemoError::NotFound { collection, id })?;
            update.stage_on(record)?;
            Ok(Some(record.clone()))
        })
        .await
    }

    /// Push everything the overlay holds for `collection`.
    ///
    /// Local-only records are created remotely with a token derived from
    /// their surrogate id; each pending field group is sent as an
    /// absolute-value update. Acknowledged groups are cleared and records
    /// with nothing left to push leave the overlay. Failed changes stay
    /// pending for the next call.
    pub async fn sync_pending(
        &self,
        collection: Collection,
    ) -> MnemoResult<BatchOutcome<PendingChange, MutationAck>> {
        let overlay = self.load_overlay(collection).await?;
        let changes: Vec<PendingChange> = overlay
            .records
            .iter()
            .flat_map(PendingChange::for_record)
            .collect();

        let outcome = self
            .inner
            .batch
            .run(changes, |change| self.push_change(collection, change))
            .await;

        tracing::info!(
            collection = %collection,
            pushed = outcome.len(),
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "pending changes synced"
        );
        Ok(outcome)
    }

    async fn push_change(
        &self,
        collection: Collection,
        change: PendingChange,
    ) -> MnemoResult<MutationAck> {
        let pushed = match &change.request.mutation {
            Mutation::Create(draft) => Some(draft.clone()),
            Mutation::Update { .. } => None,
        };
        let ack = self.apply(change.request).await?;

        if let Some(pushed) = pushed {
            let local_id = change.record_id;
            let server_id = ack.record.as_ref().map(|r| r.id);
            let rekeyed = self
                .with_overlay(collection, |overlay| {
                    Ok(overlay.settle_create(local_id, &pushed, server_id))
                })
                .await?;
            if let Some(id) = rekeyed {
                tracing::info!(
                    collection = %collection,
                    local_id = %local_id,
                    id = %id,
                    "record edited during create kept pending"
                );
            }
        }
        Ok(ack)
    }

    /// Clear the pending flags a successful write made obsolete.
    ///
    /// The write already reached the server, so failures here are logged.
    pub(crate) async fn settle_overlay(
        &self,
        collection: Collection,
        id: RecordId,
        update: &RecordUpdate,
    ) {
        match self.load_overlay(collection).await {
            Ok(overlay) if overlay.find(id).is_none() => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(collection = %collection, id = %id, error = %e, "failed to read overlay");
                return;
            }
        }

        let result = self
            .with_overlay(collection, |overlay| {
                Ok(match (update, update.pending_fields()) {
                    (RecordUpdate::Delete, _) => overlay.remove(id).is_some(),
                    (_, Some(fields)) => overlay.settle(id, fields, update),
                    (_, None) => false,
                })
            })
            .await;

        match result {
            Ok(true) => tracing::debug!(collection = %collection, id = %id, "overlay settled"),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                collection = %collection,
                id = %id,
                error = %e,
                "failed to settle overlay after write"
            ),
        }
    }
}
