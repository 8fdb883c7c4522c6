//! Mnemo Test Utilities
//!
//! Shared test infrastructure for the Mnemo workspace:
//! - A scriptable in-memory remote source and a static auth provider
//! - Proptest generators for learning records
//! - Fixtures for common repository setups
//! - Assertions on error categories

// Re-export core types for convenience
pub use mnemo_core::{
    AckStatus, Category, Collection, CollectionStats, EntryKind, ErrorCategory, LearningRecord,
    ListQuery, Mastery, MnemoConfig, MnemoError, MnemoResult, Mutation, MutationAck,
    MutationRequest, MutationToken, NewRecord, Operations, PendingFields, RecordContent,
    RecordId, RecordScope, RecordUpdate, RemoteFailure, SortKey, SyncState, Timestamp,
};
pub use mnemo_storage::RecordStore;
pub use mnemo_sync::{AuthProvider, Credential, RemoteResult, RemoteSource, Repository};

use async_trait::async_trait;
use chrono::Utc;
use mnemo_core::AuthError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// ============================================================================
// MOCK REMOTE SOURCE
// ============================================================================

/// How [`MockRemote`] acknowledges mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Echo the request token.
    #[default]
    Echo,
    /// Leave the token out.
    Missing,
    /// Answer with a different token.
    Mismatched,
}

/// Remote operations counted by [`MockRemote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    List,
    Record,
    Stats,
    Taxonomy,
    Mutate,
}

#[derive(Debug)]
struct RemoteState {
    records: HashMap<Collection, BTreeMap<u64, LearningRecord>>,
    taxonomy: HashMap<Collection, Vec<Category>>,
    scripted: VecDeque<RemoteFailure>,
    offline: bool,
    failing_targets: HashMap<RecordId, RemoteFailure>,
    applied: HashMap<MutationToken, Option<LearningRecord>>,
    ack_mode: AckMode,
    next_id: u64,
    accepted: Option<String>,
    supported: Operations,
    delay: Option<Duration>,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            taxonomy: HashMap::new(),
            scripted: VecDeque::new(),
            offline: false,
            failing_targets: HashMap::new(),
            applied: HashMap::new(),
            ack_mode: AckMode::Echo,
            next_id: 10_000,
            accepted: None,
            supported: Operations::all(),
            delay: None,
        }
    }
}

/// In-memory server with scriptable failures.
///
/// Lists honour scope, filters, sort order, and paging the way a real
/// backend would. Every call is counted, and the peak number of concurrent
/// calls is tracked.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>,
    calls: Mutex<HashMap<RemoteCall, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed the server with records; each keeps its own collection.
    pub fn with_records(self, records: impl IntoIterator<Item = LearningRecord>) -> Self {
        for record in records {
            self.insert(record);
        }
        self
    }

    pub fn with_taxonomy(self, collection: Collection, categories: Vec<Category>) -> Self {
        self.state().taxonomy.insert(collection, categories);
        self
    }

    /// Only accept this credential; anything else is `Unauthorized`.
    pub fn accepting(self, token: impl Into<String>) -> Self {
        self.state().accepted = Some(token.into());
        self
    }

    pub fn with_supported_operations(self, operations: Operations) -> Self {
        self.state().supported = operations;
        self
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state().delay = Some(delay);
        self
    }

    pub fn insert(&self, record: LearningRecord) {
        let id = match record.id {
            RecordId::Remote(id) => id,
            RecordId::Local(_) => return,
        };
        self.state()
            .records
            .entry(record.collection)
            .or_default()
            .insert(id, record);
    }

    /// Server copy of a record.
    pub fn record(&self, collection: Collection, id: u64) -> Option<LearningRecord> {
        self.state()
            .records
            .get(&collection)
            .and_then(|records| records.get(&id))
            .cloned()
    }

    pub fn record_count(&self, collection: Collection) -> usize {
        self.state()
            .records
            .get(&collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Fail the next call, whatever it is, with `failure`.
    pub fn fail_next(&self, failure: RemoteFailure) {
        self.state().scripted.push_back(failure);
    }

    /// While offline every call fails with `NoConnectivity`.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Fail every mutation targeting `id`.
    pub fn fail_mutations_for(&self, id: RecordId, failure: RemoteFailure) {
        self.state().failing_targets.insert(id, failure);
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        self.state().ack_mode = mode;
    }

    pub fn calls(&self, call: RemoteCall) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&call)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Count the call, wait out the configured delay, then apply scripted
    /// failures and the credential check.
    async fn begin(
        &self,
        call: RemoteCall,
        credential: Option<&Credential>,
    ) -> RemoteResult<InFlight<'_>> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(call)
            .or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.offline {
            return Err(RemoteFailure::NoConnectivity);
        }
        if let Some(failure) = state.scripted.pop_front() {
            return Err(failure);
        }
        if let (Some(accepted), Some(credential)) = (&state.accepted, credential) {
            if credential.expose() != accepted {
                return Err(RemoteFailure::Unauthorized);
            }
        }
        Ok(guard)
    }

    fn apply_mutation(
        state: &mut RemoteState,
        request: &MutationRequest,
    ) -> RemoteResult<Option<LearningRecord>> {
        let records = state.records.entry(request.collection).or_default();
        match &request.mutation {
            Mutation::Create(draft) => {
                let id = state.next_id;
                state.next_id += 1;
                let mut record = LearningRecord::local(request.collection, draft.clone());
                record.id = RecordId::Remote(id);
                record.sync_state = SyncState::Synced;
                records.insert(id, record.clone());
                Ok(Some(record))
            }
            Mutation::Update { id, update } => {
                let RecordId::Remote(raw) = *id else {
                    return Err(RemoteFailure::ServerError {
                        code: 400,
                        message: format!("unknown id {}", id),
                    });
                };
                let not_found = || RemoteFailure::ServerError {
                    code: 404,
                    message: format!("record {} not found", raw),
                };
                if matches!(update, RecordUpdate::Delete) {
                    return records.remove(&raw).map(|_| None).ok_or_else(not_found);
                }

                let record = records.get_mut(&raw).ok_or_else(not_found)?;
                match update {
                    RecordUpdate::Content {
                        title,
                        body,
                        subject,
                        tags,
                    } => {
                        if let Some(title) = title {
                            record.content.title = title.clone();
                        }
                        if let Some(body) = body {
                            record.content.body = body.clone();
                        }
                        if subject.is_some() {
                            record.content.subject = subject.clone();
                        }
                        if let Some(tags) = tags {
                            record.content.tags = tags.clone();
                        }
                        record.modified_at = Utc::now();
                    }
                    other => {
                        other.stage_on(record).map_err(|e| RemoteFailure::ServerError {
                            code: 422,
                            message: e.to_string(),
                        })?;
                        record.pending = PendingFields::empty();
                    }
                }
                Ok(Some(record.clone()))
            }
        }
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn fetch_list(
        &self,
        collection: Collection,
        query: &ListQuery,
        credential: &Credential,
    ) -> RemoteResult<Vec<LearningRecord>> {
        let _call = self.begin(RemoteCall::List, Some(credential)).await?;

        let mut records: Vec<LearningRecord> = self
            .state()
            .records
            .get(&collection)
            .map(|records| {
                records
                    .values()
                    .filter(|r| query.scope.admits(r) && query.matches_filters(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| query.sort.compare(a, b).then_with(|| a.id.cmp(&b.id)));

        let start = query.page as usize * query.page_size as usize;
        Ok(records
            .into_iter()
            .skip(start)
            .take(query.page_size as usize)
            .collect())
    }

    async fn fetch_record(
        &self,
        collection: Collection,
        id: RecordId,
        credential: &Credential,
    ) -> RemoteResult<Option<LearningRecord>> {
        let _call = self.begin(RemoteCall::Record, Some(credential)).await?;
        Ok(match id {
            RecordId::Remote(raw) => self.record(collection, raw),
            RecordId::Local(_) => None,
        })
    }

    async fn fetch_stats(
        &self,
        collection: Collection,
        credential: &Credential,
    ) -> RemoteResult<CollectionStats> {
        let _call = self.begin(RemoteCall::Stats, Some(credential)).await?;

        let state = self.state();
        let records: Vec<&LearningRecord> = state
            .records
            .get(&collection)
            .map(|records| records.values().collect())
            .unwrap_or_default();
        let total = records.len() as u32;
        let average_mastery = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.mastery.value()).sum::<f64>() / records.len() as f64
        };
        Ok(CollectionStats {
            total,
            archived: records.iter().filter(|r| r.archived).count() as u32,
            mastered: records.iter().filter(|r| r.mastery.is_mastered()).count() as u32,
            total_mistakes: records.iter().map(|r| u64::from(r.mistake_count)).sum(),
            average_mastery,
        })
    }

    async fn fetch_taxonomy(&self, collection: Collection) -> RemoteResult<Vec<Category>> {
        let _call = self.begin(RemoteCall::Taxonomy, None).await?;
        Ok(self
            .state()
            .taxonomy
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn mutate(
        &self,
        request: &MutationRequest,
        credential: &Credential,
    ) -> RemoteResult<MutationAck> {
        let _call = self.begin(RemoteCall::Mutate, Some(credential)).await?;

        let mut state = self.state();
        if let Some(failure) = request
            .target_id()
            .and_then(|id| state.failing_targets.get(&id).cloned())
        {
            return Err(failure);
        }

        let previous = state.applied.get(&request.token).cloned();
        let (status, record) = match previous {
            Some(record) => (AckStatus::AlreadyApplied, record),
            None => {
                let record = Self::apply_mutation(&mut state, request)?;
                state.applied.insert(request.token, record.clone());
                (AckStatus::Applied, record)
            }
        };

        let token = match state.ack_mode {
            AckMode::Echo => Some(request.token),
            AckMode::Missing => None,
            AckMode::Mismatched => Some(MutationToken::new()),
        };
        Ok(MutationAck {
            token,
            status,
            record,
        })
    }

    fn supported_operations(&self) -> Operations {
        self.state().supported
    }
}

// ============================================================================
// MOCK AUTH PROVIDER
// ============================================================================

/// Auth provider holding a fixed credential, optionally refreshable.
#[derive(Debug, Default)]
pub struct StaticAuth {
    current: Mutex<Option<Credential>>,
    refresh_to: Mutex<Option<Credential>>,
    refreshes: AtomicUsize,
}

impl StaticAuth {
    pub fn signed_in(token: impl Into<String>) -> Self {
        Self {
            current: Mutex::new(Some(Credential::new(token))),
            ..Self::default()
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Make `refresh` succeed with `token`. Without this it fails.
    pub fn refreshing_to(self, token: impl Into<String>) -> Self {
        *self.refresh_to.lock().unwrap_or_else(|e| e.into_inner()) = Some(Credential::new(token));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn sign_out(&self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn is_authenticated(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn credential(&self) -> Option<Credential> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn refresh(&self) -> Result<Credential, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let next = self
            .refresh_to
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AuthError::RefreshFailed {
                reason: "refresh token revoked".to_string(),
            })?;
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(next.clone());
        Ok(next)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Mnemo entity types.

    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    /// Generate a timestamp within 2024.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..366 * 24 * 60 * 60).prop_map(|offset| {
            Utc.timestamp_opt(1_704_067_200 + offset, 0)
                .single()
                .unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_mastery() -> impl Strategy<Value = Mastery> {
        (0.0f64..=1.0).prop_map(Mastery::new)
    }

    pub fn arb_pending() -> impl Strategy<Value = PendingFields> {
        (0u8..16).prop_map(PendingFields::from_bits_truncate)
    }

    pub fn arb_sort_key() -> impl Strategy<Value = SortKey> {
        prop_oneof![
            Just(SortKey::ModifiedDesc),
            Just(SortKey::ModifiedAsc),
            Just(SortKey::MasteryAsc),
            Just(SortKey::MistakesDesc),
            Just(SortKey::TitleAsc),
        ]
    }

    pub fn arb_scope() -> impl Strategy<Value = RecordScope> {
        prop_oneof![
            Just(RecordScope::Active),
            Just(RecordScope::Archived),
            Just(RecordScope::Favorite),
        ]
    }

    /// Generate a server record with the given id.
    pub fn arb_server_record(id: u64) -> impl Strategy<Value = LearningRecord> {
        (
            "[a-z]{1,12}",
            arb_mastery(),
            0u32..20,
            any::<bool>(),
            any::<bool>(),
            arb_timestamp(),
        )
            .prop_map(move |(title, mastery, mistakes, archived, favorite, at)| {
                LearningRecord {
                    id: RecordId::Remote(id),
                    collection: Collection::Vocabulary,
                    content: RecordContent {
                        title,
                        body: String::new(),
                        subject: None,
                        tags: Vec::new(),
                    },
                    mastery,
                    mistake_count: mistakes,
                    correct_count: 0,
                    archived,
                    favorite,
                    note: None,
                    created_at: at,
                    modified_at: at,
                    sync_state: SyncState::Synced,
                    pending: PendingFields::empty(),
                }
            })
    }

    /// Generate a server slice with distinct ids drawn from `1..=max_id`.
    pub fn arb_server_slice(max_id: u64) -> impl Strategy<Value = Vec<LearningRecord>> {
        proptest::collection::btree_set(1..=max_id, 0..8).prop_flat_map(|ids| {
            ids.into_iter()
                .map(arb_server_record)
                .collect::<Vec<_>>()
        })
    }

    /// Generate a device slice: edits of ids in `1..=max_id` carrying
    /// pending flags, plus local-only records.
    pub fn arb_local_slice(max_id: u64) -> impl Strategy<Value = Vec<LearningRecord>> {
        let edits = proptest::collection::btree_set(1..=max_id, 0..5).prop_flat_map(|ids| {
            ids.into_iter()
                .map(|id| {
                    (arb_server_record(id), arb_pending()).prop_map(|(mut record, pending)| {
                        record.pending = pending;
                        record
                    })
                })
                .collect::<Vec<_>>()
        });
        let locals = proptest::collection::vec(
            ("[a-z]{1,12}", arb_mastery()).prop_map(|(title, mastery)| {
                let mut draft = NewRecord::new(title, "");
                draft.mastery = mastery;
                LearningRecord::local(Collection::Vocabulary, draft)
            }),
            0..3,
        );
        (edits, locals).prop_map(|(mut edits, locals)| {
            edits.extend(locals);
            edits
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    pub const VALID_TOKEN: &str = "valid-token";

    /// A synced vocabulary record.
    pub fn vocab(id: u64, title: &str, mastery: f64) -> LearningRecord {
        let at = Utc::now() - chrono::Duration::minutes(id as i64);
        LearningRecord {
            id: RecordId::Remote(id),
            collection: Collection::Vocabulary,
            content: RecordContent {
                title: title.to_string(),
                body: format!("meaning of {}", title),
                subject: None,
                tags: Vec::new(),
            },
            mastery: Mastery::new(mastery),
            mistake_count: 0,
            correct_count: 0,
            archived: false,
            favorite: false,
            note: None,
            created_at: at,
            modified_at: at,
            sync_state: SyncState::Synced,
            pending: PendingFields::empty(),
        }
    }

    /// A synced knowledge point in `subject`.
    pub fn knowledge_point(id: u64, title: &str, subject: &str) -> LearningRecord {
        let mut record = vocab(id, title, 0.0);
        record.collection = Collection::KnowledgePoints;
        record.content.subject = Some(subject.to_string());
        record
    }

    pub fn category(id: &str, name: &str, parent_id: Option<&str>) -> Category {
        Category {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            record_count: 0,
        }
    }

    /// Remote pre-seeded with three vocabulary records.
    pub fn seeded_remote() -> MockRemote {
        MockRemote::new().accepting(VALID_TOKEN).with_records([
            vocab(1, "apple", 0.5),
            vocab(2, "banana", 0.2),
            vocab(3, "cherry", 0.9),
        ])
    }

    /// Repository over an in-memory record store with default config.
    pub fn memory_repository(remote: Arc<MockRemote>, auth: Arc<StaticAuth>) -> Repository {
        Repository::new(remote, auth, RecordStore::in_memory(), &MnemoConfig::default())
    }

    /// Repository over `store` with default config.
    pub fn repository_with_store(
        remote: Arc<MockRemote>,
        auth: Arc<StaticAuth>,
        store: RecordStore,
    ) -> Repository {
        Repository::new(remote, auth, store, &MnemoConfig::default())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Mnemo results.

    use super::*;

    #[track_caller]
    pub fn assert_category<T: std::fmt::Debug>(result: &MnemoResult<T>, expected: ErrorCategory) {
        match result {
            Err(err) => assert_eq!(
                err.category(),
                expected,
                "Expected {:?} error, got: {:?}",
                expected,
                err
            ),
            Ok(value) => panic!("Expected {:?} error, got Ok: {:?}", expected, value),
        }
    }

    /// Assert that a result is a classified remote failure.
    #[track_caller]
    pub fn assert_remote_failure<T: std::fmt::Debug>(
        result: &MnemoResult<T>,
        expected: RemoteFailure,
    ) {
        match result {
            Err(MnemoError::Remote(failure)) => assert_eq!(*failure, expected),
            other => panic!("Expected remote failure {:?}, got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &MnemoResult<T>) {
        match result {
            Err(MnemoError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that ids come out in exactly this order.
    #[track_caller]
    pub fn assert_ids<'a>(records: impl IntoIterator<Item = &'a LearningRecord>, expected: &[RecordId]) {
        let ids: Vec<RecordId> = records.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, expected, "record ids out of order");
    }
}
