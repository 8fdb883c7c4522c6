//! Repository behaviour against a scripted remote source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mnemo_core::{
    Collection, EntryKind, ErrorCategory, ListQuery, MnemoConfig, MnemoError, MnemoResult,
    NewRecord, Operations, PendingFields, RecordId, RecordScope, RecordUpdate, RemoteFailure,
    ReviewOutcome,
};
use mnemo_storage::{
    CacheKey, CachedEnvelope, KeyPredicate, MemoryRecordBackend, RecordBackend, RecordStore,
};
use mnemo_sync::{Freshness, ReadSource, Repository};
use mnemo_test_utils::assertions::{assert_category, assert_ids, assert_remote_failure};
use mnemo_test_utils::fixtures::{
    category, memory_repository, repository_with_store, seeded_remote, vocab, VALID_TOKEN,
};
use mnemo_test_utils::{AckMode, MockRemote, RemoteCall, StaticAuth};
use tempfile::TempDir;

const VOCAB: Collection = Collection::Vocabulary;

fn setup() -> (Arc<MockRemote>, Arc<StaticAuth>, Repository) {
    let remote = seeded_remote().shared();
    let auth = StaticAuth::signed_in(VALID_TOKEN).shared();
    let repo = memory_repository(remote.clone(), auth.clone());
    (remote, auth, repo)
}

// ============================================================================
// READ-THROUGH
// ============================================================================

#[tokio::test]
async fn test_list_reads_through_then_hits_hot_tier() {
    let (remote, _auth, repo) = setup();
    let query = ListQuery::default();

    let first = repo
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("first list should succeed");
    assert_eq!(first.source, ReadSource::Remote);
    assert!(!first.is_stale());
    assert_ids(
        &first.value,
        &[RecordId::Remote(1), RecordId::Remote(2), RecordId::Remote(3)],
    );

    let second = repo
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("second list should succeed");
    assert_eq!(second.source, ReadSource::Hot);
    assert_eq!(second.value, first.value);
    assert_eq!(remote.calls(RemoteCall::List), 1);
    assert_eq!(repo.hot_stats(EntryKind::List).hits, 1);
}

#[tokio::test]
async fn test_disk_hit_is_promoted_to_hot_tier() {
    let remote = seeded_remote().shared();
    let auth = StaticAuth::signed_in(VALID_TOKEN).shared();
    let store = RecordStore::in_memory();
    let query = ListQuery::default();

    let warm = repository_with_store(remote.clone(), auth.clone(), store.clone());
    warm.list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("warm-up list should succeed");

    // fresh hot tier over the same disk tier
    let cold = repository_with_store(remote.clone(), auth, store);
    let from_disk = cold
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("disk read should succeed");
    assert_eq!(from_disk.source, ReadSource::Disk);

    let from_hot = cold
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("hot read should succeed");
    assert_eq!(from_hot.source, ReadSource::Hot);
    assert_eq!(remote.calls(RemoteCall::List), 1);
}

#[tokio::test]
async fn test_refresh_skips_fresh_cache() {
    let (remote, _auth, repo) = setup();
    repo.stats(VOCAB, Freshness::BestEffort)
        .await
        .expect("stats should succeed");

    let refreshed = repo
        .stats(VOCAB, Freshness::Refresh)
        .await
        .expect("refresh should succeed");
    assert_eq!(refreshed.source, ReadSource::Remote);
    assert_eq!(refreshed.value.total, 3);
    assert_eq!(remote.calls(RemoteCall::Stats), 2);
}

#[tokio::test]
async fn test_max_age_accepts_expired_entry() {
    let (remote, _auth, repo) = setup();
    let key = CacheKey::stats(VOCAB);
    let old = CachedEnvelope::stamped(
        mnemo_core::CollectionStats {
            total: 42,
            ..Default::default()
        },
        Utc::now() - chrono::Duration::minutes(10),
        Duration::from_secs(60),
    );
    repo.store().save(&key, &old).await.expect("seed should succeed");

    let fetched = repo
        .stats(VOCAB, Freshness::max_age(Duration::from_secs(3600)))
        .await
        .expect("stats should succeed");
    assert_eq!(fetched.source, ReadSource::Disk);
    assert!(fetched.is_expired);
    assert_eq!(fetched.value.total, 42);
    assert_eq!(remote.calls(RemoteCall::Stats), 0);
}

// ============================================================================
// DEGRADE TO STALE
// ============================================================================

#[tokio::test]
async fn test_offline_serves_expired_cache_with_advisory() {
    let (remote, _auth, repo) = setup();
    let query = ListQuery::default();
    let key = CacheKey::list(VOCAB, &query);
    let expired = CachedEnvelope::stamped(
        vec![vocab(1, "apple", 0.5)],
        Utc::now() - chrono::Duration::hours(1),
        Duration::from_secs(60),
    );
    repo.store()
        .save(&key, &expired)
        .await
        .expect("seed should succeed");

    remote.set_offline(true);
    let fetched = repo
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("stale read should succeed");

    assert_eq!(fetched.advisory, Some(RemoteFailure::NoConnectivity));
    assert!(fetched.is_expired);
    assert!(fetched.is_stale());
    assert_eq!(fetched.value.len(), 1);
    assert_eq!(remote.calls(RemoteCall::List), 1);
}

#[tokio::test]
async fn test_offline_without_cache_is_terminal() {
    let (remote, _auth, repo) = setup();
    remote.set_offline(true);

    let result = repo
        .list(VOCAB, &ListQuery::default(), Freshness::BestEffort)
        .await;
    assert_remote_failure(&result, RemoteFailure::NoConnectivity);
    assert_category(&result, ErrorCategory::Connectivity);
}

#[tokio::test]
async fn test_server_error_degrades_on_read() {
    let (remote, _auth, repo) = setup();
    repo.get(VOCAB, RecordId::Remote(1), Freshness::BestEffort)
        .await
        .expect("warm-up get should succeed");

    let failure = RemoteFailure::ServerError {
        code: 503,
        message: "maintenance".to_string(),
    };
    remote.fail_next(failure.clone());
    let fetched = repo
        .get(VOCAB, RecordId::Remote(1), Freshness::Refresh)
        .await
        .expect("stale get should succeed");

    assert_eq!(fetched.source, ReadSource::Hot);
    assert_eq!(fetched.advisory, Some(failure));
    assert_eq!(fetched.value.content.title, "apple");
}

// ============================================================================
// AUTHORIZATION
// ============================================================================

#[tokio::test]
async fn test_rejected_credential_is_refreshed_and_retried() {
    let remote = seeded_remote().shared();
    let auth = StaticAuth::signed_in("expired-token")
        .refreshing_to(VALID_TOKEN)
        .shared();
    let repo = memory_repository(remote.clone(), auth.clone());

    let fetched = repo
        .list(VOCAB, &ListQuery::default(), Freshness::BestEffort)
        .await
        .expect("retried list should succeed");

    assert_eq!(fetched.source, ReadSource::Remote);
    assert_eq!(auth.refresh_count(), 1);
    assert_eq!(remote.calls(RemoteCall::List), 2);
}

#[tokio::test]
async fn test_unauthorized_is_never_masked_by_cache() {
    let remote = seeded_remote().shared();
    let auth = StaticAuth::signed_in(VALID_TOKEN)
        .refreshing_to(VALID_TOKEN)
        .shared();
    let repo = memory_repository(remote.clone(), auth.clone());
    let query = ListQuery::default();
    repo.list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("warm-up list should succeed");

    remote.fail_next(RemoteFailure::Unauthorized);
    remote.fail_next(RemoteFailure::Unauthorized);
    let result = repo.list(VOCAB, &query, Freshness::Refresh).await;

    assert_remote_failure(&result, RemoteFailure::Unauthorized);
    assert_category(&result, ErrorCategory::Authorization);
    assert_eq!(auth.refresh_count(), 1);
}

#[tokio::test]
async fn test_failed_refresh_surfaces_auth_error() {
    let remote = seeded_remote().shared();
    let auth = StaticAuth::signed_in("expired-token").shared();
    let repo = memory_repository(remote, auth);

    let result = repo.stats(VOCAB, Freshness::BestEffort).await;
    assert_category(&result, ErrorCategory::Authorization);
    assert!(matches!(result, Err(MnemoError::Auth(_))));
}

#[tokio::test]
async fn test_signed_out_reads_fail_before_io() {
    let remote = seeded_remote()
        .with_taxonomy(VOCAB, vec![category("hsk1", "HSK 1", None)])
        .shared();
    let auth = StaticAuth::signed_out().shared();
    let repo = memory_repository(remote.clone(), auth);

    let result = repo
        .list(VOCAB, &ListQuery::default(), Freshness::BestEffort)
        .await;
    assert_category(&result, ErrorCategory::Authorization);
    assert_eq!(remote.total_calls(), 0);

    // taxonomy is public
    let taxonomy = repo
        .taxonomy(VOCAB, Freshness::BestEffort)
        .await
        .expect("taxonomy should succeed");
    assert_eq!(taxonomy.value.len(), 1);
    assert_eq!(taxonomy.value[0].name, "HSK 1");
}

// ============================================================================
// WRITE-THROUGH
// ============================================================================

#[tokio::test]
async fn test_write_invalidates_detail_lists_and_stats() {
    let (remote, _auth, repo) = setup();
    let query = ListQuery::default();
    repo.list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");
    repo.get(VOCAB, RecordId::Remote(1), Freshness::BestEffort)
        .await
        .expect("get should succeed");
    repo.stats(VOCAB, Freshness::BestEffort)
        .await
        .expect("stats should succeed");

    let ack = repo
        .archive(VOCAB, RecordId::Remote(1), true)
        .await
        .expect("archive should succeed");
    assert!(ack.record.is_some_and(|r| r.archived));

    let keys = repo.store().keys().await.expect("keys should succeed");
    assert!(keys.is_empty(), "stale entries left behind: {:?}", keys);

    let after = repo
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");
    assert_eq!(after.source, ReadSource::Remote);
    assert_ids(&after.value, &[RecordId::Remote(2), RecordId::Remote(3)]);
    assert_eq!(remote.calls(RemoteCall::List), 2);

    let detail = repo
        .get(VOCAB, RecordId::Remote(1), Freshness::BestEffort)
        .await
        .expect("get should succeed");
    assert_eq!(detail.source, ReadSource::Remote);
    assert!(detail.value.archived);
}

/// Memory backend whose bulk removals take `delay`.
struct SlowRemovals {
    inner: MemoryRecordBackend,
    delay: Duration,
}

#[async_trait]
impl RecordBackend for SlowRemovals {
    async fn load_bytes(&self, key: &CacheKey) -> MnemoResult<Option<Vec<u8>>> {
        self.inner.load_bytes(key).await
    }

    async fn save_bytes(&self, key: &CacheKey, bytes: Vec<u8>) -> MnemoResult<()> {
        self.inner.save_bytes(key, bytes).await
    }

    async fn remove(&self, key: &CacheKey) -> MnemoResult<bool> {
        self.inner.remove(key).await
    }

    async fn remove_matching(&self, predicate: KeyPredicate<'_>) -> MnemoResult<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.remove_matching(predicate).await
    }

    async fn keys(&self) -> MnemoResult<Vec<CacheKey>> {
        self.inner.keys().await
    }
}

#[tokio::test]
async fn test_cancelled_write_still_invalidates_every_tier() {
    let remote = seeded_remote().shared();
    let auth = StaticAuth::signed_in(VALID_TOKEN).shared();
    let store = RecordStore::new(Arc::new(SlowRemovals {
        inner: MemoryRecordBackend::new(),
        delay: Duration::from_millis(100),
    }));
    let repo = repository_with_store(remote.clone(), auth, store);

    let query = ListQuery::default();
    repo.list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");
    repo.get(VOCAB, RecordId::Remote(1), Freshness::BestEffort)
        .await
        .expect("get should succeed");
    repo.stats(VOCAB, Freshness::BestEffort)
        .await
        .expect("stats should succeed");
    assert_eq!(repo.store().keys().await.expect("keys should succeed").len(), 3);

    let writer = repo.clone();
    let handle = tokio::spawn(async move {
        writer
            .update(VOCAB, RecordId::Remote(1), RecordUpdate::Archive { archived: true })
            .await
    });

    // the server has acknowledged; invalidation is still running
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(remote.record(VOCAB, 1).expect("record 1 should exist").archived);
    handle.abort();
    let joined = handle.await;
    assert!(joined.is_err_and(|e| e.is_cancelled()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let keys = repo.store().keys().await.expect("keys should succeed");
    assert!(keys.is_empty(), "stale entries left behind: {:?}", keys);
    for kind in [EntryKind::List, EntryKind::Detail, EntryKind::Stats] {
        assert_eq!(repo.hot_stats(kind).entry_count, 0, "{:?} tier not invalidated", kind);
    }
}

#[tokio::test]
async fn test_create_and_review_reach_the_server() {
    let (remote, _auth, repo) = setup();

    let ack = repo
        .create(VOCAB, NewRecord::new("durian", "a spiky fruit"))
        .await
        .expect("create should succeed");
    let created = ack.record.expect("create should return the record");
    assert!(created.id.is_remote());
    assert_eq!(remote.record_count(VOCAB), 4);

    repo.review(VOCAB, RecordId::Remote(2), ReviewOutcome::Correct)
        .await
        .expect("review should succeed");
    let reviewed = remote.record(VOCAB, 2).expect("record 2 should exist");
    assert_eq!(reviewed.correct_count, 1);
}

#[tokio::test]
async fn test_write_failure_leaves_cache_untouched() {
    let (remote, _auth, repo) = setup();
    let query = ListQuery::default();
    repo.list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");

    remote.fail_next(RemoteFailure::Timeout);
    let result = repo.delete(VOCAB, RecordId::Remote(1)).await;
    assert_remote_failure(&result, RemoteFailure::Timeout);

    let cached = repo
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");
    assert_eq!(cached.source, ReadSource::Hot);
    assert_eq!(cached.value.len(), 3);
}

#[tokio::test]
async fn test_unsupported_operation_fails_without_remote_call() {
    let remote = seeded_remote()
        .with_supported_operations(Operations::all() - Operations::DELETE)
        .shared();
    let auth = StaticAuth::signed_in(VALID_TOKEN).shared();
    let repo = memory_repository(remote.clone(), auth);

    let result = repo.delete(VOCAB, RecordId::Remote(1)).await;
    assert_category(&result, ErrorCategory::Unsupported);
    assert_eq!(remote.calls(RemoteCall::Mutate), 0);
}

#[tokio::test]
async fn test_unconfirmed_ack_is_a_failure() {
    let (remote, _auth, repo) = setup();
    let query = ListQuery::default();
    repo.list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");

    remote.set_ack_mode(AckMode::Mismatched);
    let result = repo.archive(VOCAB, RecordId::Remote(1), true).await;
    assert!(matches!(result, Err(MnemoError::Unconfirmed { .. })));
    assert_category(&result, ErrorCategory::ServerRejected);

    remote.set_ack_mode(AckMode::Missing);
    let result = repo.archive(VOCAB, RecordId::Remote(2), true).await;
    assert!(matches!(result, Err(MnemoError::Unconfirmed { .. })));

    // nothing was invalidated
    let cached = repo
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");
    assert_eq!(cached.source, ReadSource::Hot);
}

#[tokio::test]
async fn test_validation_failure_performs_no_io() {
    let (remote, _auth, repo) = setup();

    let result = repo.create(VOCAB, NewRecord::new("   ", "blank title")).await;
    assert_category(&result, ErrorCategory::ValidationFailure);

    let result = repo
        .list(VOCAB, &ListQuery::default().with_page(0, 0), Freshness::BestEffort)
        .await;
    assert_category(&result, ErrorCategory::ValidationFailure);

    let result = repo
        .update(
            VOCAB,
            RecordId::new_local(),
            RecordUpdate::Favorite { favorite: true },
        )
        .await;
    assert_category(&result, ErrorCategory::ValidationFailure);

    assert_eq!(remote.total_calls(), 0);
    assert!(repo.store().keys().await.expect("keys should succeed").is_empty());
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let (_remote, _auth, repo) = setup();
    let result = repo
        .get(VOCAB, RecordId::Remote(99), Freshness::BestEffort)
        .await;
    assert_category(&result, ErrorCategory::NotFound);
}

// ============================================================================
// OVERLAY AND SYNC
// ============================================================================

#[tokio::test]
async fn test_local_record_lifecycle() {
    let (remote, _auth, repo) = setup();

    let local = repo
        .add_local(VOCAB, NewRecord::new("elderberry", "small dark berry"))
        .await
        .expect("add_local should succeed");
    assert!(local.id.is_local());

    let fetched = repo
        .get(VOCAB, local.id, Freshness::BestEffort)
        .await
        .expect("local get should succeed");
    assert_eq!(fetched.source, ReadSource::Local);
    assert_eq!(fetched.value, local);

    let page = repo
        .list_merged(VOCAB, &ListQuery::default(), Freshness::BestEffort)
        .await
        .expect("merged list should succeed");
    assert_eq!(page.value.len(), 4);
    assert_eq!(page.value.ids()[0], local.id);

    let second_page = repo
        .list_merged(VOCAB, &ListQuery::default().with_page(1, 2), Freshness::BestEffort)
        .await
        .expect("merged list should succeed");
    assert!(second_page.value.get(local.id).is_none());

    let outcome = repo.sync_pending(VOCAB).await.expect("sync should succeed");
    assert_eq!(outcome.len(), 1);
    assert!(outcome.is_success());
    assert!(outcome.entries()[0].item.is_create());

    assert!(repo.overlay(VOCAB).await.expect("overlay should load").is_empty());
    assert_eq!(remote.record_count(VOCAB), 4);

    // a second sync has nothing to push
    let outcome = repo.sync_pending(VOCAB).await.expect("sync should succeed");
    assert!(outcome.is_empty());
}

#[tokio::test]
async fn test_staged_edit_overrides_server_until_synced() {
    let (remote, _auth, repo) = setup();
    let id = RecordId::Remote(1);

    let staged = repo
        .stage_edit(VOCAB, id, RecordUpdate::Favorite { favorite: true })
        .await
        .expect("stage should succeed");
    assert_eq!(staged.pending, PendingFields::FAVORITE);

    let detail = repo
        .get(VOCAB, id, Freshness::BestEffort)
        .await
        .expect("get should succeed");
    assert!(detail.value.favorite);
    assert!(!remote.record(VOCAB, 1).expect("record 1 should exist").favorite);

    let page = repo
        .list_merged(VOCAB, &ListQuery::default(), Freshness::BestEffort)
        .await
        .expect("merged list should succeed");
    assert_eq!(page.value.len(), 3);
    assert!(page.value.get(id).is_some_and(|r| r.favorite));
    assert_eq!(page.value.local_part().len(), 1);

    let outcome = repo.sync_pending(VOCAB).await.expect("sync should succeed");
    assert_eq!(outcome.succeeded(), 1);
    assert!(remote.record(VOCAB, 1).expect("record 1 should exist").favorite);
    assert!(repo.overlay(VOCAB).await.expect("overlay should load").is_empty());
}

#[tokio::test]
async fn test_failed_sync_keeps_changes_pending() {
    let (remote, _auth, repo) = setup();
    let progress = RecordUpdate::Progress {
        mastery: 0.8,
        mistake_count: 1,
        correct_count: 3,
    };
    for id in [1, 2] {
        repo.stage_edit(VOCAB, RecordId::Remote(id), progress.clone())
            .await
            .expect("stage should succeed");
    }

    remote.fail_mutations_for(
        RecordId::Remote(2),
        RemoteFailure::ServerError {
            code: 500,
            message: "boom".to_string(),
        },
    );
    let outcome = repo.sync_pending(VOCAB).await.expect("sync should succeed");
    assert_eq!(outcome.len(), 2);
    assert_eq!(outcome.succeeded(), 1);
    let failures = outcome.failures();
    assert_eq!(failures[0].0.record_id, RecordId::Remote(2));

    let overlay = repo.overlay(VOCAB).await.expect("overlay should load");
    assert_eq!(overlay.len(), 1);
    let left = overlay
        .find(RecordId::Remote(2))
        .expect("record 2 should stay pending");
    assert_eq!(left.pending, PendingFields::PROGRESS);
}

#[tokio::test]
async fn test_content_edits_cannot_be_staged() {
    let (remote, _auth, repo) = setup();
    let result = repo
        .stage_edit(
            VOCAB,
            RecordId::Remote(1),
            RecordUpdate::Content {
                title: Some("apricot".to_string()),
                body: None,
                subject: None,
                tags: None,
            },
        )
        .await;
    assert_category(&result, ErrorCategory::ValidationFailure);
    assert_eq!(remote.total_calls(), 0);
}

#[tokio::test]
async fn test_staged_archive_moves_record_between_scopes() {
    let (_remote, _auth, repo) = setup();
    let id = RecordId::Remote(1);
    repo.stage_edit(VOCAB, id, RecordUpdate::Archive { archived: true })
        .await
        .expect("stage should succeed");

    let active = repo
        .list_merged(VOCAB, &ListQuery::new(RecordScope::Active), Freshness::BestEffort)
        .await
        .expect("merged list should succeed");
    assert_eq!(active.value.ids(), vec![RecordId::Remote(2), RecordId::Remote(3)]);

    let archived = repo
        .list_merged(VOCAB, &ListQuery::new(RecordScope::Archived), Freshness::BestEffort)
        .await
        .expect("merged list should succeed");
    assert_eq!(archived.value.ids(), vec![id]);
    assert!(archived.value.get(id).is_some_and(|r| r.archived));

    // later pages never repeat it
    let later = repo
        .list_merged(
            VOCAB,
            &ListQuery::new(RecordScope::Archived).with_page(1, 2),
            Freshness::BestEffort,
        )
        .await
        .expect("merged list should succeed");
    assert!(later.value.get(id).is_none());
}

#[tokio::test]
async fn test_staged_favorite_joins_favorite_scope() {
    let (_remote, _auth, repo) = setup();
    let id = RecordId::Remote(2);
    repo.stage_edit(VOCAB, id, RecordUpdate::Favorite { favorite: true })
        .await
        .expect("stage should succeed");

    let favorites = repo
        .list_merged(VOCAB, &ListQuery::new(RecordScope::Favorite), Freshness::BestEffort)
        .await
        .expect("merged list should succeed");
    assert_eq!(favorites.value.ids(), vec![id]);

    let filtered = repo
        .list_merged(
            VOCAB,
            &ListQuery::new(RecordScope::Favorite).with_subject("history"),
            Freshness::BestEffort,
        )
        .await
        .expect("merged list should succeed");
    assert!(filtered.value.is_empty());
}

#[tokio::test]
async fn test_edit_during_create_is_kept_pending() {
    let remote = seeded_remote()
        .with_delay(Duration::from_millis(100))
        .shared();
    let repo = memory_repository(remote.clone(), StaticAuth::signed_in(VALID_TOKEN).shared());
    let local = repo
        .add_local(VOCAB, NewRecord::new("grape", "grows in bunches"))
        .await
        .expect("add_local should succeed");

    let syncer = repo.clone();
    let syncing = tokio::spawn(async move { syncer.sync_pending(VOCAB).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    repo.stage_edit(VOCAB, local.id, RecordUpdate::Favorite { favorite: true })
        .await
        .expect("stage should succeed");

    let outcome = syncing
        .await
        .expect("sync task should join")
        .expect("sync should succeed");
    assert_eq!(outcome.succeeded(), 1);
    let ack = outcome.entries()[0]
        .result
        .as_ref()
        .expect("create should succeed");
    let created = ack.record.as_ref().expect("ack should carry the record");
    let RecordId::Remote(raw) = created.id else {
        panic!("created record should have a server id");
    };
    assert!(!remote.record(VOCAB, raw).expect("created record should exist").favorite);

    let overlay = repo.overlay(VOCAB).await.expect("overlay should load");
    assert_eq!(overlay.len(), 1);
    let kept = overlay.find(created.id).expect("edit should stay pending");
    assert_eq!(kept.pending, PendingFields::FAVORITE);
    assert!(kept.favorite);
    assert!(overlay.find(local.id).is_none());

    let outcome = repo.sync_pending(VOCAB).await.expect("sync should succeed");
    assert_eq!(outcome.succeeded(), 1);
    assert!(remote.record(VOCAB, raw).expect("created record should exist").favorite);
    assert!(repo.overlay(VOCAB).await.expect("overlay should load").is_empty());
    assert_eq!(remote.record_count(VOCAB), 4);
}

#[tokio::test]
async fn test_stage_during_sync_of_same_record() {
    let remote = seeded_remote()
        .with_delay(Duration::from_millis(100))
        .shared();
    let repo = memory_repository(remote.clone(), StaticAuth::signed_in(VALID_TOKEN).shared());
    let id = RecordId::Remote(1);
    repo.stage_edit(VOCAB, id, RecordUpdate::Favorite { favorite: true })
        .await
        .expect("stage should succeed");

    let syncer = repo.clone();
    let syncing = tokio::spawn(async move { syncer.sync_pending(VOCAB).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let staged = repo
        .stage_edit(
            VOCAB,
            id,
            RecordUpdate::Note {
                note: Some("crunchy".to_string()),
            },
        )
        .await
        .expect("stage during sync should succeed");
    assert!(staged.pending.contains(PendingFields::NOTE));

    let outcome = syncing
        .await
        .expect("sync task should join")
        .expect("sync should succeed");
    assert_eq!(outcome.succeeded(), 1);

    let overlay = repo.overlay(VOCAB).await.expect("overlay should load");
    let left = overlay.find(id).expect("note should stay pending");
    assert_eq!(left.pending, PendingFields::NOTE);

    // once synced and gone from the overlay, the record is fetched again
    repo.sync_pending(VOCAB).await.expect("sync should succeed");
    assert!(repo.overlay(VOCAB).await.expect("overlay should load").is_empty());
    let staged = repo
        .stage_edit(VOCAB, id, RecordUpdate::Archive { archived: true })
        .await
        .expect("stage after sync should succeed");
    assert!(staged.favorite);
    assert_eq!(staged.note.as_deref(), Some("crunchy"));
}

#[tokio::test]
async fn test_clear_caches_keeps_overlay() {
    let (remote, _auth, repo) = setup();
    let query = ListQuery::default();
    repo.list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");
    repo.add_local(VOCAB, NewRecord::new("fig", "sweet fruit"))
        .await
        .expect("add_local should succeed");

    repo.clear_caches().await.expect("clear should succeed");

    let keys = repo.store().keys().await.expect("keys should succeed");
    assert_eq!(keys, vec![CacheKey::overlay(VOCAB)]);
    assert_eq!(repo.overlay(VOCAB).await.expect("overlay should load").len(), 1);

    let again = repo
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("list should succeed");
    assert_eq!(again.source, ReadSource::Remote);
    assert_eq!(remote.calls(RemoteCall::List), 2);
}

// ============================================================================
// BATCH WRITES
// ============================================================================

#[tokio::test]
async fn test_apply_many_respects_max_in_flight() {
    let remote = MockRemote::new()
        .accepting(VALID_TOKEN)
        .with_records((1..=8).map(|id| vocab(id, "word", 0.1)))
        .with_delay(Duration::from_millis(20))
        .shared();
    let auth = StaticAuth::signed_in(VALID_TOKEN).shared();
    let mut config = MnemoConfig::default();
    config.batch.max_in_flight = 2;
    let repo = Repository::new(remote.clone(), auth, RecordStore::in_memory(), &config);

    let requests = (1..=8)
        .map(|id| {
            mnemo_core::MutationRequest::update(
                VOCAB,
                RecordId::Remote(id),
                RecordUpdate::Favorite { favorite: true },
            )
        })
        .collect();
    let outcome = repo.apply_many(requests).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.len(), 8);
    assert!(remote.peak_in_flight() <= 2);
    assert!(remote.peak_in_flight() >= 1);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[tokio::test]
async fn test_lmdb_cache_and_overlay_survive_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = MnemoConfig::default();
    config.store.path = Some(temp_dir.path().to_path_buf());
    config.store.map_size_mb = 10;
    let remote = seeded_remote().shared();
    let auth = StaticAuth::signed_in(VALID_TOKEN).shared();
    let query = ListQuery::default();

    {
        let repo = Repository::open(remote.clone(), auth.clone(), &config)
            .expect("open should succeed");
        repo.list(VOCAB, &query, Freshness::BestEffort)
            .await
            .expect("list should succeed");
        repo.add_local(VOCAB, NewRecord::new("grape", "vine fruit"))
            .await
            .expect("add_local should succeed");
    }

    remote.set_offline(true);
    let reopened =
        Repository::open(remote.clone(), auth, &config).expect("reopen should succeed");

    let cached = reopened
        .list(VOCAB, &query, Freshness::BestEffort)
        .await
        .expect("cached list should succeed");
    assert_eq!(cached.source, ReadSource::Disk);
    assert!(!cached.is_stale());
    assert_eq!(cached.value.len(), 3);
    assert_eq!(remote.calls(RemoteCall::List), 1);

    let overlay = reopened.overlay(VOCAB).await.expect("overlay should load");
    assert_eq!(overlay.len(), 1);
    assert_eq!(overlay.records[0].content.title, "grape");
}
