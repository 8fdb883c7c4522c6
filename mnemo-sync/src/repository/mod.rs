//! The single entry point for learning data.
//!
//! Every read goes hot tier → disk tier → remote source, writing fresh
//! remote answers back through disk then memory. Every write goes to the
//! remote source first and, once acknowledged, invalidates whatever cached
//! entries it could have made wrong. Records the device owns (local-only
//! records and pending edits) live in a per-collection overlay that is
//! merged into list and detail reads.
//!
//! # Example
//!
//! ```ignore
//! let repo = Repository::open(remote, auth, &MnemoConfig::from_env())?;
//!
//! let page = repo
//!     .list_merged(Collection::Vocabulary, &ListQuery::default(), Freshness::BestEffort)
//!     .await?;
//! if let Some(failure) = &page.advisory {
//!     tracing::warn!(%failure, "showing cached vocabulary");
//! }
//! ```

mod freshness;
mod local;
mod read;
mod write;

pub use freshness::{Fetched, Freshness, ReadSource};
pub use local::{Overlay, PendingChange};

use std::future::Future;
use std::sync::Arc;

use mnemo_core::{
    AuthError, CacheConfig, Category, Collection, CollectionStats, EntryKind, LearningRecord,
    MnemoConfig, MnemoResult, RecordId, RemoteFailure,
};
use mnemo_storage::{CacheKey, CacheStats, CachedEnvelope, HotCache, RecordStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::auth::{AuthProvider, Credential};
use crate::batch::BatchCoordinator;
use crate::remote::{RemoteResult, RemoteSource};

/// One memory tier per entry kind.
pub(crate) struct HotTiers {
    lists: HotCache<Vec<LearningRecord>>,
    details: HotCache<LearningRecord>,
    stats: HotCache<CollectionStats>,
    taxonomy: HotCache<Vec<Category>>,
    overlay: HotCache<Overlay>,
}

impl HotTiers {
    fn new(config: &CacheConfig) -> Self {
        Self {
            lists: HotCache::new(EntryKind::List, config.capacity(EntryKind::List)),
            details: HotCache::new(EntryKind::Detail, config.capacity(EntryKind::Detail)),
            stats: HotCache::new(EntryKind::Stats, config.capacity(EntryKind::Stats)),
            taxonomy: HotCache::new(EntryKind::Taxonomy, config.capacity(EntryKind::Taxonomy)),
            overlay: HotCache::new(
                EntryKind::LocalOverlay,
                config.capacity(EntryKind::LocalOverlay),
            ),
        }
    }

    /// Remove matching entries from every disposable tier.
    fn remove_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CacheKey) -> bool,
    {
        self.lists.remove_matching(&predicate)
            + self.details.remove_matching(&predicate)
            + self.stats.remove_matching(&predicate)
            + self.taxonomy.remove_matching(&predicate)
    }

    fn stats(&self, kind: EntryKind) -> CacheStats {
        match kind {
            EntryKind::List => self.lists.stats(),
            EntryKind::Detail => self.details.stats(),
            EntryKind::Stats => self.stats.stats(),
            EntryKind::Taxonomy => self.taxonomy.stats(),
            EntryKind::LocalOverlay => self.overlay.stats(),
        }
    }
}

/// Payload types the repository caches, each bound to its memory tier.
pub(crate) trait CachedPayload:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn tier(tiers: &HotTiers) -> &HotCache<Self>;
}

impl CachedPayload for Vec<LearningRecord> {
    fn tier(tiers: &HotTiers) -> &HotCache<Self> {
        &tiers.lists
    }
}

impl CachedPayload for LearningRecord {
    fn tier(tiers: &HotTiers) -> &HotCache<Self> {
        &tiers.details
    }
}

impl CachedPayload for CollectionStats {
    fn tier(tiers: &HotTiers) -> &HotCache<Self> {
        &tiers.stats
    }
}

impl CachedPayload for Vec<Category> {
    fn tier(tiers: &HotTiers) -> &HotCache<Self> {
        &tiers.taxonomy
    }
}

impl CachedPayload for Overlay {
    fn tier(tiers: &HotTiers) -> &HotCache<Self> {
        &tiers.overlay
    }
}

/// Whether a read needs the signed-in user's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Authenticated,
    Public,
}

/// Cached entries a successful write may have made wrong.
#[derive(Debug, Clone)]
pub(crate) struct Invalidation {
    exact: Vec<CacheKey>,
    lists_of: Option<Collection>,
}

impl Invalidation {
    /// Every list page of the collection, the stats summary, and the
    /// detail entry of the touched record.
    pub(crate) fn after_mutation(collection: Collection, target: Option<RecordId>) -> Self {
        let mut exact = vec![CacheKey::stats(collection)];
        if let Some(id) = target {
            exact.push(CacheKey::detail(collection, id));
        }
        Self {
            exact,
            lists_of: Some(collection),
        }
    }

    pub(crate) fn key(key: CacheKey) -> Self {
        Self {
            exact: vec![key],
            lists_of: None,
        }
    }

    fn matches(&self, key: &CacheKey) -> bool {
        self.exact.contains(key)
            || self
                .lists_of
                .is_some_and(|c| key.collection() == c && key.kind() == EntryKind::List)
    }
}

enum Probe<T> {
    Fresh(Fetched<T>),
    Stale(Fetched<T>),
    Miss,
}

struct OverlayLocks {
    vocabulary: Mutex<()>,
    knowledge_points: Mutex<()>,
}

impl OverlayLocks {
    fn get(&self, collection: Collection) -> &Mutex<()> {
        match collection {
            Collection::Vocabulary => &self.vocabulary,
            Collection::KnowledgePoints => &self.knowledge_points,
        }
    }
}

pub(crate) struct Inner {
    remote: Arc<dyn RemoteSource>,
    auth: Arc<dyn AuthProvider>,
    store: RecordStore,
    tiers: HotTiers,
    cache_config: CacheConfig,
    batch: BatchCoordinator,
    overlay_locks: OverlayLocks,
}

/// Offline-first access to vocabulary and knowledge-point collections.
///
/// Cheap to clone; clones share tiers, collaborators, and the batch limit.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl Repository {
    /// Build a repository over an already opened record store.
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        auth: Arc<dyn AuthProvider>,
        store: RecordStore,
        config: &MnemoConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                auth,
                store,
                tiers: HotTiers::new(&config.cache),
                cache_config: config.cache.clone(),
                batch: BatchCoordinator::new(config.batch.max_in_flight),
                overlay_locks: OverlayLocks {
                    vocabulary: Mutex::new(()),
                    knowledge_points: Mutex::new(()),
                },
            }),
        }
    }

    /// Validate `config`, open the configured record store, and build.
    pub fn open(
        remote: Arc<dyn RemoteSource>,
        auth: Arc<dyn AuthProvider>,
        config: &MnemoConfig,
    ) -> MnemoResult<Self> {
        config.validate()?;
        let store = RecordStore::from_config(&config.store)?;
        tracing::info!(
            persistent = config.store.path.is_some(),
            max_in_flight = config.batch.max_in_flight,
            "repository opened"
        );
        Ok(Self::new(remote, auth, store, config))
    }

    /// Memory-tier statistics for one entry kind.
    pub fn hot_stats(&self, kind: EntryKind) -> CacheStats {
        self.inner.tiers.stats(kind)
    }

    pub fn store(&self) -> &RecordStore {
        &self.inner.store
    }

    pub fn batch(&self) -> &BatchCoordinator {
        &self.inner.batch
    }

    /// Drop every cached server answer in both tiers, keeping the overlay.
    /// Intended for sign-out.
    pub async fn clear_caches(&self) -> MnemoResult<u64> {
        let evicted = self.inner.tiers.remove_matching(|_| true);
        let removed = self.inner.store.clear().await?;
        tracing::info!(evicted, removed, "caches cleared");
        Ok(removed)
    }

    /// Drop expired entries from the disk tier.
    pub async fn purge_expired(&self) -> MnemoResult<u64> {
        self.inner.store.purge_expired().await
    }

    fn ttl(&self, kind: EntryKind) -> std::time::Duration {
        self.inner.cache_config.ttl(kind)
    }

    /// Look in the memory tier, then the disk tier, promoting disk hits.
    async fn probe<T: CachedPayload>(&self, key: &CacheKey, freshness: Freshness) -> Probe<T> {
        let tier = T::tier(&self.inner.tiers);

        if let Some(lookup) = tier.get(key) {
            let fetched = Fetched::from_lookup(&lookup);
            return if freshness.accepts(&lookup.envelope) {
                tracing::debug!(key = %key, "hot cache hit");
                Probe::Fresh(fetched)
            } else {
                Probe::Stale(fetched)
            };
        }

        match self.inner.store.load::<T>(key).await {
            Ok(Some(envelope)) => {
                tier.put(key.clone(), envelope.clone());
                let accepted = freshness.accepts(&envelope);
                let fetched = Fetched::cached(envelope, ReadSource::Disk);
                if accepted {
                    tracing::debug!(key = %key, "disk cache hit");
                    Probe::Fresh(fetched)
                } else {
                    Probe::Stale(fetched)
                }
            }
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                Probe::Miss
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "disk tier read failed, treating as miss");
                Probe::Miss
            }
        }
    }

    /// Read-through for one key.
    ///
    /// `fetch` receives the current credential (`None` for public reads or
    /// when the auth provider holds none). `Ok(None)` from the remote source
    /// means the server does not know the key: both tiers forget it.
    pub(crate) async fn read_through<T, F, Fut>(
        &self,
        key: CacheKey,
        freshness: Freshness,
        access: Access,
        fetch: F,
    ) -> MnemoResult<Option<Fetched<T>>>
    where
        T: CachedPayload,
        F: Fn(Option<Credential>) -> Fut,
        Fut: Future<Output = RemoteResult<Option<T>>>,
    {
        if access == Access::Authenticated && !self.inner.auth.is_authenticated() {
            return Err(AuthError::NotAuthenticated.into());
        }

        let fallback = match self.probe::<T>(&key, freshness).await {
            Probe::Fresh(fetched) => return Ok(Some(fetched)),
            Probe::Stale(fetched) => Some(fetched),
            Probe::Miss => None,
        };

        let credential = match access {
            Access::Authenticated => self.inner.auth.credential(),
            Access::Public => None,
        };
        let mut result = fetch(credential).await;

        if access == Access::Authenticated && matches!(result, Err(RemoteFailure::Unauthorized)) {
            let refreshed = self.refresh_credential().await?;
            result = fetch(Some(refreshed)).await;
        }

        match result {
            Ok(Some(value)) => {
                tracing::info!(key = %key, "remote fetch succeeded");
                let envelope = CachedEnvelope::new(value, self.ttl(key.kind()));
                self.write_back(key, envelope.clone()).await;
                Ok(Some(Fetched::remote(envelope)))
            }
            Ok(None) => {
                tracing::info!(key = %key, "remote source has no such entry");
                self.invalidate(Invalidation::key(key)).await;
                Ok(None)
            }
            Err(failure) => match fallback {
                Some(stale) if failure.allows_stale_read() => {
                    tracing::warn!(
                        key = %key,
                        error = %failure,
                        fetched_at = %stale.fetched_at,
                        "remote fetch failed, serving cached value"
                    );
                    Ok(Some(stale.with_advisory(failure)))
                }
                _ => {
                    tracing::info!(key = %key, error = %failure, "remote fetch failed");
                    Err(failure.into())
                }
            },
        }
    }

    /// Ask the auth provider for a new credential after a rejection.
    async fn refresh_credential(&self) -> MnemoResult<Credential> {
        tracing::info!("credential rejected, requesting refresh");
        self.inner.auth.refresh().await.map_err(|e| {
            tracing::warn!(error = %e, "credential refresh failed");
            e.into()
        })
    }

    /// Persist a fresh remote answer to disk, then memory.
    ///
    /// Runs in its own task so a caller dropping the read future cannot
    /// leave the tiers disagreeing.
    async fn write_back<T: CachedPayload>(&self, key: CacheKey, envelope: CachedEnvelope<T>) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            if let Err(e) = inner.store.save(&key, &envelope).await {
                tracing::warn!(key = %key, error = %e, "failed to persist fetched value");
            }
            T::tier(&inner.tiers).put(key, envelope);
        });
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "write-back task failed");
        }
    }

    /// Remove matching entries from disk, then memory, in a detached task
    /// the caller awaits.
    pub(crate) async fn invalidate(&self, invalidation: Invalidation) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let removed = match inner.store.remove_all(|k| invalidation.matches(k)).await {
                Ok(removed) => removed,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to invalidate disk tier");
                    0
                }
            };
            let evicted = inner.tiers.remove_matching(|k| invalidation.matches(k));
            tracing::debug!(removed, evicted, "cache entries invalidated");
        });
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "invalidation task failed");
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("store", &self.inner.store)
            .field("batch", &self.inner.batch)
            .finish_non_exhaustive()
    }
}
