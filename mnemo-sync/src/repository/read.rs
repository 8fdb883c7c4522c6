//! Read operations.

use std::collections::HashSet;

use mnemo_core::{
    Category, Collection, CollectionStats, LearningRecord, ListQuery, MnemoError, MnemoResult,
    PendingFields, RecordId, RecordScope, RemoteFailure,
};
use mnemo_storage::CacheKey;

use super::{Access, Fetched, Freshness, Repository};
use crate::auth::Credential;
use crate::merge::{merge, reconcile, MergeOptions, MergedCollection};
use crate::remote::RemoteResult;

/// Staged groups that can move a record into `scope`.
fn scope_fields(scope: RecordScope) -> PendingFields {
    match scope {
        RecordScope::Active | RecordScope::Archived => PendingFields::ARCHIVED,
        RecordScope::Favorite => PendingFields::ARCHIVED | PendingFields::FAVORITE,
    }
}

/// A missing credential reads as a rejected one, so the refresh path runs.
fn require(credential: Option<Credential>) -> RemoteResult<Credential> {
    credential.ok_or(RemoteFailure::Unauthorized)
}

fn present<T>(fetched: Option<Fetched<T>>, key: &CacheKey) -> MnemoResult<Fetched<T>> {
    fetched.ok_or_else(|| {
        MnemoError::from(RemoteFailure::DecodingError {
            reason: format!("empty response for {}", key),
        })
    })
}

impl Repository {
    /// One page of server records, read through both cache tiers.
    pub async fn list(
        &self,
        collection: Collection,
        query: &ListQuery,
        freshness: Freshness,
    ) -> MnemoResult<Fetched<Vec<LearningRecord>>> {
        query.validate()?;
        let key = CacheKey::list(collection, query);
        let remote = &*self.inner.remote;

        let fetched = self
            .read_through(key.clone(), freshness, Access::Authenticated, move |credential| {
                async move {
                    let credential = require(credential)?;
                    remote
                        .fetch_list(collection, query, &credential)
                        .await
                        .map(Some)
                }
            })
            .await?;
        present(fetched, &key)
    }

    /// One page of server records merged with what the device owns.
    ///
    /// Local-only records join the first page (subject to the query's
    /// filters). Records with pending edits override their server copy when
    /// it is part of this page. A staged archive or favorite change that
    /// moves a record into the requested scope joins the first page, as the
    /// server does not list it there yet. A terminal failure of the server
    /// slice is returned as an error rather than a local-only page.
    pub async fn list_merged(
        &self,
        collection: Collection,
        query: &ListQuery,
        freshness: Freshness,
    ) -> MnemoResult<Fetched<MergedCollection>> {
        let server = self.list(collection, query, freshness).await?;
        let overlay = self.load_overlay(collection).await?;

        let server_ids: HashSet<RecordId> = server.value.iter().map(|r| r.id).collect();
        let local: Vec<LearningRecord> = overlay
            .records
            .into_iter()
            .filter(|r| {
                if r.is_local_only() {
                    query.is_first_page() && query.matches_filters(r)
                } else if server_ids.contains(&r.id) {
                    r.has_pending()
                } else {
                    query.is_first_page()
                        && r.pending.intersects(scope_fields(query.scope))
                        && query.scope.admits(r)
                        && query.matches_filters(r)
                }
            })
            .collect();

        tracing::debug!(
            collection = %collection,
            server = server_ids.len(),
            local = local.len(),
            "merging list page"
        );
        Ok(server.map(|records| merge(records, local, MergeOptions::from(query))))
    }

    /// A single record.
    ///
    /// Local ids are answered from the overlay. Server ids are read through
    /// the caches, then any pending local edit is applied on top.
    pub async fn get(
        &self,
        collection: Collection,
        id: RecordId,
        freshness: Freshness,
    ) -> MnemoResult<Fetched<LearningRecord>> {
        let not_found = || MnemoError::NotFound { collection, id };

        if id.is_local() {
            let overlay = self.load_overlay(collection).await?;
            return overlay
                .find(id)
                .map(|record| Fetched::local(record.clone(), record.modified_at))
                .ok_or_else(not_found);
        }

        let remote = &*self.inner.remote;
        let fetched = self
            .read_through(
                CacheKey::detail(collection, id),
                freshness,
                Access::Authenticated,
                move |credential| async move {
                    let credential = require(credential)?;
                    remote.fetch_record(collection, id, &credential).await
                },
            )
            .await?
            .ok_or_else(not_found)?;

        let overlay = self.load_overlay(collection).await?;
        Ok(match overlay.find(id) {
            Some(local) if local.has_pending() => fetched.map(|server| reconcile(&server, local)),
            _ => fetched,
        })
    }

    /// Server-computed summary of a collection.
    pub async fn stats(
        &self,
        collection: Collection,
        freshness: Freshness,
    ) -> MnemoResult<Fetched<CollectionStats>> {
        let key = CacheKey::stats(collection);
        let remote = &*self.inner.remote;

        let fetched = self
            .read_through(key.clone(), freshness, Access::Authenticated, move |credential| {
                async move {
                    let credential = require(credential)?;
                    remote.fetch_stats(collection, &credential).await.map(Some)
                }
            })
            .await?;
        present(fetched, &key)
    }

    /// Classification tree of a collection. Readable without signing in.
    pub async fn taxonomy(
        &self,
        collection: Collection,
        freshness: Freshness,
    ) -> MnemoResult<Fetched<Vec<Category>>> {
        let key = CacheKey::taxonomy(collection);
        let remote = &*self.inner.remote;

        let fetched = self
            .read_through(key.clone(), freshness, Access::Public, move |_| async move {
                remote.fetch_taxonomy(collection).await.map(Some)
            })
            .await?;
        present(fetched, &key)
    }
}
