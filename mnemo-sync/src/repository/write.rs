//! Write-through mutations.

use mnemo_core::{
    AuthError, Collection, MnemoError, MnemoResult, Mutation, MutationAck, MutationRequest,
    NewRecord, RecordId, RecordUpdate, RemoteFailure, ReviewOutcome,
};

use super::{Invalidation, Repository};
use crate::batch::BatchOutcome;

impl Repository {
    /// Send one mutation to the remote source.
    ///
    /// Validation and the capability check run before any I/O. Nothing
    /// cached changes unless the server acknowledges the request's token;
    /// after that, every list page of the collection, its stats, and the
    /// touched record's detail entry are invalidated in both tiers.
    pub async fn apply(&self, request: MutationRequest) -> MnemoResult<MutationAck> {
        request.validate()?;

        let operation = request.operation();
        if !self.inner.remote.supported_operations().contains(operation) {
            return Err(MnemoError::Unsupported { operation });
        }

        if !self.inner.auth.is_authenticated() {
            return Err(AuthError::NotAuthenticated.into());
        }
        let credential = self
            .inner
            .auth
            .credential()
            .ok_or(MnemoError::Auth(AuthError::NotAuthenticated))?;

        let ack = match self.inner.remote.mutate(&request, &credential).await {
            Ok(ack) => ack,
            Err(RemoteFailure::Unauthorized) => {
                // Writes are not retried; the refresh is for the caller's next attempt.
                if let Err(e) = self.inner.auth.refresh().await {
                    tracing::warn!(error = %e, "credential refresh failed");
                }
                return Err(RemoteFailure::Unauthorized.into());
            }
            Err(failure) => {
                tracing::info!(
                    collection = %request.collection,
                    token = %request.token,
                    error = %failure,
                    "mutation failed"
                );
                return Err(failure.into());
            }
        };

        if !ack.confirms(&request.token) {
            tracing::warn!(
                collection = %request.collection,
                token = %request.token,
                "mutation acknowledgement did not echo the request token"
            );
            return Err(MnemoError::Unconfirmed {
                token: request.token,
            });
        }

        tracing::info!(
            collection = %request.collection,
            token = %request.token,
            status = ?ack.status,
            "mutation applied"
        );

        let target = request
            .target_id()
            .or_else(|| ack.record.as_ref().map(|r| r.id));
        self.invalidate(Invalidation::after_mutation(request.collection, target))
            .await;

        if let Mutation::Update { id, update } = &request.mutation {
            self.settle_overlay(request.collection, *id, update).await;
        }

        Ok(ack)
    }

    /// Create a record on the server.
    pub async fn create(&self, collection: Collection, draft: NewRecord) -> MnemoResult<MutationAck> {
        self.apply(MutationRequest::create(collection, draft)).await
    }

    /// Change one field group of a server record.
    pub async fn update(
        &self,
        collection: Collection,
        id: RecordId,
        update: RecordUpdate,
    ) -> MnemoResult<MutationAck> {
        self.apply(MutationRequest::update(collection, id, update)).await
    }

    pub async fn archive(
        &self,
        collection: Collection,
        id: RecordId,
        archived: bool,
    ) -> MnemoResult<MutationAck> {
        self.update(collection, id, RecordUpdate::Archive { archived })
            .await
    }

    pub async fn delete(&self, collection: Collection, id: RecordId) -> MnemoResult<MutationAck> {
        self.update(collection, id, RecordUpdate::Delete).await
    }

    /// Report a review answer to the server.
    pub async fn review(
        &self,
        collection: Collection,
        id: RecordId,
        outcome: ReviewOutcome,
    ) -> MnemoResult<MutationAck> {
        self.update(collection, id, RecordUpdate::Review { outcome })
            .await
    }

    /// Apply independent mutations concurrently, bounded by the batch limit.
    pub async fn apply_many(
        &self,
        requests: Vec<MutationRequest>,
    ) -> BatchOutcome<MutationRequest, MutationAck> {
        self.inner
            .batch
            .run(requests, |request| self.apply(request))
            .await
    }
}
