//! Remote source contract.
//!
//! One method per logical operation. Every failure is classified into a
//! [`RemoteFailure`] so the repository can decide between degrading to cached
//! data and surfacing the error without inspecting transport details.

use async_trait::async_trait;
use mnemo_core::{
    Category, Collection, CollectionStats, LearningRecord, ListQuery, MutationAck,
    MutationRequest, Operations, RecordId, RemoteFailure,
};

use crate::auth::Credential;

/// Result type alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteFailure>;

/// The server side of the data layer.
///
/// Implementations wrap whatever transport the host application uses. They
/// must echo the request's [`MutationToken`](mnemo_core::MutationToken) in
/// every acknowledgement; an acknowledgement without it is treated as
/// unconfirmed.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// One page of a collection. The server applies scope, filters, sort
    /// order, and paging from `query`.
    async fn fetch_list(
        &self,
        collection: Collection,
        query: &ListQuery,
        credential: &Credential,
    ) -> RemoteResult<Vec<LearningRecord>>;

    /// A single record, or `None` if the server does not know the id.
    async fn fetch_record(
        &self,
        collection: Collection,
        id: RecordId,
        credential: &Credential,
    ) -> RemoteResult<Option<LearningRecord>>;

    async fn fetch_stats(
        &self,
        collection: Collection,
        credential: &Credential,
    ) -> RemoteResult<CollectionStats>;

    /// Classification tree. Public: no credential required.
    async fn fetch_taxonomy(&self, collection: Collection) -> RemoteResult<Vec<Category>>;

    async fn mutate(
        &self,
        request: &MutationRequest,
        credential: &Credential,
    ) -> RemoteResult<MutationAck>;

    /// Operations this source can perform. Anything outside the set fails
    /// before a request is sent.
    fn supported_operations(&self) -> Operations {
        Operations::all()
    }
}
