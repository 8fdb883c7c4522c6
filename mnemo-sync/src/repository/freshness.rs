//! Freshness contracts for repository reads.
//!
//! Callers state how much staleness they tolerate, and every read comes
//! back wrapped in [`Fetched<T>`] saying where the value came from and
//! whether it is still fresh.

use std::time::Duration;

use mnemo_core::{RemoteFailure, Timestamp};
use mnemo_storage::{CachedEnvelope, Lookup};

/// Staleness tolerance for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Serve cached data while it is within its kind's TTL.
    #[default]
    BestEffort,

    /// Serve cached data no older than the given age, even past its TTL.
    MaxAge(Duration),

    /// Skip the caches and ask the remote source. A failed refresh still
    /// falls back to cached data.
    Refresh,
}

impl Freshness {
    pub fn max_age(age: Duration) -> Self {
        Self::MaxAge(age)
    }

    /// Whether a cached envelope satisfies this policy without a remote call.
    pub fn accepts<T>(&self, envelope: &CachedEnvelope<T>) -> bool {
        match self {
            Self::BestEffort => !envelope.is_expired(),
            Self::MaxAge(age) => envelope.age() <= *age,
            Self::Refresh => false,
        }
    }
}

/// Tier that produced a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Hot,
    Disk,
    Remote,
    /// The device overlay; the record has never reached the server.
    Local,
}

/// Result of a repository read, carrying freshness metadata.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub source: ReadSource,
    pub fetched_at: Timestamp,
    pub is_expired: bool,
    /// Set when the remote source failed and this value is the cached
    /// fallback.
    pub advisory: Option<RemoteFailure>,
}

impl<T> Fetched<T> {
    /// Fresh value straight from the remote source.
    pub(crate) fn remote(envelope: CachedEnvelope<T>) -> Self {
        Self {
            value: envelope.payload,
            source: ReadSource::Remote,
            fetched_at: envelope.fetched_at,
            is_expired: false,
            advisory: None,
        }
    }

    pub(crate) fn cached(envelope: CachedEnvelope<T>, source: ReadSource) -> Self {
        let is_expired = envelope.is_expired();
        Self {
            value: envelope.payload,
            source,
            fetched_at: envelope.fetched_at,
            is_expired,
            advisory: None,
        }
    }

    pub(crate) fn local(value: T, fetched_at: Timestamp) -> Self {
        Self {
            value,
            source: ReadSource::Local,
            fetched_at,
            is_expired: false,
            advisory: None,
        }
    }

    pub(crate) fn with_advisory(mut self, failure: RemoteFailure) -> Self {
        self.advisory = Some(failure);
        self
    }

    /// True when the value is past its TTL or stands in for a failed refresh.
    pub fn is_stale(&self) -> bool {
        self.is_expired || self.advisory.is_some()
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> Fetched<U>
    where
        F: FnOnce(T) -> U,
    {
        Fetched {
            value: f(self.value),
            source: self.source,
            fetched_at: self.fetched_at,
            is_expired: self.is_expired,
            advisory: self.advisory,
        }
    }
}

impl<T: Clone> Fetched<T> {
    pub(crate) fn from_lookup(lookup: &Lookup<T>) -> Self {
        Self {
            value: lookup.envelope.payload.clone(),
            source: ReadSource::Hot,
            fetched_at: lookup.envelope.fetched_at,
            is_expired: lookup.is_expired,
            advisory: None,
        }
    }
}

impl<T> AsRef<T> for Fetched<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
