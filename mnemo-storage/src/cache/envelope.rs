//! Freshness metadata carried alongside every cached payload.

use chrono::Utc;
use mnemo_core::Timestamp;
use std::sync::Arc;
use std::time::Duration;

/// A cached payload, when it was fetched, and how long it stays fresh.
///
/// Expired envelopes are still returned by both tiers so a failed refresh
/// can fall back to them; they are just never reported as fresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEnvelope<T> {
    pub payload: T,
    pub fetched_at: Timestamp,
    pub ttl: Duration,
}

impl<T> CachedEnvelope<T> {
    /// Wrap a payload fetched just now.
    pub fn new(payload: T, ttl: Duration) -> Self {
        Self::stamped(payload, Utc::now(), ttl)
    }

    pub fn stamped(payload: T, fetched_at: Timestamp, ttl: Duration) -> Self {
        Self {
            payload,
            fetched_at,
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// `now - fetched_at > ttl`. A ttl too large to represent never expires.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(self.fetched_at) > ttl,
            Err(_) => false,
        }
    }

    /// Time since the payload was fetched. Zero if the clock moved backwards.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Map the payload, keeping the freshness metadata.
    pub fn map<U, F>(self, f: F) -> CachedEnvelope<U>
    where
        F: FnOnce(T) -> U,
    {
        CachedEnvelope {
            payload: f(self.payload),
            fetched_at: self.fetched_at,
            ttl: self.ttl,
        }
    }
}

/// Result of a hot-tier hit.
///
/// The envelope is a shared snapshot: a later `put` for the same key swaps
/// in a new `Arc` and never touches this one.
#[derive(Debug, Clone)]
pub struct Lookup<T> {
    pub envelope: Arc<CachedEnvelope<T>>,
    pub is_expired: bool,
}

impl<T> Lookup<T> {
    pub fn new(envelope: Arc<CachedEnvelope<T>>) -> Self {
        let is_expired = envelope.is_expired();
        Self {
            envelope,
            is_expired,
        }
    }

    pub fn payload(&self) -> &T {
        &self.envelope.payload
    }

    pub fn fetched_at(&self) -> Timestamp {
        self.envelope.fetched_at
    }

    pub fn is_fresh(&self) -> bool {
        !self.is_expired
    }
}
