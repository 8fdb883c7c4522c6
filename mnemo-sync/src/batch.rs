//! Bounded fan-out of independent operations.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use mnemo_core::{MnemoError, MnemoResult, StorageError};
use tokio::sync::Semaphore;

/// One submitted item and what happened to it.
#[derive(Debug, Clone)]
pub struct BatchEntry<I, T> {
    pub item: I,
    pub result: MnemoResult<T>,
}

/// Per-item outcomes of a batch, in input order.
#[derive(Debug, Clone)]
pub struct BatchOutcome<I, T> {
    entries: Vec<BatchEntry<I, T>>,
}

impl<I, T> BatchOutcome<I, T> {
    pub fn entries(&self) -> &[BatchEntry<I, T>] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<BatchEntry<I, T>> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of items that succeeded.
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_ok()).count()
    }

    /// Number of items that failed.
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Check if all items succeeded
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Failed items with their reasons.
    pub fn failures(&self) -> Vec<(&I, &MnemoError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (&e.item, err)))
            .collect()
    }

    /// Successful items with their values.
    pub fn successes(&self) -> Vec<(&I, &T)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().ok().map(|value| (&e.item, value)))
            .collect()
    }
}

/// Runs independent operations concurrently with a cap on how many are
/// awaiting at once.
///
/// The cap is shared by every batch started from the same coordinator (or
/// its clones), so two concurrent batches never exceed it together.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl BatchCoordinator {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run `op` for every item and wait for all of them.
    ///
    /// One item failing never cancels the others. The outcome has exactly
    /// one entry per item, in the order the items were given.
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, op: F) -> BatchOutcome<I, T>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = MnemoResult<T>>,
    {
        let total = items.len();
        let op = &op;
        let futures = items.into_iter().map(|item| {
            let permits = Arc::clone(&self.permits);
            async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => op(item.clone()).await,
                    Err(e) => Err(StorageError::TaskAborted {
                        reason: format!("batch limiter closed: {}", e),
                    }
                    .into()),
                };
                BatchEntry { item, result }
            }
        });

        let entries = join_all(futures).await;
        let outcome = BatchOutcome { entries };
        tracing::debug!(
            total,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "batch complete"
        );
        outcome
    }
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new(mnemo_core::BatchConfig::default().max_in_flight)
    }
}
