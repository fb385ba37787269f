//! Bounded concurrent fan-out over independent work items.
//!
//! [`FanOut::run`] hands a list of items to a fixed number of logical workers.
//! Each worker repeatedly claims the next unclaimed item from a shared cursor and
//! awaits one remote round trip for it, so at most `concurrency` items are in
//! flight at any time. All workers are polled on the caller's task.
//!
//! A worker returns `Result<Option<R>>` per item:
//!
//! - `Ok(Some(value))` - the item produced a value
//! - `Ok(None)` - the item was discarded (no data), logged at debug level
//! - `Err(e)` - the item failed, logged as a warning; siblings keep running
//!
//! The [`BatchResult`] holds only the values, each paired with its item and
//! restored to input order regardless of completion order. A batch where every
//! attempted item failed is not a result; [`BatchResult::require_any`] turns it
//! back into the first error.

use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};

/// Default number of items in flight.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Bounded concurrent executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FanOut {
    concurrency: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

enum Outcome<R> {
    Value(R),
    Discarded,
    Failed(AnalysisError),
}

impl FanOut {
    /// Creates an executor. A concurrency of zero is treated as one.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Returns the maximum number of items in flight.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `worker` over every item and collects the values.
    ///
    /// Completes once every item has been attempted. Worker errors never abort
    /// the batch.
    pub async fn run<I, R, F, Fut>(&self, items: Vec<I>, worker: F) -> BatchResult<I, R>
    where
        I: Clone + fmt::Display,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<Option<R>>>,
    {
        let cursor = AtomicUsize::new(0);
        let lanes = self.concurrency.min(items.len());

        let (items_ref, cursor_ref, worker_ref) = (&items, &cursor, &worker);
        let lanes = (0..lanes).map(|_| async move {
            let mut done = Vec::new();
            loop {
                let index = cursor_ref.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items_ref.get(index) else {
                    break;
                };
                let outcome = match worker_ref(item.clone()).await {
                    Ok(Some(value)) => Outcome::Value(value),
                    Ok(None) => {
                        debug!(item = %item, "Work item discarded, no data");
                        Outcome::Discarded
                    }
                    Err(e) => {
                        warn!(item = %item, error = %e, "Work item failed, skipping");
                        Outcome::Failed(e)
                    }
                };
                done.push((index, outcome));
            }
            done
        });

        let mut outcomes: Vec<(usize, Outcome<R>)> =
            join_all(lanes).await.into_iter().flatten().collect();
        outcomes.sort_by_key(|(index, _)| *index);

        let mut result = BatchResult::empty();
        for (index, outcome) in outcomes {
            match outcome {
                Outcome::Value(value) => result.entries.push((items[index].clone(), value)),
                Outcome::Discarded => result.discarded += 1,
                Outcome::Failed(e) => {
                    result.failed += 1;
                    result.first_error.get_or_insert(e);
                }
            }
        }

        debug!(
            produced = result.entries.len(),
            discarded = result.discarded,
            failed = result.failed,
            "Fan-out complete"
        );
        result
    }
}

/// Values produced by a [`FanOut::run`], in input order.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchResult<I, R> {
    entries: Vec<(I, R)>,
    discarded: usize,
    failed: usize,
    first_error: Option<AnalysisError>,
}

impl<I, R> BatchResult<I, R> {
    const fn empty() -> Self {
        Self {
            entries: Vec::new(),
            discarded: 0,
            failed: 0,
            first_error: None,
        }
    }

    /// Fails with the error of the earliest failed item when items failed and
    /// none produced a value.
    ///
    /// A batch whose items were only discarded is still a valid empty result.
    pub fn require_any(mut self) -> Result<Self> {
        if self.entries.is_empty() {
            if let Some(e) = self.first_error.take() {
                return Err(e);
            }
        }
        Ok(self)
    }

    /// Error of the earliest failed item, if any.
    #[must_use]
    pub const fn first_error(&self) -> Option<&AnalysisError> {
        self.first_error.as_ref()
    }

    /// Number of items that produced a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no item produced a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of items whose worker returned `Ok(None)`.
    #[must_use]
    pub const fn discarded(&self) -> usize {
        self.discarded
    }

    /// Number of items whose worker returned an error.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.failed
    }

    /// `(item, value)` pairs in input order.
    #[must_use]
    pub fn entries(&self) -> &[(I, R)] {
        &self.entries
    }

    /// Consumes the batch, returning the `(item, value)` pairs.
    #[must_use]
    pub fn into_entries(self) -> Vec<(I, R)> {
        self.entries
    }

    /// Splits into parallel vectors of items and values.
    #[must_use]
    pub fn unzip(self) -> (Vec<I>, Vec<R>) {
        self.entries.into_iter().unzip()
    }

    /// Re-sorts the entries by a key derived from the item.
    #[must_use]
    pub fn sorted_by_item<K: Ord>(mut self, key: impl Fn(&I) -> K) -> Self {
        self.entries.sort_by_key(|(item, _)| key(item));
        self
    }
}
