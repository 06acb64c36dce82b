//! # Completion Barrier
//!
//! Fan-in point for a run's upload outcomes.
//!
//! The barrier is created with the batch size and a callback. Every upload
//! records exactly one outcome; when the completed count reaches the total
//! the callback fires once with a [`BatchSummary`]. A barrier for an empty
//! batch fires as soon as it is created.
//!
//! ```
//! use core_sync::barrier::CompletionBarrier;
//! use core_sync::task::UploadOutcome;
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let barrier = CompletionBarrier::new("run-1", 1, move |summary| {
//!     tx.send(summary.succeeded).ok();
//! });
//!
//! barrier
//!     .record(UploadOutcome::Succeeded { item_id: "a".into(), captured_at: 1 })
//!     .unwrap();
//! assert_eq!(rx.recv().unwrap(), 1);
//! ```

use crate::task::{FailureReason, UploadOutcome};
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A failed item as reported to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_id: String,
    pub captured_at: i64,
    pub reason: FailureReason,
}

/// Aggregate result of a run, handed to the completion callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Newest capture time among all attempted items, successful or not
    pub max_attempted_at: Option<i64>,
    pub succeeded_ids: Vec<String>,
    pub failed_items: Vec<FailedItem>,
}

impl BatchSummary {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

/// Running tally of a dispatched batch.
///
/// `completed` only increases; the run is complete when it equals `total`.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub run_id: String,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    max_attempted_at: Option<i64>,
    succeeded_ids: Vec<String>,
    failed_items: Vec<FailedItem>,
}

impl SyncRun {
    pub fn new(run_id: impl Into<String>, total: usize) -> Self {
        Self {
            run_id: run_id.into(),
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
            max_attempted_at: None,
            succeeded_ids: Vec::with_capacity(total),
            failed_items: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }

    /// Adds one outcome to the tally.
    pub fn record(&mut self, outcome: UploadOutcome) {
        self.completed += 1;
        let captured_at = outcome.captured_at();
        self.max_attempted_at = Some(
            self.max_attempted_at
                .map_or(captured_at, |max| max.max(captured_at)),
        );

        match outcome {
            UploadOutcome::Succeeded { item_id, .. } => {
                self.succeeded += 1;
                self.succeeded_ids.push(item_id);
            }
            UploadOutcome::Failed {
                item_id,
                captured_at,
                reason,
            } => {
                self.failed += 1;
                self.failed_items.push(FailedItem {
                    item_id,
                    captured_at,
                    reason,
                });
            }
        }
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            max_attempted_at: self.max_attempted_at,
            succeeded_ids: self.succeeded_ids.clone(),
            failed_items: self.failed_items.clone(),
        }
    }
}

type CompletionCallback = Box<dyn FnOnce(BatchSummary) + Send>;

/// Counts outcomes and fires a callback exactly once when all have arrived.
pub struct CompletionBarrier {
    total: usize,
    completed: AtomicUsize,
    run: Mutex<SyncRun>,
    on_complete: Mutex<Option<CompletionCallback>>,
}

impl CompletionBarrier {
    /// Creates a barrier for `total` outcomes. With `total == 0` the
    /// callback runs before this returns.
    pub fn new<F>(run_id: impl Into<String>, total: usize, on_complete: F) -> Self
    where
        F: FnOnce(BatchSummary) + Send + 'static,
    {
        let barrier = Self {
            total,
            completed: AtomicUsize::new(0),
            run: Mutex::new(SyncRun::new(run_id, total)),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        };

        if total == 0 {
            barrier.fire(BatchSummary::default());
        }
        barrier
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Outcomes recorded so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.completed() >= self.total
    }

    /// Records one outcome and returns the completed count including it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidStateTransition` if every expected outcome
    /// has already been recorded.
    pub fn record(&self, outcome: UploadOutcome) -> Result<usize> {
        let summary = {
            let mut run = self
                .run
                .lock()
                .map_err(|_| internal("run tally lock poisoned"))?;

            if run.is_complete() {
                warn!(item_id = outcome.item_id(), "Outcome arrived after barrier fired");
                return Err(SyncError::InvalidStateTransition {
                    from: "complete".to_string(),
                    to: "record".to_string(),
                    reason: format!(
                        "Run {} already received {} outcomes",
                        run.run_id, run.total
                    ),
                });
            }

            run.record(outcome);
            let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(done, total = self.total, "Outcome recorded");

            if done < self.total {
                return Ok(done);
            }
            run.summary()
        };

        self.fire(summary);
        Ok(self.total)
    }

    fn fire(&self, summary: BatchSummary) {
        let callback = match self.on_complete.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            callback(summary);
        }
    }
}

fn internal(reason: &str) -> SyncError {
    SyncError::InvalidStateTransition {
        from: "recording".to_string(),
        to: "record".to_string(),
        reason: reason.to_string(),
    }
}
