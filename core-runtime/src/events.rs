//! # Event Bus System
//!
//! Broadcasts typed progress and lifecycle events from the backup engine to
//! any number of observers (UI progress bars, notifications, tests) using
//! `tokio::sync::broadcast`.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ RunCoordinator ├──────────>│           ├──────────────>│ Progress UI│
//! └────────────────┘           │ EventBus  │               └────────────┘
//! ┌────────────────┐   emit    │           │   subscribe   ┌────────────┐
//! │TriggerScheduler├──────────>│           ├──────────────>│ Notifier   │
//! └────────────────┘           └───────────┘               └────────────┘
//! ```
//!
//! Events are informational. Nothing in the engine depends on them being
//! received, and emitting with no subscribers is not an error for callers.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{BackupEvent, CoreEvent, EventBus, EventStream};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut progress = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Backup(BackupEvent::ItemCompleted { .. })));
//!
//! bus.emit(CoreEvent::Backup(BackupEvent::ItemCompleted {
//!     run_id: "run-1".into(),
//!     item_id: "IMG_0001".into(),
//!     done_count: 1,
//!     total_count: 3,
//!     succeeded: true,
//! }))
//! .ok();
//!
//! let event = progress.recv().await.unwrap();
//! assert_eq!(event.description(), "Item finished");
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Backup run progress and outcomes
    Backup(BackupEvent),
    /// Trigger scheduling
    Scheduler(SchedulerEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Backup(e) => e.description(),
            CoreEvent::Scheduler(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Backup(BackupEvent::RunFailed { .. }) => EventSeverity::Error,
            CoreEvent::Backup(BackupEvent::RunCompleted { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Backup(BackupEvent::RunCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Backup(BackupEvent::RunStarted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Backup Events
// ============================================================================

/// Why a triggered run did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Nothing at or above the watermark
    NoCandidates,
    /// The media library refused read access
    PermissionDenied,
}

/// Events emitted while a backup run executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum BackupEvent {
    /// A run selected a non-empty batch and started dispatching it.
    RunStarted {
        run_id: String,
        /// Number of items in the batch
        total_count: usize,
    },
    /// One item reached a terminal outcome.
    ItemCompleted {
        run_id: String,
        item_id: String,
        /// Outcomes recorded so far, including this one
        done_count: usize,
        total_count: usize,
        succeeded: bool,
    },
    /// Every item reported and the watermark was persisted.
    RunCompleted {
        run_id: String,
        succeeded: usize,
        failed: usize,
        /// Watermark after the run, epoch millis
        watermark: i64,
        duration_ms: u64,
    },
    /// A trigger fired but the run had nothing to do.
    RunSkipped { reason: SkipReason },
    /// The run aborted before completing.
    RunFailed {
        run_id: Option<String>,
        message: String,
        /// Whether the next trigger is expected to succeed
        recoverable: bool,
    },
}

impl BackupEvent {
    fn description(&self) -> &str {
        match self {
            BackupEvent::RunStarted { .. } => "Backup run started",
            BackupEvent::ItemCompleted { .. } => "Item finished",
            BackupEvent::RunCompleted { .. } => "Backup run completed",
            BackupEvent::RunSkipped { .. } => "Backup run skipped",
            BackupEvent::RunFailed { .. } => "Backup run failed",
        }
    }
}

// ============================================================================
// Scheduler Events
// ============================================================================

/// Events emitted by the trigger scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SchedulerEvent {
    /// The scheduler subscribed to the change source.
    Armed { task_name: String },
    /// A debounce window closed and a run was enqueued.
    RunEnqueued {
        task_name: String,
        task_id: String,
        /// Signals absorbed by this debounce window
        coalesced_signals: u32,
    },
    /// The scheduler loop exited.
    Stopped { task_name: String },
}

impl SchedulerEvent {
    fn description(&self) -> &str {
        match self {
            SchedulerEvent::Armed { .. } => "Trigger scheduler armed",
            SchedulerEvent::RunEnqueued { .. } => "Backup run enqueued",
            SchedulerEvent::Stopped { .. } => "Trigger scheduler stopped",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` wrapper with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
