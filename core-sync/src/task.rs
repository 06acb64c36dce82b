//! # Upload Task State Machine
//!
//! One `UploadTask` exists per selected item per run.
//!
//! ## State Machine
//!
//! ```text
//! Pending → InFlight → Succeeded
//!               ↓
//!             Failed
//! ```
//!
//! Terminal states are final. A failed task is never retried within the run
//! that created it; retries happen on a later run through the watermark.

use crate::error::{TransformError, TransportError};
use crate::{Result, SyncError};
use bridge_traits::MediaItem;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Outcomes
// ============================================================================

/// Why an item did not make it to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The library could not hand over the payload
    Unreadable,
    Decode,
    Encode,
    /// Writing or reading the scratch file failed
    Scratch,
    Network,
    Timeout,
    /// The endpoint answered with a non-2xx status
    Rejected { status: u16 },
    /// 2xx response whose body reported failure
    NotAcknowledged,
}

impl FailureReason {
    /// Whether the payload never left the device.
    pub fn is_transform(&self) -> bool {
        matches!(
            self,
            FailureReason::Unreadable
                | FailureReason::Decode
                | FailureReason::Encode
                | FailureReason::Scratch
        )
    }

    /// Whether a later attempt on the same payload could succeed.
    ///
    /// A payload that failed to decode or encode fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureReason::Decode | FailureReason::Encode)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unreadable => write!(f, "unreadable"),
            FailureReason::Decode => write!(f, "decode"),
            FailureReason::Encode => write!(f, "encode"),
            FailureReason::Scratch => write!(f, "scratch"),
            FailureReason::Network => write!(f, "network"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Rejected { status } => write!(f, "rejected ({status})"),
            FailureReason::NotAcknowledged => write!(f, "not acknowledged"),
        }
    }
}

impl From<&TransformError> for FailureReason {
    fn from(err: &TransformError) -> Self {
        match err {
            TransformError::Unreadable(_) => FailureReason::Unreadable,
            TransformError::Decode(_) => FailureReason::Decode,
            TransformError::Encode(_) => FailureReason::Encode,
            TransformError::Scratch(_) => FailureReason::Scratch,
        }
    }
}

impl From<&TransportError> for FailureReason {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Network(_) => FailureReason::Network,
            TransportError::Timeout => FailureReason::Timeout,
            TransportError::Rejected { status } => FailureReason::Rejected { status: *status },
            TransportError::NotAcknowledged => FailureReason::NotAcknowledged,
        }
    }
}

/// Terminal result of one item's upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Succeeded {
        item_id: String,
        captured_at: i64,
    },
    Failed {
        item_id: String,
        captured_at: i64,
        reason: FailureReason,
    },
}

impl UploadOutcome {
    pub fn item_id(&self) -> &str {
        match self {
            UploadOutcome::Succeeded { item_id, .. } | UploadOutcome::Failed { item_id, .. } => {
                item_id
            }
        }
    }

    pub fn captured_at(&self) -> i64 {
        match self {
            UploadOutcome::Succeeded { captured_at, .. }
            | UploadOutcome::Failed { captured_at, .. } => *captured_at,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Succeeded { .. })
    }
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InFlight => "in_flight",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload of a single item within a run.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub item: MediaItem,
    state: TaskState,
    outcome: Option<UploadOutcome>,
}

impl UploadTask {
    pub fn new(item: MediaItem) -> Self {
        Self {
            item,
            state: TaskState::Pending,
            outcome: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn outcome(&self) -> Option<&UploadOutcome> {
        self.outcome.as_ref()
    }

    /// Marks the task as dispatched.
    pub fn start(&mut self) -> Result<()> {
        self.validate_transition(TaskState::InFlight)?;
        self.state = TaskState::InFlight;
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<UploadOutcome> {
        self.validate_transition(TaskState::Succeeded)?;
        self.state = TaskState::Succeeded;
        Ok(self.record(UploadOutcome::Succeeded {
            item_id: self.item.id.clone(),
            captured_at: self.item.captured_at,
        }))
    }

    pub fn fail(&mut self, reason: FailureReason) -> Result<UploadOutcome> {
        self.validate_transition(TaskState::Failed)?;
        self.state = TaskState::Failed;
        Ok(self.record(UploadOutcome::Failed {
            item_id: self.item.id.clone(),
            captured_at: self.item.captured_at,
            reason,
        }))
    }

    fn record(&mut self, outcome: UploadOutcome) -> UploadOutcome {
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn validate_transition(&self, to: TaskState) -> Result<()> {
        let valid = matches!(
            (self.state, to),
            (TaskState::Pending, TaskState::InFlight)
                | (TaskState::InFlight, TaskState::Succeeded)
                | (TaskState::InFlight, TaskState::Failed)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
                reason: format!(
                    "Upload task for {} cannot move from {} to {}",
                    self.item.id, self.state, to
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
