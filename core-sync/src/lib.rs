//! # Incremental Backup Engine
//!
//! Detects new local media and ships it to a remote endpoint, resuming
//! correctly across restarts and partial network failure.
//!
//! ## Overview
//!
//! A change signal opens a debounce window; when it closes a single run is
//! enqueued. The run selects everything captured at or after the persisted
//! watermark (newest first, capped), uploads each item independently and
//! advances the watermark only once every upload has reported.
//!
//! ## Components
//!
//! - **Trigger Scheduler** (`scheduler`): Debounces change signals into unique work
//! - **Candidate Selector** (`selector`): Pure diff of inventory against the watermark
//! - **Watermark Store** (`watermark`): Durable, monotonic high-water mark
//! - **Upload Pipeline** (`transform`, `transport`, `pipeline`): Per-item transcode and upload
//! - **Upload Task** (`task`): Per-item state machine and outcomes
//! - **Completion Barrier** (`barrier`): Fires once after exactly N outcomes
//! - **Backup Coordinator** (`coordinator`): Runs one pass end to end
//! - **Backup Worker** (`worker`): Blocking entry point for host background work

pub mod barrier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod selector;
pub mod task;
pub mod transform;
pub mod transport;
pub mod watermark;
pub mod worker;

pub use barrier::{BatchSummary, CompletionBarrier, FailedItem, SyncRun};
pub use config::{SyncConfig, WatermarkPolicy};
pub use coordinator::{BackupCoordinator, RunReport};
pub use error::{Result, SyncError, TransformError, TransportError};
pub use pipeline::UploadPipeline;
pub use scheduler::TriggerScheduler;
pub use selector::{select, select_with_retries, CandidateSelector};
pub use task::{FailureReason, TaskState, UploadOutcome, UploadTask};
pub use transform::{ImageTransform, PreparedUpload, Transformer};
pub use transport::UploadTransport;
pub use watermark::{Watermark, WatermarkStore};
pub use worker::BackupWorker;
