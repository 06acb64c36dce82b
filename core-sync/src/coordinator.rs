//! # Backup Coordinator
//!
//! Runs one incremental backup pass from inventory to persisted watermark.
//!
//! ## Workflow
//!
//! 1. Check media library permission
//! 2. Take a full inventory snapshot
//! 3. Read the watermark and select candidates (newest first, capped)
//! 4. Dispatch one upload task per candidate without waiting
//! 5. Fan outcomes in through a [`CompletionBarrier`]
//! 6. Once every task has reported, advance and persist the watermark
//! 7. Emit progress and completion events on the `EventBus`
//!
//! The watermark is written only after the barrier fires. A run that is
//! cancelled or crashes part-way leaves it untouched, so the next run
//! recomputes the same candidates and uploads them again.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::BackupCoordinator;
//! use tokio_util::sync::CancellationToken;
//!
//! match coordinator.run_once(CancellationToken::new()).await? {
//!     Some(report) => println!("{} uploaded", report.summary.succeeded),
//!     None => println!("nothing new"),
//! }
//! ```

use crate::{
    barrier::{BatchSummary, CompletionBarrier},
    config::SyncConfig,
    pipeline::UploadPipeline,
    selector::CandidateSelector,
    task::{FailureReason, UploadOutcome, UploadTask},
    watermark::{Watermark, WatermarkStore},
    Result, SyncError,
};
use bridge_traits::{Clock, MediaItem, MediaLibrary};
use core_runtime::events::{BackupEvent, CoreEvent, EventBus, SkipReason};
use core_runtime::logging::redact_if_sensitive;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub summary: BatchSummary,
    pub watermark_before: Watermark,
    pub watermark_after: Watermark,
    pub duration: Duration,
}

/// Tracking for the run currently in flight
#[derive(Clone)]
struct ActiveRun {
    run_id: String,
    cancellation_token: CancellationToken,
}

/// Clears the active-run slot on every exit path of `run_once`.
struct ActiveRunGuard {
    slot: Arc<Mutex<Option<ActiveRun>>>,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        match self.slot.lock() {
            Ok(mut active) => *active = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Coordinates backup runs for one task name.
pub struct BackupCoordinator {
    config: SyncConfig,
    library: Arc<dyn MediaLibrary>,
    watermarks: WatermarkStore,
    selector: CandidateSelector,
    pipeline: Arc<UploadPipeline>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    active_run: Arc<Mutex<Option<ActiveRun>>>,
}

impl BackupCoordinator {
    pub fn new(
        config: SyncConfig,
        library: Arc<dyn MediaLibrary>,
        watermarks: WatermarkStore,
        pipeline: Arc<UploadPipeline>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let selector = CandidateSelector::from_config(&config);
        Self {
            config,
            library,
            watermarks,
            selector,
            pipeline,
            event_bus,
            clock,
            active_run: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    /// Whether a run is currently executing.
    pub fn is_run_active(&self) -> bool {
        self.active_run
            .lock()
            .map(|active| active.is_some())
            .unwrap_or(false)
    }

    /// Requests cancellation of the active run, if any.
    ///
    /// Returns the id of the cancelled run. In-flight uploads are aborted and
    /// the watermark is left where it was.
    pub fn cancel_active(&self) -> Option<String> {
        let active = self.active_run.lock().ok()?.clone()?;
        info!(run_id = %active.run_id, "Cancelling backup run");
        active.cancellation_token.cancel();
        Some(active.run_id)
    }

    /// Executes one backup pass.
    ///
    /// Returns `Ok(None)` when no item qualifies. In that case no run is
    /// created and the watermark is not written.
    ///
    /// # Errors
    ///
    /// - `SyncError::RunInProgress` if another run is active
    /// - `SyncError::PermissionDenied` if the library cannot be read
    /// - `SyncError::ProviderQuery` if the inventory snapshot fails
    /// - `SyncError::Interrupted` if `cancel` fires before every upload reports
    /// - `SyncError::WatermarkPersist` if the final write fails
    ///
    /// Individual upload failures are not errors; they are counted in the
    /// report's summary.
    #[instrument(skip(self, cancel), fields(task_name = %self.config.task_name))]
    pub async fn run_once(&self, cancel: CancellationToken) -> Result<Option<RunReport>> {
        let run_id = Uuid::new_v4().to_string();
        let _guard = self.claim(&run_id, &cancel)?;

        let result = self.execute(&run_id, &cancel).await;

        if let Err(e) = &result {
            if !matches!(e, SyncError::PermissionDenied) {
                error!(run_id = %run_id, error = %e, "Backup run failed");
                self.emit(BackupEvent::RunFailed {
                    run_id: self.started_run_id(e, &run_id),
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
            }
        }
        result
    }

    fn claim(&self, run_id: &str, cancel: &CancellationToken) -> Result<ActiveRunGuard> {
        let mut active = self.active_run.lock().map_err(|_| SyncError::RunInProgress {
            task_name: self.config.task_name.clone(),
        })?;

        if active.is_some() {
            warn!("Backup run already active, rejecting trigger");
            return Err(SyncError::RunInProgress {
                task_name: self.config.task_name.clone(),
            });
        }

        *active = Some(ActiveRun {
            run_id: run_id.to_string(),
            cancellation_token: cancel.clone(),
        });
        Ok(ActiveRunGuard {
            slot: Arc::clone(&self.active_run),
        })
    }

    /// Run id to attach to a failure event; only runs that got as far as
    /// dispatching have one visible to observers.
    fn started_run_id(&self, err: &SyncError, run_id: &str) -> Option<String> {
        match err {
            SyncError::Interrupted | SyncError::WatermarkPersist(_) => Some(run_id.to_string()),
            _ => None,
        }
    }

    async fn execute(
        &self,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<RunReport>> {
        let started_at = self.clock.unix_timestamp_millis();

        let permission = self
            .library
            .permission_status()
            .await
            .map_err(|e| SyncError::ProviderQuery(format!("Permission check failed: {}", e)))?;
        if !permission.allows_read() {
            warn!(?permission, "Media library not readable, skipping run");
            self.emit(BackupEvent::RunSkipped {
                reason: SkipReason::PermissionDenied,
            });
            return Err(SyncError::PermissionDenied);
        }

        let inventory = self
            .library
            .list()
            .await
            .map_err(|e| SyncError::ProviderQuery(e.to_string()))?;

        let watermark_before = self.watermarks.read().await?;
        let candidates = self.selector.select(&inventory, &watermark_before);

        debug!(
            inventory = inventory.len(),
            watermark = watermark_before.last_uploaded_at,
            candidates = candidates.len(),
            "Candidates selected"
        );

        if candidates.is_empty() {
            info!("No new media since last backup");
            self.emit(BackupEvent::RunSkipped {
                reason: SkipReason::NoCandidates,
            });
            return Ok(None);
        }

        let total = candidates.len();
        info!(
            run_id = %run_id,
            total,
            user_id = %redact_if_sensitive("user_id", &self.config.user_id),
            "Starting backup run"
        );
        self.emit(BackupEvent::RunStarted {
            run_id: run_id.to_string(),
            total_count: total,
        });

        // Only one run per coordinator, so anything left in scratch is stale
        self.pipeline.purge_scratch().await;

        let (outcome_tx, outcome_rx) = mpsc::channel(total);
        let mut uploads = self.dispatch(candidates, outcome_tx);

        let summary = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                uploads.abort_all();
                warn!(run_id = %run_id, "Backup run interrupted, watermark unchanged");
                return Err(SyncError::Interrupted);
            }
            summary = self.collect(run_id, total, outcome_rx) => summary?,
        };

        let watermark_after = watermark_before.after_run(
            &summary,
            &inventory,
            self.config.watermark_policy,
            self.config.retry_failed,
        );
        self.watermarks.write(&watermark_after).await?;

        let duration = Duration::from_millis(
            u64::try_from(self.clock.unix_timestamp_millis() - started_at).unwrap_or(0),
        );

        info!(
            run_id = %run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            watermark = watermark_after.last_uploaded_at,
            duration_ms = duration.as_millis() as u64,
            "Backup run completed"
        );
        self.emit(BackupEvent::RunCompleted {
            run_id: run_id.to_string(),
            succeeded: summary.succeeded,
            failed: summary.failed,
            watermark: watermark_after.last_uploaded_at,
            duration_ms: duration.as_millis() as u64,
        });

        Ok(Some(RunReport {
            run_id: run_id.to_string(),
            summary,
            watermark_before,
            watermark_after,
            duration,
        }))
    }

    /// Spawns one upload per item in selection order.
    fn dispatch(
        &self,
        items: Vec<MediaItem>,
        outcome_tx: mpsc::Sender<UploadOutcome>,
    ) -> JoinSet<()> {
        let semaphore = self
            .config
            .max_concurrent_uploads
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let mut uploads = JoinSet::new();

        for item in items {
            let pipeline = Arc::clone(&self.pipeline);
            let outcome_tx = outcome_tx.clone();
            let semaphore = semaphore.clone();

            uploads.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };

                let mut task = UploadTask::new(item);
                let outcome = match pipeline.execute(&mut task).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(item_id = %task.item.id, error = %e, "Upload task misbehaved");
                        UploadOutcome::Failed {
                            item_id: task.item.id.clone(),
                            captured_at: task.item.captured_at,
                            reason: FailureReason::NotAcknowledged,
                        }
                    }
                };

                if outcome_tx.send(outcome).await.is_err() {
                    debug!("Outcome receiver dropped");
                }
            });
        }

        uploads
    }

    /// Records outcomes until the barrier fires.
    async fn collect(
        &self,
        run_id: &str,
        total: usize,
        mut outcome_rx: mpsc::Receiver<UploadOutcome>,
    ) -> Result<BatchSummary> {
        let (done_tx, done_rx) = oneshot::channel();
        let barrier = CompletionBarrier::new(run_id, total, move |summary| {
            let _ = done_tx.send(summary);
        });

        while let Some(outcome) = outcome_rx.recv().await {
            let item_id = outcome.item_id().to_string();
            let succeeded = outcome.is_success();
            let done_count = barrier.record(outcome)?;

            self.emit(BackupEvent::ItemCompleted {
                run_id: run_id.to_string(),
                item_id,
                done_count,
                total_count: total,
                succeeded,
            });

            if barrier.is_complete() {
                break;
            }
        }

        // Every sender gone before the last outcome means an upload task died
        done_rx.await.map_err(|_| {
            error!(
                run_id = %run_id,
                reported = barrier.completed(),
                total,
                "Upload tasks ended without reporting"
            );
            SyncError::Interrupted
        })
    }

    fn emit(&self, event: BackupEvent) {
        self.event_bus.emit(CoreEvent::Backup(event)).ok();
    }
}
