//! # Backup Worker
//!
//! Entry point invoked by the host's background work system.
//!
//! Platform schedulers call work synchronously on a thread they own and
//! consider the work finished when the call returns. [`BackupWorker::do_work`]
//! therefore blocks until the run's completion barrier has fired and the
//! watermark has been written.

use crate::coordinator::{BackupCoordinator, RunReport};
use crate::{Result, SyncError};
use bridge_traits::{BackgroundExecutor, BridgeError, TaskHandler};
use futures::FutureExt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct BackupWorker {
    coordinator: Arc<BackupCoordinator>,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl BackupWorker {
    /// Creates a worker that drives runs on `runtime`.
    pub fn new(coordinator: Arc<BackupCoordinator>, runtime: Handle) -> Self {
        Self {
            coordinator,
            runtime,
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a worker bound to the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` when called outside a Tokio runtime.
    pub fn current(coordinator: Arc<BackupCoordinator>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::Config(format!("No Tokio runtime available: {}", e)))?;
        Ok(Self::new(coordinator, runtime))
    }

    pub fn coordinator(&self) -> &Arc<BackupCoordinator> {
        &self.coordinator
    }

    /// Runs one backup pass, blocking the calling thread until it finishes.
    ///
    /// Must not be called from inside an async context.
    pub fn do_work(&self) -> Result<Option<RunReport>> {
        let (done_tx, done_rx) = oneshot::channel();
        let coordinator = Arc::clone(&self.coordinator);
        let cancel = self.shutdown.child_token();

        self.runtime.spawn(async move {
            let result = coordinator.run_once(cancel).await;
            if done_tx.send(result).is_err() {
                debug!("Worker caller went away before the run finished");
            }
        });

        done_rx.blocking_recv().map_err(|_| SyncError::Interrupted)?
    }

    /// Async counterpart of [`do_work`](Self::do_work).
    pub async fn run(&self) -> Result<Option<RunReport>> {
        self.coordinator.run_once(self.shutdown.child_token()).await
    }

    /// Cancels the current and any future run started by this worker.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Handler that runs one pass whenever the executor fires the task.
    pub fn task_handler(&self) -> TaskHandler {
        let worker = self.clone();
        Arc::new(move || {
            let worker = worker.clone();
            async move {
                match worker.run().await {
                    Ok(_) => Ok(()),
                    // Another trigger raced this one; the active run covers it
                    Err(SyncError::RunInProgress { .. }) => Ok(()),
                    Err(e) => {
                        warn!(error = %e, "Scheduled backup run failed");
                        Err(BridgeError::OperationFailed(e.to_string()))
                    }
                }
            }
            .boxed()
        })
    }

    /// Registers [`task_handler`](Self::task_handler) under the configured
    /// task name.
    pub async fn register(&self, executor: &dyn BackgroundExecutor) -> Result<()> {
        let task_name = self.coordinator.config().task_name.clone();
        executor
            .register_handler(&task_name, self.task_handler())
            .await?;
        debug!(task_name = %task_name, "Backup worker registered");
        Ok(())
    }
}
