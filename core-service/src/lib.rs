//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (media library,
//! change source, HTTP, filesystem, settings, background work) into the
//! backup engine. Desktop apps typically enable the `desktop-shims` feature
//! (which depends on `bridge-desktop`) and let `CoreConfig` fill in default
//! bridges; mobile hosts inject their own.
//!
//! ```ignore
//! use core_runtime::CoreConfig;
//! use core_service::CoreService;
//! use core_sync::SyncConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/backup.db")
//!     .cache_dir("/data/cache")
//!     .media_library(library)
//!     .change_source(source)
//!     .enable_auto_backup(true)
//!     .build()?;
//!
//! let core = CoreService::bootstrap(config, SyncConfig::new(endpoint, user_id)).await?;
//! let mut events = core.events();
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{BackgroundExecutor, ExistingWorkPolicy, TaskConstraints, TaskId};
use core_runtime::events::{EventBus, EventStream, DEFAULT_EVENT_BUFFER_SIZE};
use core_runtime::CoreConfig;
use core_sync::{
    BackupCoordinator, BackupWorker, RunReport, SyncConfig, TriggerScheduler, UploadPipeline,
    Watermark, WatermarkStore,
};
use tracing::{info, instrument, warn};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::{FolderMediaLibrary, PollingChangeSource, SqliteSettingsStore};
#[cfg(feature = "desktop-shims")]
use std::path::PathBuf;

/// Primary façade exposed to host applications.
pub struct CoreService {
    sync_config: SyncConfig,
    coordinator: Arc<BackupCoordinator>,
    worker: BackupWorker,
    scheduler: Option<TriggerScheduler>,
    executor: Arc<dyn BackgroundExecutor>,
    event_bus: EventBus,
}

impl CoreService {
    /// Builds the engine from validated configuration.
    ///
    /// Registers the backup worker with the background executor and, when
    /// `enable_auto_backup` is set, arms the trigger scheduler.
    ///
    /// Must be called from within a Tokio runtime; the worker keeps a handle
    /// to it for blocking entry points.
    #[instrument(skip_all, fields(task_name = %sync_config.task_name))]
    pub async fn bootstrap(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        config.validate()?;
        sync_config.validate()?;

        let event_bus = EventBus::new(DEFAULT_EVENT_BUFFER_SIZE);
        let pipeline = UploadPipeline::from_config(
            &sync_config,
            Arc::clone(&config.media_library),
            Arc::clone(&config.file_system),
            Arc::clone(&config.http_client),
        );
        let watermarks = WatermarkStore::new(
            Arc::clone(&config.settings_store),
            sync_config.namespace.clone(),
        );
        let coordinator = Arc::new(BackupCoordinator::new(
            sync_config.clone(),
            Arc::clone(&config.media_library),
            watermarks,
            Arc::new(pipeline),
            event_bus.clone(),
            Arc::clone(&config.clock),
        ));

        let worker = BackupWorker::current(Arc::clone(&coordinator))
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
        worker.register(config.background_executor.as_ref()).await?;

        let scheduler = config.change_source.as_ref().map(|source| {
            TriggerScheduler::from_config(
                Arc::clone(source),
                Arc::clone(&config.background_executor),
                event_bus.clone(),
                &sync_config,
            )
        });

        let service = Self {
            sync_config,
            coordinator,
            worker,
            scheduler,
            executor: Arc::clone(&config.background_executor),
            event_bus,
        };

        if config.features.enable_auto_backup {
            service.start_auto_backup().await?;
        }

        info!(
            auto_backup = config.features.enable_auto_backup,
            "Backup core initialized"
        );
        Ok(service)
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync_config
    }

    /// Subscribes to run and scheduler events.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Entry point for host background work systems.
    pub fn worker(&self) -> &BackupWorker {
        &self.worker
    }

    /// Starts reacting to change signals.
    pub async fn start_auto_backup(&self) -> Result<()> {
        let scheduler = self.scheduler.as_ref().ok_or_else(|| CoreError::CapabilityMissing {
            capability: "ChangeSignalSource".to_string(),
            message: "Auto backup needs a change source. \
                      Desktop: use PollingChangeSource or ManualChangeSource. \
                      Mobile: inject the platform content observer."
                .to_string(),
        })?;

        if !scheduler.is_running() {
            scheduler.start().await?;
        }
        Ok(())
    }

    /// Stops reacting to change signals. Pending or running work continues.
    pub async fn stop_auto_backup(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
        }
    }

    pub fn is_auto_backup_running(&self) -> bool {
        self.scheduler
            .as_ref()
            .is_some_and(|scheduler| scheduler.is_running())
    }

    /// Enqueues a run through the background executor without debouncing.
    pub async fn trigger(&self) -> Result<TaskId> {
        let task_id = match &self.scheduler {
            Some(scheduler) => scheduler.trigger_now().await?,
            None => {
                self.executor
                    .enqueue_unique(
                        &self.sync_config.task_name,
                        Duration::ZERO,
                        ExistingWorkPolicy::Replace,
                        TaskConstraints::default(),
                    )
                    .await?
            }
        };
        Ok(task_id)
    }

    /// Runs one backup pass on the caller's task and waits for it.
    pub async fn run_now(&self) -> Result<Option<RunReport>> {
        Ok(self.worker.run().await?)
    }

    pub async fn watermark(&self) -> Result<Watermark> {
        Ok(self.coordinator.watermarks().read().await?)
    }

    /// Forgets all backup progress, e.g. when the user signs out.
    ///
    /// The next run treats the whole inventory as new.
    pub async fn reset_watermark(&self) -> Result<()> {
        if self.coordinator.is_run_active() {
            return Err(CoreError::Sync(core_sync::SyncError::RunInProgress {
                task_name: self.sync_config.task_name.clone(),
            }));
        }
        warn!("Resetting backup watermark");
        Ok(self.coordinator.watermarks().reset().await?)
    }

    /// Stops the scheduler and interrupts any active run.
    pub async fn shutdown(&self) {
        self.stop_auto_backup().await;
        self.worker.shutdown();
        if let Some(run_id) = self.coordinator.cancel_active() {
            info!(run_id = %run_id, "Active backup run interrupted by shutdown");
        }
    }
}

/// Convenience bootstrapper for desktop hosts backing up a photo folder.
///
/// Uses `FolderMediaLibrary` over `media_root`, a `PollingChangeSource` with
/// `poll_interval`, a SQLite settings store under `data_dir`, and the desktop
/// defaults for every other bridge.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    media_root: impl Into<PathBuf>,
    data_dir: impl Into<PathBuf>,
    poll_interval: Duration,
    sync_config: SyncConfig,
) -> Result<CoreService> {
    let data_dir = data_dir.into();
    let database_path = data_dir.join("backup.db");
    let library = Arc::new(FolderMediaLibrary::new(media_root));
    let source = Arc::new(PollingChangeSource::new(Arc::clone(&library), poll_interval));

    // Opened here so the pool lives on the caller's runtime
    let settings = SqliteSettingsStore::new(database_path.clone()).await?;

    let config = CoreConfig::builder()
        .database_path(database_path)
        .cache_dir(data_dir.join("cache"))
        .media_library(library)
        .settings_store(Arc::new(settings))
        .change_source(source)
        .enable_auto_backup(true)
        .build()?;

    CoreService::bootstrap(config, sync_config).await
}
