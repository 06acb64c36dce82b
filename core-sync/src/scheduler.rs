//! # Trigger Scheduler
//!
//! Turns bursty change signals into one debounced backup run.
//!
//! The first signal opens a debounce window. Every further signal inside the
//! window pushes the deadline out again; no second timer is created. When the
//! window closes the scheduler enqueues unique work under the configured task
//! name with [`ExistingWorkPolicy::Replace`], so at most one run is ever
//! pending behind the one executing.
//!
//! The subscription stays open while runs execute. Signals that arrive during
//! a run open a new window and lead to exactly one follow-up run.

use crate::config::SyncConfig;
use crate::{Result, SyncError};
use bridge_traits::{
    BackgroundExecutor, ChangeSignalSource, ChangeSignalStream, ExistingWorkPolicy,
    TaskConstraints, TaskId,
};
use core_runtime::events::{CoreEvent, EventBus, SchedulerEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

struct Armed {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TriggerScheduler {
    source: Arc<dyn ChangeSignalSource>,
    executor: Arc<dyn BackgroundExecutor>,
    event_bus: EventBus,
    task_name: String,
    debounce: Duration,
    armed: Mutex<Option<Armed>>,
}

impl TriggerScheduler {
    pub fn new(
        source: Arc<dyn ChangeSignalSource>,
        executor: Arc<dyn BackgroundExecutor>,
        event_bus: EventBus,
        task_name: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            source,
            executor,
            event_bus,
            task_name: task_name.into(),
            debounce,
            armed: Mutex::new(None),
        }
    }

    pub fn from_config(
        source: Arc<dyn ChangeSignalSource>,
        executor: Arc<dyn BackgroundExecutor>,
        event_bus: EventBus,
        config: &SyncConfig,
    ) -> Self {
        Self::new(
            source,
            executor,
            event_bus,
            config.task_name.clone(),
            config.debounce,
        )
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn is_running(&self) -> bool {
        self.armed
            .lock()
            .map(|armed| armed.as_ref().is_some_and(|a| !a.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Subscribes to the change source and spawns the debounce loop.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidStateTransition` if the scheduler is
    /// already running, or the bridge error if subscribing fails.
    #[instrument(skip(self), fields(task_name = %self.task_name))]
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(SyncError::InvalidStateTransition {
                from: "armed".to_string(),
                to: "armed".to_string(),
                reason: format!("Trigger scheduler for {} already started", self.task_name),
            });
        }

        let stream = self.source.subscribe().await?;
        let shutdown = CancellationToken::new();

        let debounce_loop = DebounceLoop {
            executor: Arc::clone(&self.executor),
            event_bus: self.event_bus.clone(),
            task_name: self.task_name.clone(),
            debounce: self.debounce,
        };
        let handle = tokio::spawn(debounce_loop.run(stream, shutdown.clone()));

        let previous = self
            .armed
            .lock()
            .map_err(|_| SyncError::Config("scheduler state poisoned".to_string()))?
            .replace(Armed { shutdown, handle });
        if let Some(previous) = previous {
            previous.shutdown.cancel();
        }

        info!(debounce_ms = self.debounce.as_millis() as u64, "Trigger scheduler armed");
        self.event_bus
            .emit(CoreEvent::Scheduler(SchedulerEvent::Armed {
                task_name: self.task_name.clone(),
            }))
            .ok();
        Ok(())
    }

    /// Stops the debounce loop and waits for it to exit.
    ///
    /// A window that is still open is dropped without enqueueing. Work that
    /// was already enqueued is left to the executor.
    pub async fn shutdown(&self) {
        let armed = match self.armed.lock() {
            Ok(mut armed) => armed.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(armed) = armed {
            armed.shutdown.cancel();
            if let Err(e) = armed.handle.await {
                error!(error = %e, "Trigger scheduler loop panicked");
            }
        }
    }

    /// Enqueues a run immediately, bypassing the debounce window.
    pub async fn trigger_now(&self) -> Result<TaskId> {
        enqueue(&*self.executor, &self.task_name).await
    }
}

async fn enqueue(executor: &dyn BackgroundExecutor, task_name: &str) -> Result<TaskId> {
    Ok(executor
        .enqueue_unique(
            task_name,
            Duration::ZERO,
            ExistingWorkPolicy::Replace,
            TaskConstraints::default(),
        )
        .await?)
}

struct DebounceLoop {
    executor: Arc<dyn BackgroundExecutor>,
    event_bus: EventBus,
    task_name: String,
    debounce: Duration,
}

impl DebounceLoop {
    async fn run(self, mut stream: Box<dyn ChangeSignalStream>, shutdown: CancellationToken) {
        let mut deadline: Option<Instant> = None;
        let mut coalesced: u32 = 0;

        loop {
            let window = sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(pending = coalesced, "Shutdown requested");
                    break;
                }
                _ = window, if deadline.is_some() => {
                    self.flush(coalesced).await;
                    deadline = None;
                    coalesced = 0;
                }
                signal = stream.next() => match signal {
                    Some(_) => {
                        coalesced = coalesced.saturating_add(1);
                        deadline = Some(Instant::now() + self.debounce);
                        debug!(coalesced, "Change signal received, debounce reset");
                    }
                    None => {
                        info!("Change source closed");
                        if deadline.is_some() {
                            self.flush(coalesced).await;
                        }
                        break;
                    }
                },
            }
        }

        self.event_bus
            .emit(CoreEvent::Scheduler(SchedulerEvent::Stopped {
                task_name: self.task_name.clone(),
            }))
            .ok();
    }

    async fn flush(&self, coalesced: u32) {
        match enqueue(&*self.executor, &self.task_name).await {
            Ok(task_id) => {
                info!(task_id = %task_id, coalesced, "Backup run enqueued");
                self.event_bus
                    .emit(CoreEvent::Scheduler(SchedulerEvent::RunEnqueued {
                        task_name: self.task_name.clone(),
                        task_id: task_id.to_string(),
                        coalesced_signals: coalesced,
                    }))
                    .ok();
            }
            Err(e) => {
                error!(error = %e, "Failed to enqueue backup run");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::ManualChangeSource;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{ChangeSignal, TaskHandler, TaskStatus};
    use core_runtime::events::EventStream;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingExecutor {
        enqueued: Mutex<Vec<(String, ExistingWorkPolicy)>>,
    }

    impl RecordingExecutor {
        fn count(&self) -> usize {
            self.enqueued.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BackgroundExecutor for RecordingExecutor {
        async fn register_handler(
            &self,
            _task_name: &str,
            _handler: TaskHandler,
        ) -> BridgeResult<()> {
            Ok(())
        }

        async fn enqueue_unique(
            &self,
            task_name: &str,
            _delay: Duration,
            policy: ExistingWorkPolicy,
            _constraints: TaskConstraints,
        ) -> BridgeResult<TaskId> {
            let mut enqueued = self.enqueued.lock().unwrap();
            enqueued.push((task_name.to_string(), policy));
            Ok(TaskId::new(format!("{}#{}", task_name, enqueued.len())))
        }

        async fn cancel_task(&self, _task_id: &TaskId) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_task_status(&self, _task_id: &TaskId) -> BridgeResult<TaskStatus> {
            Ok(TaskStatus::Scheduled)
        }

        async fn list_tasks(&self) -> BridgeResult<Vec<TaskId>> {
            Ok(Vec::new())
        }
    }

    /// Signal source whose stream ends when the sender is dropped.
    struct ChannelSource {
        receiver: Mutex<Option<mpsc::UnboundedReceiver<ChangeSignal>>>,
    }

    struct ChannelStream(mpsc::UnboundedReceiver<ChangeSignal>);

    #[async_trait]
    impl ChangeSignalStream for ChannelStream {
        async fn next(&mut self) -> Option<ChangeSignal> {
            self.0.recv().await
        }
    }

    #[async_trait]
    impl ChangeSignalSource for ChannelSource {
        async fn subscribe(&self) -> BridgeResult<Box<dyn ChangeSignalStream>> {
            let receiver = self.receiver.lock().unwrap().take().unwrap();
            Ok(Box::new(ChannelStream(receiver)))
        }
    }

    fn scheduler(
        source: Arc<dyn ChangeSignalSource>,
    ) -> (TriggerScheduler, Arc<RecordingExecutor>, EventBus) {
        let executor = Arc::new(RecordingExecutor::default());
        let bus = EventBus::new(32);
        let scheduler = TriggerScheduler::new(
            source,
            executor.clone(),
            bus.clone(),
            "media_backup",
            Duration::from_secs(3),
        );
        (scheduler, executor, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_inside_window_enqueues_once() {
        let source = Arc::new(ManualChangeSource::new());
        let (scheduler, executor, bus) = scheduler(source.clone());
        let mut enqueued = EventStream::new(bus.subscribe()).filter(|event| {
            matches!(event, CoreEvent::Scheduler(SchedulerEvent::RunEnqueued { .. }))
        });
        scheduler.start().await.unwrap();

        source.notify();
        sleep(Duration::from_secs(1)).await;
        source.notify();
        sleep(Duration::from_secs(1)).await;
        source.notify();

        // Deadline was pushed to t=5s by the last signal
        sleep(Duration::from_millis(2_900)).await;
        assert_eq!(executor.count(), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(executor.count(), 1);
        assert_eq!(
            executor.enqueued.lock().unwrap()[0],
            ("media_backup".to_string(), ExistingWorkPolicy::Replace)
        );
        assert_eq!(
            enqueued.recv().await.unwrap(),
            CoreEvent::Scheduler(SchedulerEvent::RunEnqueued {
                task_name: "media_backup".into(),
                task_id: "media_backup#1".into(),
                coalesced_signals: 3,
            })
        );

        sleep(Duration::from_secs(30)).await;
        assert_eq!(executor.count(), 1);

        scheduler.shutdown().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_enqueue_separately() {
        let source = Arc::new(ManualChangeSource::new());
        let (scheduler, executor, _bus) = scheduler(source.clone());
        scheduler.start().await.unwrap();

        source.notify();
        sleep(Duration::from_secs(4)).await;
        assert_eq!(executor.count(), 1);

        source.notify();
        sleep(Duration::from_secs(4)).await;
        assert_eq!(executor.count(), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_source_flushes_pending_window() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let source = Arc::new(ChannelSource {
            receiver: Mutex::new(Some(receiver)),
        });
        let (scheduler, executor, _bus) = scheduler(source);
        scheduler.start().await.unwrap();

        sender.send(ChangeSignal).unwrap();
        drop(sender);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(executor.count(), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_open_window() {
        let source = Arc::new(ManualChangeSource::new());
        let (scheduler, executor, _bus) = scheduler(source.clone());
        scheduler.start().await.unwrap();
        assert!(scheduler.start().await.is_err());

        source.notify();
        sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;
        sleep(Duration::from_secs(10)).await;

        assert_eq!(executor.count(), 0);
        assert_eq!(source.notify(), 0);
    }

    #[tokio::test]
    async fn test_trigger_now_bypasses_debounce() {
        let (scheduler, executor, _bus) = scheduler(Arc::new(ManualChangeSource::new()));
        let task_id = scheduler.trigger_now().await.unwrap();
        assert_eq!(task_id, TaskId::new("media_backup#1"));
        assert_eq!(executor.count(), 1);
    }
}
