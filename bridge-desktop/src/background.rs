//! Background Task Execution Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{
        BackgroundExecutor, ExistingWorkPolicy, TaskConstraints, TaskHandler, TaskId, TaskStatus,
    },
    error::{BridgeError, Result},
    time::{Clock, SystemClock},
};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Finished task records kept for status queries before they are pruned.
const MAX_TRACKED_TASKS: usize = 64;

/// Tokio-based background executor for desktop.
///
/// Every unique task name owns a run lock. An enqueued instance first waits
/// out its delay, then waits for the lock, and only then leaves the pending
/// slot. Until that moment it can be replaced or cancelled; afterwards it
/// runs to completion.
pub struct TokioBackgroundExecutor {
    state: Arc<Mutex<WorkState>>,
    handlers: Arc<RwLock<HashMap<String, TaskHandler>>>,
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

#[derive(Default)]
struct WorkState {
    tasks: HashMap<TaskId, TaskInfo>,
    /// Unique name -> the instance currently waiting to start
    pending: HashMap<String, TaskId>,
}

struct TaskInfo {
    status: TaskStatus,
    cancel: Option<oneshot::Sender<()>>,
    enqueued_at: i64,
    finished_at: Option<i64>,
}

impl WorkState {
    fn prune_finished(&mut self) {
        if self.tasks.len() <= MAX_TRACKED_TASKS {
            return;
        }

        let mut finished: Vec<(TaskId, i64)> = self
            .tasks
            .iter()
            .filter(|(_, info)| info.status.is_terminal())
            .map(|(id, info)| (id.clone(), info.finished_at.unwrap_or(info.enqueued_at)))
            .collect();
        finished.sort_by_key(|(_, at)| *at);

        let excess = self.tasks.len() - MAX_TRACKED_TASKS;
        for (id, _) in finished.into_iter().take(excess) {
            self.tasks.remove(&id);
        }
    }
}

impl TokioBackgroundExecutor {
    /// Create a new background executor.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a background executor that stamps task records with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(WorkState::default())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            run_locks: Mutex::new(HashMap::new()),
            clock,
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a closure-based handler for a unique task name.
    pub async fn register_task_handler<F, Fut>(&self, task_name: &str, handler: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.register_handler(task_name, Arc::new(move || handler().boxed()))
            .await
    }

    async fn handler_for(&self, task_name: &str) -> Option<TaskHandler> {
        let handlers = self.handlers.read().await;
        handlers.get(task_name).cloned()
    }

    async fn run_lock_for(&self, task_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        Arc::clone(
            locks
                .entry(task_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn next_task_id(&self, task_name: &str) -> TaskId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        TaskId::new(format!("{}#{}", task_name, seq))
    }

    fn constraints_satisfied(constraints: &TaskConstraints) -> bool {
        if constraints.requires_wifi || constraints.requires_charging {
            debug!("Desktop executor treats wifi/charging constraints as satisfied");
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_unique_task(
        state: Arc<Mutex<WorkState>>,
        id: TaskId,
        task_name: String,
        handler: TaskHandler,
        delay: Duration,
        run_lock: Arc<Mutex<()>>,
        mut cancel_rx: oneshot::Receiver<()>,
        clock: Arc<dyn Clock>,
    ) {
        let delay_sleep = sleep(delay);
        tokio::pin!(delay_sleep);
        tokio::select! {
            _ = &mut cancel_rx => {
                debug!(task_id = %id, "Pending task cancelled during delay");
                return;
            }
            _ = delay_sleep.as_mut() => {}
        }

        let guard = tokio::select! {
            _ = &mut cancel_rx => {
                debug!(task_id = %id, "Pending task cancelled while waiting for previous run");
                return;
            }
            guard = Arc::clone(&run_lock).lock_owned() => guard,
        };

        {
            let mut state = state.lock().await;
            if state.pending.get(&task_name) != Some(&id) {
                return;
            }
            state.pending.remove(&task_name);
            if let Some(info) = state.tasks.get_mut(&id) {
                info.status = TaskStatus::Running;
                info.cancel = None;
            }
        }

        debug!(task_id = %id, "Running unique task");
        let result = handler().await;

        {
            let mut state = state.lock().await;
            if let Some(info) = state.tasks.get_mut(&id) {
                info.finished_at = Some(clock.unix_timestamp_millis());
                info.status = match result {
                    Ok(()) => TaskStatus::Completed,
                    Err(err) => {
                        warn!(task_id = %id, error = %err, "Unique task failed");
                        TaskStatus::Failed
                    }
                };
            }
        }

        drop(guard);
    }
}

impl Default for TokioBackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundExecutor for TokioBackgroundExecutor {
    async fn register_handler(&self, task_name: &str, handler: TaskHandler) -> Result<()> {
        let mut handlers = self.handlers.write().await;
        handlers.insert(task_name.to_string(), handler);
        debug!(task_name, "Registered task handler");
        Ok(())
    }

    async fn enqueue_unique(
        &self,
        task_name: &str,
        delay: Duration,
        policy: ExistingWorkPolicy,
        constraints: TaskConstraints,
    ) -> Result<TaskId> {
        let handler = self.handler_for(task_name).await.ok_or_else(|| {
            BridgeError::OperationFailed(format!("No handler registered for task: {}", task_name))
        })?;

        if !Self::constraints_satisfied(&constraints) {
            return Err(BridgeError::NotAvailable(format!(
                "Constraints not satisfiable for task: {}",
                task_name
            )));
        }

        let mut state = self.state.lock().await;
        if let Some(existing) = state.pending.get(task_name).cloned() {
            match policy {
                ExistingWorkPolicy::Keep => {
                    debug!(task_name, task_id = %existing, "Keeping pending task");
                    return Ok(existing);
                }
                ExistingWorkPolicy::Replace => {
                    if let Some(info) = state.tasks.get_mut(&existing) {
                        info.status = TaskStatus::Cancelled;
                        info.finished_at = Some(self.clock.unix_timestamp_millis());
                        if let Some(cancel) = info.cancel.take() {
                            let _ = cancel.send(());
                        }
                    }
                    debug!(task_name, replaced = %existing, "Replacing pending task");
                }
            }
        }

        let id = self.next_task_id(task_name);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.tasks.insert(
            id.clone(),
            TaskInfo {
                status: TaskStatus::Scheduled,
                cancel: Some(cancel_tx),
                enqueued_at: self.clock.unix_timestamp_millis(),
                finished_at: None,
            },
        );
        state.pending.insert(task_name.to_string(), id.clone());
        state.prune_finished();
        drop(state);

        debug!(
            task_name,
            task_id = %id,
            delay_ms = delay.as_millis() as u64,
            "Enqueued unique task"
        );

        let run_lock = self.run_lock_for(task_name).await;
        tokio::spawn(Self::run_unique_task(
            Arc::clone(&self.state),
            id.clone(),
            task_name.to_string(),
            handler,
            delay,
            run_lock,
            cancel_rx,
            Arc::clone(&self.clock),
        ));

        Ok(id)
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let info = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| BridgeError::OperationFailed(format!("Task not found: {}", task_id)))?;

        if info.status != TaskStatus::Scheduled {
            debug!(task_id = %task_id, status = ?info.status, "Task no longer pending; nothing to cancel");
            return Ok(());
        }

        info.status = TaskStatus::Cancelled;
        info.finished_at = Some(self.clock.unix_timestamp_millis());
        if let Some(cancel) = info.cancel.take() {
            let _ = cancel.send(());
        }
        state.pending.retain(|_, pending| pending != task_id);

        debug!(task_id = %task_id, "Cancelled task");
        Ok(())
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(task_id)
            .map(|info| info.status.clone())
            .ok_or_else(|| BridgeError::OperationFailed(format!("Task not found: {}", task_id)))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskId>> {
        let state = self.state.lock().await;
        Ok(state.tasks.keys().cloned().collect())
    }
}
