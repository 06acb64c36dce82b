//! Background Execution and Unique Work Scheduling
//!
//! Provides platform-aware scheduling of named one-shot work.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;

/// Work executed when a scheduled task fires.
pub type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Task execution constraints
#[derive(Debug, Clone)]
pub struct TaskConstraints {
    /// Require WiFi connection
    pub requires_wifi: bool,
    /// Require any network connection
    pub requires_network: bool,
    /// Require device to be charging
    pub requires_charging: bool,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            requires_wifi: false,
            requires_network: true,
            requires_charging: false,
        }
    }
}

/// What to do when work with the same unique name is already pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingWorkPolicy {
    /// Drop the pending (not yet started) work and schedule the new one
    #[default]
    Replace,
    /// Leave the pending work in place and ignore the new request
    Keep,
}

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is scheduled but not yet running
    Scheduled,
    /// Task is currently executing
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed
    Failed,
    /// Task was cancelled or replaced before it started
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Background task executor trait
///
/// Abstracts platform-specific deferred work:
/// - **Android**: WorkManager `enqueueUniqueWork`
/// - **iOS**: BGTaskScheduler
/// - **Desktop**: Tokio tasks
///
/// # Unique Work
///
/// Work is keyed by a unique task name. At most one instance per name runs at
/// a time, and at most one further instance may wait behind it. Enqueueing
/// with [`ExistingWorkPolicy::Replace`] swaps out a pending instance but never
/// interrupts one that has already started.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{BackgroundExecutor, ExistingWorkPolicy, TaskConstraints};
/// use std::time::Duration;
///
/// async fn trigger_backup(executor: &dyn BackgroundExecutor) -> Result<()> {
///     executor
///         .enqueue_unique(
///             "media_backup",
///             Duration::ZERO,
///             ExistingWorkPolicy::Replace,
///             TaskConstraints::default(),
///         )
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Register the work performed for a unique task name.
    ///
    /// Registering again for the same name replaces the previous handler.
    async fn register_handler(&self, task_name: &str, handler: TaskHandler) -> Result<()>;

    /// Enqueue one-shot work for a unique task name.
    ///
    /// # Arguments
    ///
    /// * `task_name` - Unique work name; a handler must be registered for it
    /// * `delay` - Initial delay before the work becomes eligible to run
    /// * `policy` - Behaviour when work with this name is already pending
    /// * `constraints` - Execution constraints (network, charging, etc.)
    ///
    /// # Errors
    ///
    /// Returns an error if no handler is registered for `task_name`.
    async fn enqueue_unique(
        &self,
        task_name: &str,
        delay: Duration,
        policy: ExistingWorkPolicy,
        constraints: TaskConstraints,
    ) -> Result<TaskId>;

    /// Cancel a scheduled task. Running work is left to finish.
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;

    /// Get status of a task
    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// List all known tasks
    async fn list_tasks(&self) -> Result<Vec<TaskId>>;

    /// Check if background execution is available
    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_constraints() {
        let constraints = TaskConstraints {
            requires_wifi: true,
            ..Default::default()
        };

        assert!(constraints.requires_wifi);
        assert!(constraints.requires_network);
        assert!(!constraints.requires_charging);
    }

    #[test]
    fn test_default_policy_replaces() {
        assert_eq!(ExistingWorkPolicy::default(), ExistingWorkPolicy::Replace);
    }

    #[test]
    fn test_terminal_status() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Scheduled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
