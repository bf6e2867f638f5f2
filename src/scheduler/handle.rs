//! # Task identity, status and the join handle returned by every spawn.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use super::Scheduler;
use crate::error::TaskError;

/// Identifier of a task in the scheduler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Lifecycle status of a task. Every terminal status is set exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }

    pub(crate) fn of<T>(res: &Result<T, TaskError>) -> Self {
        match res {
            Ok(_) => TaskStatus::Succeeded,
            Err(TaskError::Canceled) => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        }
    }
}

/// Handle to a running or finished task.
///
/// Dropping the handle does **not** cancel the task; use [`TaskHandle::cancel`].
pub struct TaskHandle<T> {
    pub(crate) id: TaskId,
    pub(crate) name: Arc<str>,
    pub(crate) status: watch::Receiver<TaskStatus>,
    pub(crate) result: oneshot::Receiver<Result<T, TaskError>>,
    pub(crate) scheduler: Scheduler,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status (non-blocking).
    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Requests cancellation of the task and its whole subtree.
    pub fn cancel(&self) {
        self.scheduler.cancel(self.id);
    }

    /// Waits until the task reaches a terminal status, without consuming the result.
    pub async fn settled(&mut self) -> TaskStatus {
        match self.status.wait_for(TaskStatus::is_terminal).await {
            Ok(s) => *s,
            Err(_) => TaskStatus::Cancelled,
        }
    }

    /// Waits for the task's outcome.
    ///
    /// Resolves only after the task's cleanup and its children have settled.
    pub async fn join(self) -> Result<T, TaskError> {
        self.result.await.unwrap_or(Err(TaskError::Canceled))
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
