use std::sync::Arc;

use crate::error::{TaskError, TaskResult};
use crate::schedule::types::{TaskId, TaskStatus};
use crate::storage::task::TaskRepository;

/// Polls the persisted status at pipeline checkpoints. Cancellation is only
/// observed here; calls already in flight are never interrupted.
#[derive(Clone)]
pub struct CancellationMonitor {
    repository: Arc<dyn TaskRepository>,
}

impl CancellationMonitor {
    pub fn new(repository: Arc<dyn TaskRepository>) -> Self {
        Self { repository }
    }

    /// Fails with `TaskError::Cancelled` if the task has been cancelled.
    /// A vanished record is not treated as a cancellation.
    pub async fn checkpoint(&self, task_id: TaskId) -> TaskResult<()> {
        match self.repository.get_status(task_id).await? {
            Some(TaskStatus::Cancelled) => Err(TaskError::Cancelled { task_id }),
            _ => Ok(()),
        }
    }
}
