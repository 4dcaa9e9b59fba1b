use thiserror::Error;

use crate::schedule::types::TaskId;

/// Failures that end one processing attempt of a task.
///
/// A task that is not claimable is not an error (see `HandleOutcome::Skipped`),
/// and exhausted retries are a `RetryDecision`, not an error.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The notification references a task that does not exist. Nothing to
    /// update, so this is never retried.
    #[error("Task {task_id} not found")]
    NotFound { task_id: TaskId },

    /// Cooperative cancellation observed at a checkpoint.
    #[error("[TranslationTask:{task_id}] Task is cancelled, terminating processing")]
    Cancelled { task_id: TaskId },

    /// Anything raised by blob, STT, translation, queue or persistence calls.
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled { .. })
    }
}

pub type TaskResult<T> = Result<T, TaskError>;
