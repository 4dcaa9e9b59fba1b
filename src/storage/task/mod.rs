use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::schedule::types::{AudioId, Language, Task, TaskId, TaskStatus};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryTaskRepository;
pub use sqlite::SqliteTaskRepository;

/// Point reads and point updates on task records.
///
/// Updates against a missing record are no-ops, like an `UPDATE` matching no rows.
#[async_trait]
pub trait TaskRepository: Send + Sync + 'static {
    /// Full read of a task with its audios, in task order.
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>>;
    async fn get_status(&self, task_id: TaskId) -> Result<Option<TaskStatus>>;
    async fn update_status(&self, task_id: TaskId, status: TaskStatus) -> Result<()>;
    async fn update_progress(&self, task_id: TaskId, progress: f64) -> Result<()>;
    /// Sets `FAILED` and the error message. A `CANCELLED` task is left as is.
    async fn mark_failed(&self, task_id: TaskId, error_message: &str) -> Result<()>;
    /// Sets `SUCCEEDED`, the result path and finish time, and clears the error message.
    async fn mark_succeeded(
        &self,
        task_id: TaskId,
        result_path: &str,
        finish_time: DateTime<Utc>,
    ) -> Result<()>;
    /// Sets `RETRY_SCHEDULED` and increments the retry count. A `CANCELLED`
    /// task is left as is.
    async fn schedule_retry(&self, task_id: TaskId) -> Result<()>;
    async fn update_stt_text(&self, audio_id: AudioId, stt_text: Option<&str>) -> Result<()>;
    async fn update_wer(&self, audio_id: AudioId, wer: f64) -> Result<()>;
}

/// Audio record as submitted by the API layer.
#[derive(Debug, Clone)]
pub struct NewAudio {
    pub name: String,
    pub path: String,
    pub content_type: String,
    pub original_text: Option<String>,
}

/// Task as submitted by the API layer; inserted as `PENDING`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub audios: Vec<NewAudio>,
    pub target_languages: Vec<Language>,
}
