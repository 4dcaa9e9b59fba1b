use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt::Display;

pub type TaskId = i64;
pub type AudioId = i64;

/// Notification that a task is ready to be processed.
///
/// Delivered at-least-once; redelivery of the same message is how retries
/// reach the workers again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskMessage {
    pub task_id: TaskId,
}

impl CreateTaskMessage {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, waiting for a worker.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Failed and re-published for another attempt.
    RetryScheduled,
    /// Cancelled by an external request.
    Cancelled,
    /// Failed; terminal once retries are exhausted.
    Failed,
    Succeeded,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::RetryScheduled => "RETRY_SCHEDULED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Succeeded => "SUCCEEDED",
        }
    }

    /// Only these states may be claimed by a worker.
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::RetryScheduled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Succeeded
        )
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;
    fn try_from(status: String) -> Result<Self, Self::Error> {
        match status.as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "RETRY_SCHEDULED" => Ok(TaskStatus::RetryScheduled),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            "FAILED" => Ok(TaskStatus::Failed),
            "SUCCEEDED" => Ok(TaskStatus::Succeeded),
            _ => Err(format!("Invalid task status: {}", status)),
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    /// English.
    En,
    /// Chinese (Simplified).
    ZhCn,
    /// Chinese (Traditional).
    ZhTw,
    /// Japanese.
    Ja,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "EN",
            Language::ZhCn => "ZH_CN",
            Language::ZhTw => "ZH_TW",
            Language::Ja => "JA",
        }
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which text a translation was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// Human-provided reference text.
    Text,
    /// Speech-to-text transcript.
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audio {
    pub id: AudioId,
    /// Original file name
    pub name: String,
    /// Object key in the blob store
    pub path: String,
    pub content_type: String,
    pub original_text: Option<String>,
    pub stt_text: Option<String>,
    /// Accuracy score (word error rate) of `stt_text` against `original_text`.
    pub wer: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub audios: Vec<Audio>,
    pub target_languages: Vec<Language>,
    pub progress: f64,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub result_path: Option<String>,
    pub finish_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
