use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{NewTask, TaskRepository};
use crate::schedule::types::{Audio, AudioId, Task, TaskId, TaskStatus};

#[derive(Default)]
struct Tables {
    tasks: HashMap<TaskId, Task>,
    next_task_id: TaskId,
    next_audio_id: AudioId,
}

/// Process-local repository, used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tables: RwLock<Tables>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, new: &NewTask) -> Result<Task> {
        let mut tables = self.tables.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        tables.next_task_id += 1;
        let task_id = tables.next_task_id;

        let mut audios = Vec::with_capacity(new.audios.len());
        for audio in &new.audios {
            tables.next_audio_id += 1;
            audios.push(Audio {
                id: tables.next_audio_id,
                name: audio.name.clone(),
                path: audio.path.clone(),
                content_type: audio.content_type.clone(),
                original_text: audio.original_text.clone(),
                stt_text: None,
                wer: None,
            });
        }

        let now = Utc::now();
        let task = Task {
            id: task_id,
            status: TaskStatus::Pending,
            audios,
            target_languages: new.target_languages.clone(),
            progress: 0.0,
            error_message: None,
            retry_count: 0,
            result_path: None,
            finish_time: None,
            created_at: now,
            updated_at: now,
        };
        tables.tasks.insert(task_id, task.clone());
        Ok(task)
    }

    fn with_task(&self, task_id: TaskId, update: impl FnOnce(&mut Task)) -> Result<()> {
        let mut tables = self.tables.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        if let Some(task) = tables.tasks.get_mut(&task_id) {
            update(task);
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    fn with_audio(&self, audio_id: AudioId, update: impl FnOnce(&mut Audio)) -> Result<()> {
        let mut tables = self.tables.write().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let audio = tables
            .tasks
            .values_mut()
            .flat_map(|task| task.audios.iter_mut())
            .find(|audio| audio.id == audio_id);
        if let Some(audio) = audio {
            update(audio);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>> {
        let tables = self.tables.read().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(tables.tasks.get(&task_id).cloned())
    }

    async fn get_status(&self, task_id: TaskId) -> Result<Option<TaskStatus>> {
        let tables = self.tables.read().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(tables.tasks.get(&task_id).map(|task| task.status))
    }

    async fn update_status(&self, task_id: TaskId, status: TaskStatus) -> Result<()> {
        self.with_task(task_id, |task| task.status = status)
    }

    async fn update_progress(&self, task_id: TaskId, progress: f64) -> Result<()> {
        self.with_task(task_id, |task| task.progress = progress)
    }

    async fn mark_failed(&self, task_id: TaskId, error_message: &str) -> Result<()> {
        self.with_task(task_id, |task| {
            if task.status != TaskStatus::Cancelled {
                task.status = TaskStatus::Failed;
                task.error_message = Some(error_message.to_string());
            }
        })
    }

    async fn mark_succeeded(
        &self,
        task_id: TaskId,
        result_path: &str,
        finish_time: DateTime<Utc>,
    ) -> Result<()> {
        self.with_task(task_id, |task| {
            task.status = TaskStatus::Succeeded;
            task.result_path = Some(result_path.to_string());
            task.error_message = None;
            task.finish_time = Some(finish_time);
        })
    }

    async fn schedule_retry(&self, task_id: TaskId) -> Result<()> {
        self.with_task(task_id, |task| {
            if task.status != TaskStatus::Cancelled {
                task.status = TaskStatus::RetryScheduled;
                task.retry_count += 1;
            }
        })
    }

    async fn update_stt_text(&self, audio_id: AudioId, stt_text: Option<&str>) -> Result<()> {
        self.with_audio(audio_id, |audio| audio.stt_text = stt_text.map(str::to_string))
    }

    async fn update_wer(&self, audio_id: AudioId, wer: f64) -> Result<()> {
        self.with_audio(audio_id, |audio| audio.wer = Some(wer))
    }
}
