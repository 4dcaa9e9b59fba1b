use async_trait::async_trait;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::{NewTask, TaskRepository};
use crate::schedule::types::{Audio, AudioId, Language, Task, TaskId, TaskStatus};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a `PENDING` task and its audios in one transaction.
    pub async fn insert(&self, new: &NewTask) -> Result<Task> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let task_id = sqlx::query(
            r#"
            INSERT INTO tasks (status, target_languages, progress, retry_count, created_at, updated_at)
            VALUES (?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(serde_json::to_string(&new.target_languages)?)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, audio) in new.audios.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO audios (task_id, position, name, path, content_type, original_text)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(task_id)
            .bind(position as i64)
            .bind(&audio.name)
            .bind(&audio.path)
            .bind(&audio.content_type)
            .bind(&audio.original_text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get(task_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Task {} vanished after insert", task_id))
    }

    fn row_to_audio(row: &SqliteRow) -> Result<Audio> {
        Ok(Audio {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            path: row.try_get("path")?,
            content_type: row.try_get("content_type")?,
            original_text: row.try_get("original_text")?,
            stt_text: row.try_get("stt_text")?,
            wer: row.try_get("wer")?,
        })
    }

    fn row_to_task(row: &SqliteRow, audios: Vec<Audio>) -> Result<Task> {
        let status: String = row.try_get("status")?;
        let languages: String = row.try_get("target_languages")?;
        let target_languages: Vec<Language> = serde_json::from_str(&languages)
            .with_context(|| format!("Invalid target languages: {}", languages))?;
        let retry_count: i64 = row.try_get("retry_count")?;

        Ok(Task {
            id: row.try_get("id")?,
            status: TaskStatus::try_from(status).map_err(anyhow::Error::msg)?,
            audios,
            target_languages,
            progress: row.try_get("progress")?,
            error_message: row.try_get("error_message")?,
            retry_count: u32::try_from(retry_count)?,
            result_path: row.try_get("result_path")?,
            finish_time: row
                .try_get::<Option<String>, _>("finish_time")?
                .map(|t| parse_time(&t))
                .transpose()?,
            created_at: parse_time(row.try_get("created_at")?)?,
            updated_at: parse_time(row.try_get("updated_at")?)?,
        })
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let audio_rows = sqlx::query("SELECT * FROM audios WHERE task_id = ? ORDER BY position")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        let audios = audio_rows
            .iter()
            .map(Self::row_to_audio)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Self::row_to_task(&row, audios)?))
    }

    async fn get_status(&self, task_id: TaskId) -> Result<Option<TaskStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        status
            .map(|s| TaskStatus::try_from(s).map_err(anyhow::Error::msg))
            .transpose()
    }

    async fn update_status(&self, task_id: TaskId, status: TaskStatus) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_progress(&self, task_id: TaskId, progress: f64) -> Result<()> {
        sqlx::query("UPDATE tasks SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(progress)
            .bind(Utc::now().to_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, task_id: TaskId, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status = ?, error_message = ?, updated_at = ? WHERE id = ? AND status != ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .bind(TaskStatus::Cancelled.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        task_id: TaskId,
        result_path: &str,
        finish_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?,
                result_path = ?,
                error_message = NULL,
                finish_time = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(TaskStatus::Succeeded.as_str())
        .bind(result_path)
        .bind(finish_time.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schedule_retry(&self, task_id: TaskId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks SET status = ?, retry_count = retry_count + 1, updated_at = ?
            WHERE id = ? AND status != ?
            "#,
        )
        .bind(TaskStatus::RetryScheduled.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .bind(TaskStatus::Cancelled.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_stt_text(&self, audio_id: AudioId, stt_text: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE audios SET stt_text = ? WHERE id = ?")
            .bind(stt_text)
            .bind(audio_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_wer(&self, audio_id: AudioId, wer: f64) -> Result<()> {
        sqlx::query("UPDATE audios SET wer = ? WHERE id = ?")
            .bind(wer)
            .bind(audio_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
