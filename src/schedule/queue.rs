use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::watch;

use crate::schedule::types::{CreateTaskMessage, TaskId};

/// At-least-once transport for task-creation notifications.
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    async fn publish(&self, message: CreateTaskMessage) -> Result<()>;
    /// Takes the next notification, or `None` when the queue is currently empty.
    async fn receive(&self) -> Result<Option<CreateTaskMessage>>;
}

/// Pause/resume switch in front of the queue. Workers wait here before
/// receiving; pausing never interrupts a task already being processed.
#[derive(Clone)]
pub struct IntakeGate {
    paused: Arc<watch::Sender<bool>>,
}

impl Default for IntakeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl IntakeGate {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
        }
    }

    /// Returns true if the gate was open before.
    pub fn pause(&self) -> bool {
        !self.paused.send_replace(true)
    }

    /// Returns true if the gate was paused before.
    pub fn resume(&self) -> bool {
        self.paused.send_replace(false)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub async fn wait_until_open(&self) {
        let mut rx = self.paused.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

/// In-process queue.
#[derive(Default)]
pub struct ChannelTaskQueue {
    messages: Mutex<VecDeque<CreateTaskMessage>>,
}

impl ChannelTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for ChannelTaskQueue {
    async fn publish(&self, message: CreateTaskMessage) -> Result<()> {
        let mut messages = self.messages.lock().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        messages.push_back(message);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<CreateTaskMessage>> {
        let mut messages = self.messages.lock().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(messages.pop_front())
    }
}

/// Queue stored in the `task_messages` table, shared with the API layer
/// through the same database.
pub struct SqliteTaskQueue {
    pool: SqlitePool,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn publish(&self, message: CreateTaskMessage) -> Result<()> {
        sqlx::query("INSERT INTO task_messages (task_id, created_at) VALUES (?, ?)")
            .bind(message.task_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<CreateTaskMessage>> {
        let task_id: Option<TaskId> = sqlx::query_scalar(
            r#"
            DELETE FROM task_messages
            WHERE id = (SELECT id FROM task_messages ORDER BY id LIMIT 1)
            RETURNING task_id
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(task_id.map(CreateTaskMessage::new))
    }
}
