use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};
use anyhow::Result;

use crate::error::TaskError;
use crate::schedule::queue::{IntakeGate, TaskQueue};
use super::{HandleOutcome, TaskOrchestrator};

/// Consumes notifications one at a time; a notification is handled to
/// completion before the next one is received.
pub struct TaskWorker {
    // worker number, for logs
    id: usize,
    orchestrator: Arc<TaskOrchestrator>,
    queue: Arc<dyn TaskQueue>,
    gate: IntakeGate,
    // interval for polling an empty queue. e.g. 1 second
    interval: Duration,
}

impl TaskWorker {
    pub fn new(
        id: usize,
        orchestrator: Arc<TaskOrchestrator>,
        queue: Arc<dyn TaskQueue>,
        gate: IntakeGate,
    ) -> Self {
        Self {
            id,
            orchestrator,
            queue,
            gate,
            interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(&self) {
        info!("Worker {} started", self.id);
        loop {
            match self.process_next_task().await {
                Ok(true) => continue,  // continue to process next task
                Ok(false) => sleep(self.interval).await, // no task, wait
                Err(e) => {
                    error!("Worker {} failed to receive task: {:#}", self.id, e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Returns `Ok(false)` when the queue was empty.
    pub async fn process_next_task(&self) -> Result<bool> {
        self.gate.wait_until_open().await;

        let Some(message) = self.queue.receive().await? else {
            return Ok(false);
        };

        match self.orchestrator.handle(message).await {
            Ok(HandleOutcome::Deferred) => {
                debug!("Worker {} deferred task {}", self.id, message.task_id);
            }
            Ok(outcome) => {
                debug!("Worker {} handled task {}: {:?}", self.id, message.task_id, outcome);
            }
            Err(TaskError::NotFound { task_id }) => {
                error!("[TranslationTask:{}] Task not found, dropping notification", task_id);
            }
            Err(e) => {
                // the notification is dropped; redelivery only happens through the retry policy
                error!("[TranslationTask:{}] Failed to handle notification: {:#}", message.task_id, e);
            }
        }
        Ok(true)
    }
}
