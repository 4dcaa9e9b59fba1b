mod orchestrator;
mod worker;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::sync::Mutex;
use anyhow::Result;
use tracing::info;

pub use orchestrator::{HandleOutcome, TaskOrchestrator};
pub use worker::TaskWorker;

use crate::schedule::admission::AdmissionController;
use crate::schedule::queue::TaskQueue;

pub struct TaskScheduler {
    orchestrator: Arc<TaskOrchestrator>,
    queue: Arc<dyn TaskQueue>,
    admission: Arc<AdmissionController>,
    poll_interval: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        orchestrator: Arc<TaskOrchestrator>,
        queue: Arc<dyn TaskQueue>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            admission,
            poll_interval: Duration::from_secs(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn spawn_worker(&self) {
        let mut workers = self.workers.lock().await;
        let worker = TaskWorker::new(
            workers.len() + 1,
            self.orchestrator.clone(),
            self.queue.clone(),
            self.admission.gate().clone(),
        )
        .with_interval(self.poll_interval);
        let handle = tokio::spawn(async move {
            worker.run().await;
        });
        workers.push(handle);
    }

    pub async fn run(&self) -> Result<()> {
        // memory monitor runs beside the workers and only touches the intake gate
        info!(
            "Starting memory monitor, interval {:?}",
            self.admission.monitor_interval()
        );
        let monitor = tokio::spawn(self.admission.clone().run_monitor());

        // wait for all workers to finish
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in handles {
            worker.await?;
        }

        monitor.abort();
        Ok(())
    }
}
