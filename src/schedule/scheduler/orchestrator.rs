use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::asr::{word_error_rate, AudioUpload, SpeechToText};
use crate::error::{TaskError, TaskResult};
use crate::schedule::admission::AdmissionController;
use crate::schedule::aggregator::{result_path, ResultAggregator, RESULT_CONTENT_TYPE};
use crate::schedule::cancel::CancellationMonitor;
use crate::schedule::queue::TaskQueue;
use crate::schedule::retry::{RetryDecision, RetryPolicy};
use crate::schedule::types::{
    Audio, AudioId, CreateTaskMessage, Language, SourceKind, Task, TaskId, TaskStatus,
};
use crate::storage::blob::BlobStore;
use crate::storage::task::TaskRepository;
use crate::translate::Translator;

/// How one notification was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Refused under memory pressure and re-published.
    Deferred,
    /// The task could not be loaded; the notification was re-published
    /// unchanged.
    Redelivered,
    /// Task was not `PENDING`/`RETRY_SCHEDULED`; nothing was touched.
    Skipped(TaskStatus),
    /// Cancellation observed at a checkpoint.
    Cancelled,
    Succeeded { result_path: String },
    /// Attempt failed; the task is `FAILED` and possibly re-scheduled.
    Failed(RetryDecision),
}

/// Drives one task through transcription, scoring, translation and packing.
pub struct TaskOrchestrator {
    repository: Arc<dyn TaskRepository>,
    blob_store: Arc<dyn BlobStore>,
    stt: Arc<dyn SpeechToText>,
    translator: Arc<dyn Translator>,
    queue: Arc<dyn TaskQueue>,
    admission: Arc<AdmissionController>,
    cancellation: CancellationMonitor,
    retry_policy: RetryPolicy,
}

impl TaskOrchestrator {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        blob_store: Arc<dyn BlobStore>,
        stt: Arc<dyn SpeechToText>,
        translator: Arc<dyn Translator>,
        queue: Arc<dyn TaskQueue>,
        admission: Arc<AdmissionController>,
    ) -> Self {
        Self {
            cancellation: CancellationMonitor::new(repository.clone()),
            repository,
            blob_store,
            stt,
            translator,
            queue,
            admission,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Handles one task-creation notification.
    ///
    /// Only `NotFound` and failures of the failure bookkeeping itself come back
    /// as errors; processing failures are recorded on the task and routed
    /// through the retry policy.
    pub async fn handle(&self, message: CreateTaskMessage) -> TaskResult<HandleOutcome> {
        let task_id = message.task_id;
        let log_prefix = format!("[TranslationTask:{}]", task_id);

        if !self.admission.should_admit() {
            warn!("{} Skipping task processing under memory pressure", log_prefix);
            self.admission.pause_intake();
            self.publish(task_id, &log_prefix).await;
            return Ok(HandleOutcome::Deferred);
        }
        info!("{} Received translation task create message", log_prefix);

        let task = match self.repository.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return Err(TaskError::NotFound { task_id }),
            Err(e) => {
                // no snapshot to record a failure against, so hand the notification back
                error!("{} Failed to load task, re-publishing: {:#}", log_prefix, e);
                self.publish(task_id, &log_prefix).await;
                return Ok(HandleOutcome::Redelivered);
            }
        };
        if !task.status.is_claimable() {
            warn!("{} Skip processing task because status is {}", log_prefix, task.status);
            return Ok(HandleOutcome::Skipped(task.status));
        }

        let started = Instant::now();
        match self.process(&task).await {
            Ok(path) => {
                info!(
                    "{} Task processed successfully, cost {:?}",
                    log_prefix,
                    started.elapsed()
                );
                Ok(HandleOutcome::Succeeded { result_path: path })
            }
            Err(TaskError::Cancelled { .. }) => {
                info!("{} Task is cancelled, terminating processing", log_prefix);
                Ok(HandleOutcome::Cancelled)
            }
            Err(e) => {
                error!("{} Failed to process task: {:#}", log_prefix, e);
                self.fail(&task, &e, &log_prefix).await
            }
        }
    }

    async fn process(&self, task: &Task) -> TaskResult<String> {
        let task_id = task.id;

        self.cancellation.checkpoint(task_id).await?;
        self.repository.update_status(task_id, TaskStatus::Running).await?;
        info!("[TranslationTask:{}] Change translation task status to RUNNING", task_id);

        let mut aggregator = ResultAggregator::new();
        let total = task.audios.len();
        for (i, audio) in task.audios.iter().enumerate() {
            self.cancellation.checkpoint(task_id).await?;
            let log_prefix = format!(
                "[TranslationTask:{}, Audio({}/{}):{}]",
                task_id,
                i + 1,
                total,
                audio.id
            );

            info!("{} Start calling Whisper service", log_prefix);
            let stt_text = self.transcribe_and_save(audio).await?;
            info!("{} Finished calling Whisper service and saved STT text", log_prefix);

            if let (Some(original_text), Some(stt_text)) =
                (audio.original_text.as_deref(), stt_text.as_deref())
            {
                self.cancellation.checkpoint(task_id).await?;
                let wer = word_error_rate(original_text, stt_text);
                self.repository.update_wer(audio.id, wer).await?;
                info!("{} Saved WER = {}", log_prefix, wer);

                self.cancellation.checkpoint(task_id).await?;
                info!("{} Start calling translation service", log_prefix);
                self.translate_into(
                    &mut aggregator,
                    audio.id,
                    original_text,
                    stt_text,
                    &task.target_languages,
                )
                .await?;
                info!("{} Finished calling translation service", log_prefix);
            }

            let progress = (i + 1) as f64 / total as f64;
            self.repository.update_progress(task_id, progress).await?;
        }
        if total == 0 {
            self.repository.update_progress(task_id, 1.0).await?;
        }

        self.cancellation.checkpoint(task_id).await?;
        let path = result_path(task_id);
        info!("[TranslationTask:{}] Packing and uploading translation results", task_id);
        let packed = aggregator.pack()?;
        self.blob_store
            .put(&path, packed, RESULT_CONTENT_TYPE)
            .await
            .with_context(|| format!("Failed to upload result {}", path))?;
        info!("[TranslationTask:{}] Uploaded translation results to {}", task_id, path);

        self.cancellation.checkpoint(task_id).await?;
        self.repository.mark_succeeded(task_id, &path, Utc::now()).await?;
        Ok(path)
    }

    async fn transcribe_and_save(&self, audio: &Audio) -> TaskResult<Option<String>> {
        let data = self
            .blob_store
            .get(&audio.path)
            .await
            .with_context(|| format!("Failed to fetch audio {}", audio.path))?;
        let stt_text = self
            .stt
            .transcribe(AudioUpload {
                file_name: audio.name.clone(),
                content_type: audio.content_type.clone(),
                data,
            })
            .await
            .with_context(|| format!("Failed to transcribe audio {}", audio.id))?;
        self.repository
            .update_stt_text(audio.id, stt_text.as_deref())
            .await?;
        Ok(stt_text)
    }

    /// Translates the reference text and the transcript separately.
    async fn translate_into(
        &self,
        aggregator: &mut ResultAggregator,
        audio_id: AudioId,
        original_text: &str,
        stt_text: &str,
        languages: &[Language],
    ) -> TaskResult<()> {
        let original = self
            .translator
            .translate(original_text, languages)
            .await
            .with_context(|| format!("Failed to translate original text of audio {}", audio_id))?;
        let transcript = self
            .translator
            .translate(stt_text, languages)
            .await
            .with_context(|| format!("Failed to translate STT text of audio {}", audio_id))?;

        aggregator.put_all(audio_id, SourceKind::Text, original);
        aggregator.put_all(audio_id, SourceKind::Audio, transcript);
        Ok(())
    }

    async fn fail(
        &self,
        task: &Task,
        error: &TaskError,
        log_prefix: &str,
    ) -> TaskResult<HandleOutcome> {
        // a cancel that landed during the failed call wins over the failure
        if let Err(TaskError::Cancelled { .. }) = self.cancellation.checkpoint(task.id).await {
            info!("{} Task was cancelled while failing, skipping retry", log_prefix);
            return Ok(HandleOutcome::Cancelled);
        }
        self.repository
            .mark_failed(task.id, &format!("{:#}", error))
            .await?;

        let decision = self.retry_policy.decide(task.retry_count);
        match decision {
            RetryDecision::Retry { .. } => {
                info!(
                    "{} Retrying task, current retry count: {}, max retries: {}",
                    log_prefix,
                    task.retry_count,
                    self.retry_policy.max_retries()
                );
                self.repository.schedule_retry(task.id).await?;
                self.publish(task.id, log_prefix).await;
            }
            RetryDecision::Exhausted => {
                warn!("{} Retry skipped: max retry reached", log_prefix);
            }
        }
        Ok(HandleOutcome::Failed(decision))
    }

    /// Publishes a creation notification. A notification that cannot be
    /// published would strand the task, so the task is marked `FAILED` instead.
    async fn publish(&self, task_id: TaskId, log_prefix: &str) {
        match self.queue.publish(CreateTaskMessage::new(task_id)).await {
            Ok(()) => info!("{} Successfully sent task create message", log_prefix),
            Err(e) => {
                error!(
                    "{} Failed to send task create message. Marking task as FAILED: {:#}",
                    log_prefix, e
                );
                if let Err(e) = self.repository.mark_failed(task_id, &format!("{:#}", e)).await {
                    error!("{} Failed to mark task as FAILED: {:#}", log_prefix, e);
                }
            }
        }
    }
}
