use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::asr::{AudioUpload, SpeechToText};
use crate::config::AdmissionConfig;
use crate::error::TaskError;
use crate::schedule::admission::tests::FixedProbe;
use crate::schedule::admission::AdmissionController;
use crate::schedule::aggregator::ResultArtifact;
use crate::schedule::queue::{ChannelTaskQueue, IntakeGate, TaskQueue};
use crate::schedule::retry::RetryDecision;
use crate::schedule::scheduler::{HandleOutcome, TaskOrchestrator, TaskScheduler};
use crate::schedule::types::*;
use crate::storage::blob::BlobStore;
use crate::storage::task::{InMemoryTaskRepository, NewAudio, NewTask, TaskRepository};
use crate::translate::{Translation, Translator};

#[derive(Debug, Clone, PartialEq)]
enum Write {
    Status(TaskStatus),
    Progress(f64),
    Failed(String),
    Succeeded(String),
    Retry,
    SttText(AudioId, Option<String>),
    Wer(AudioId, f64),
}

/// Records every write the orchestrator makes, then forwards it. The first
/// `load_failures` full reads fail.
struct RecordingRepository {
    inner: Arc<InMemoryTaskRepository>,
    writes: Mutex<Vec<Write>>,
    load_failures: AtomicUsize,
}

impl RecordingRepository {
    fn record(&self, write: Write) {
        self.writes.lock().unwrap().push(write);
    }

    fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    fn progress_writes(&self) -> Vec<f64> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl TaskRepository for RecordingRepository {
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>> {
        let remaining = self.load_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.load_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("database is locked"));
        }
        self.inner.get(task_id).await
    }

    async fn get_status(&self, task_id: TaskId) -> Result<Option<TaskStatus>> {
        self.inner.get_status(task_id).await
    }

    async fn update_status(&self, task_id: TaskId, status: TaskStatus) -> Result<()> {
        self.record(Write::Status(status));
        self.inner.update_status(task_id, status).await
    }

    async fn update_progress(&self, task_id: TaskId, progress: f64) -> Result<()> {
        self.record(Write::Progress(progress));
        self.inner.update_progress(task_id, progress).await
    }

    async fn mark_failed(&self, task_id: TaskId, error_message: &str) -> Result<()> {
        self.record(Write::Failed(error_message.to_string()));
        self.inner.mark_failed(task_id, error_message).await
    }

    async fn mark_succeeded(
        &self,
        task_id: TaskId,
        result_path: &str,
        finish_time: DateTime<Utc>,
    ) -> Result<()> {
        self.record(Write::Succeeded(result_path.to_string()));
        self.inner.mark_succeeded(task_id, result_path, finish_time).await
    }

    async fn schedule_retry(&self, task_id: TaskId) -> Result<()> {
        self.record(Write::Retry);
        self.inner.schedule_retry(task_id).await
    }

    async fn update_stt_text(&self, audio_id: AudioId, stt_text: Option<&str>) -> Result<()> {
        self.record(Write::SttText(audio_id, stt_text.map(str::to_string)));
        self.inner.update_stt_text(audio_id, stt_text).await
    }

    async fn update_wer(&self, audio_id: AudioId, wer: f64) -> Result<()> {
        self.record(Write::Wer(audio_id, wer));
        self.inner.update_wer(audio_id, wer).await
    }
}

#[derive(Default)]
struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such object: {}", path))
    }

    async fn put(&self, path: &str, data: Vec<u8>, _content_type: &str) -> Result<()> {
        self.blobs.lock().unwrap().insert(path.to_string(), data);
        Ok(())
    }
}

/// Transcribes by returning the audio bytes as text. Fails the first
/// `failures` calls, and can cancel a task from inside the call.
#[derive(Default)]
struct FakeStt {
    calls: AtomicUsize,
    failures: usize,
    cancel: Option<(Arc<InMemoryTaskRepository>, TaskId)>,
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, audio: AudioUpload) -> Result<Option<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((repository, task_id)) = &self.cancel {
            repository.update_status(*task_id, TaskStatus::Cancelled).await?;
        }
        if call < self.failures {
            return Err(anyhow::anyhow!("whisper unavailable"));
        }
        let text = String::from_utf8(audio.data)?;
        Ok((!text.is_empty()).then_some(text))
    }
}

/// Translates to `"<LANG>:<text>"`.
#[derive(Default)]
struct FakeTranslator {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, languages: &[Language]) -> Result<Vec<Translation>> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(languages
            .iter()
            .map(|&language| Translation {
                language,
                text: format!("{}:{}", language, text),
            })
            .collect())
    }
}

struct FailingQueue;

#[async_trait]
impl TaskQueue for FailingQueue {
    async fn publish(&self, _message: CreateTaskMessage) -> Result<()> {
        Err(anyhow::anyhow!("broker unreachable"))
    }

    async fn receive(&self) -> Result<Option<CreateTaskMessage>> {
        Ok(None)
    }
}

struct Harness {
    store: Arc<InMemoryTaskRepository>,
    repository: Arc<RecordingRepository>,
    blobs: Arc<MemoryBlobStore>,
    stt: Arc<FakeStt>,
    translator: Arc<FakeTranslator>,
    queue: Arc<ChannelTaskQueue>,
    probe: Arc<FixedProbe>,
    admission: Arc<AdmissionController>,
}

impl Harness {
    fn new() -> Self {
        Self::with_stt(|_| FakeStt::default())
    }

    fn with_stt(stt: impl FnOnce(&Arc<InMemoryTaskRepository>) -> FakeStt) -> Self {
        let store = Arc::new(InMemoryTaskRepository::new());
        let probe = Arc::new(FixedProbe::new(0.5));
        Self {
            repository: Arc::new(RecordingRepository {
                inner: store.clone(),
                writes: Mutex::new(Vec::new()),
                load_failures: AtomicUsize::new(0),
            }),
            stt: Arc::new(stt(&store)),
            store,
            blobs: Arc::new(MemoryBlobStore::default()),
            translator: Arc::new(FakeTranslator::default()),
            queue: Arc::new(ChannelTaskQueue::new()),
            admission: Arc::new(AdmissionController::new(
                probe.clone(),
                IntakeGate::new(),
                AdmissionConfig::default(),
            )),
            probe,
        }
    }

    fn orchestrator(&self) -> TaskOrchestrator {
        self.orchestrator_with_queue(self.queue.clone())
    }

    fn orchestrator_with_queue(&self, queue: Arc<dyn TaskQueue>) -> TaskOrchestrator {
        TaskOrchestrator::new(
            self.repository.clone(),
            self.blobs.clone(),
            self.stt.clone(),
            self.translator.clone(),
            queue,
            self.admission.clone(),
        )
    }

    /// Creates a task whose audios transcribe to the given texts.
    fn create_task(&self, audios: &[(&str, Option<&str>)]) -> Task {
        let mut new_audios = Vec::new();
        for (i, (transcript, original_text)) in audios.iter().enumerate() {
            let mut blobs = self.blobs.blobs.lock().unwrap();
            let path = format!("audio/{}.wav", blobs.len());
            blobs.insert(path.clone(), transcript.as_bytes().to_vec());
            new_audios.push(NewAudio {
                name: format!("clip-{}.wav", i),
                path,
                content_type: "audio/wav".to_string(),
                original_text: original_text.map(str::to_string),
            });
        }
        self.store
            .insert(&NewTask {
                audios: new_audios,
                target_languages: vec![Language::En, Language::ZhCn],
            })
            .unwrap()
    }

    async fn task(&self, task_id: TaskId) -> Task {
        self.store.get(task_id).await.unwrap().unwrap()
    }

    async fn artifact(&self, task: &Task) -> ResultArtifact {
        let path = task.result_path.as_deref().unwrap();
        ResultArtifact::unpack(&self.blobs.get(path).await.unwrap()).unwrap()
    }
}

#[tokio::test]
async fn test_complete_task_lifecycle() -> Result<()> {
    let harness = Harness::new();
    let task = harness.create_task(&[
        ("hello word", Some("hello world")),
        ("no reference here", None),
    ]);

    let outcome = harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;
    assert_eq!(
        outcome,
        HandleOutcome::Succeeded { result_path: format!("translation/{}.pack", task.id) }
    );

    let done = harness.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.error_message, None);
    assert!(done.finish_time.is_some());
    assert_eq!(done.audios[0].stt_text.as_deref(), Some("hello word"));
    assert_eq!(done.audios[0].wer, Some(0.5));
    assert_eq!(done.audios[1].stt_text.as_deref(), Some("no reference here"));
    assert_eq!(done.audios[1].wer, None);

    // reference text and transcript are translated separately, only for the first audio
    assert_eq!(
        *harness.translator.calls.lock().unwrap(),
        vec!["hello world".to_string(), "hello word".to_string()]
    );

    let artifact = harness.artifact(&done).await;
    let first = done.audios[0].id;
    assert_eq!(artifact.get(Language::En, first, SourceKind::Text), Some("EN:hello world"));
    assert_eq!(artifact.get(Language::En, first, SourceKind::Audio), Some("EN:hello word"));
    assert_eq!(artifact.get(Language::ZhCn, first, SourceKind::Text), Some("ZH_CN:hello world"));
    assert_eq!(artifact.get(Language::ZhCn, first, SourceKind::Audio), Some("ZH_CN:hello word"));
    assert_eq!(artifact.get(Language::En, done.audios[1].id, SourceKind::Audio), None);
    assert_eq!(artifact.results().len(), 2);

    let writes = harness.repository.writes();
    assert_eq!(writes.first(), Some(&Write::Status(TaskStatus::Running)));
    assert_eq!(
        writes.last(),
        Some(&Write::Succeeded(format!("translation/{}.pack", task.id)))
    );
    assert!(harness.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_progress_is_k_over_n() -> Result<()> {
    let harness = Harness::new();
    let task = harness.create_task(&[("a", None), ("b", Some("b")), ("c", None), ("d", Some("x"))]);

    harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;

    assert_eq!(harness.repository.progress_writes(), vec![0.25, 0.5, 0.75, 1.0]);
    Ok(())
}

#[tokio::test]
async fn test_non_claimable_status_is_skipped_without_side_effects() -> Result<()> {
    for status in [
        TaskStatus::Running,
        TaskStatus::Cancelled,
        TaskStatus::Failed,
        TaskStatus::Succeeded,
    ] {
        let harness = Harness::new();
        let task = harness.create_task(&[("hello", Some("hello"))]);
        harness.store.update_status(task.id, status).await?;

        let outcome = harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;

        assert_eq!(outcome, HandleOutcome::Skipped(status));
        assert!(harness.repository.writes().is_empty());
        assert_eq!(harness.stt.calls.load(Ordering::SeqCst), 0);
        assert!(harness.translator.calls.lock().unwrap().is_empty());
        assert!(harness.queue.is_empty());
        assert_eq!(harness.task(task.id).await.status, status);
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_task_is_not_found() {
    let harness = Harness::new();
    let err = harness
        .orchestrator()
        .handle(CreateTaskMessage::new(404))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::NotFound { task_id: 404 }));
    assert!(harness.queue.is_empty());
    assert!(harness.repository.writes().is_empty());
}

#[tokio::test]
async fn test_memory_pressure_defers_notification() -> Result<()> {
    let harness = Harness::new();
    let task = harness.create_task(&[("hello", Some("hello"))]);
    harness.probe.set(0.95);

    let outcome = harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;

    assert_eq!(outcome, HandleOutcome::Deferred);
    assert!(harness.admission.gate().is_paused());
    assert_eq!(harness.queue.receive().await?, Some(CreateTaskMessage::new(task.id)));
    assert!(harness.repository.writes().is_empty());
    assert_eq!(harness.stt.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.task(task.id).await.status, TaskStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_failures_retry_three_times_then_stay_failed() -> Result<()> {
    let harness = Harness::with_stt(|_| FakeStt {
        failures: usize::MAX,
        ..FakeStt::default()
    });
    let task = harness.create_task(&[("hello", Some("hello"))]);
    let orchestrator = harness.orchestrator();

    for expected in 1..=3u32 {
        let message = if expected == 1 {
            CreateTaskMessage::new(task.id)
        } else {
            harness.queue.receive().await?.expect("retry notification")
        };
        let outcome = orchestrator.handle(message).await?;
        assert_eq!(outcome, HandleOutcome::Failed(RetryDecision::Retry { next_count: expected }));

        let retried = harness.task(task.id).await;
        assert_eq!(retried.status, TaskStatus::RetryScheduled);
        assert_eq!(retried.retry_count, expected);
        assert_eq!(harness.queue.len(), 1);
    }

    let message = harness.queue.receive().await?.expect("last retry notification");
    let outcome = orchestrator.handle(message).await?;
    assert_eq!(outcome, HandleOutcome::Failed(RetryDecision::Exhausted));

    let failed = harness.task(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(failed.result_path.is_none());
    let error = failed.error_message.unwrap();
    assert!(error.contains("Failed to transcribe audio"));
    assert!(error.contains("whisper unavailable"));
    assert!(harness.queue.is_empty());
    assert_eq!(harness.stt.calls.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn test_retry_restarts_from_scratch_and_succeeds() -> Result<()> {
    let harness = Harness::with_stt(|_| FakeStt {
        failures: 1,
        ..FakeStt::default()
    });
    let task = harness.create_task(&[("one", Some("one")), ("two", Some("two"))]);
    let orchestrator = harness.orchestrator();

    let first = orchestrator.handle(CreateTaskMessage::new(task.id)).await?;
    assert_eq!(first, HandleOutcome::Failed(RetryDecision::Retry { next_count: 1 }));

    let message = harness.queue.receive().await?.unwrap();
    let second = orchestrator.handle(message).await?;
    assert!(matches!(second, HandleOutcome::Succeeded { .. }));

    let done = harness.task(task.id).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.retry_count, 1);
    assert_eq!(done.error_message, None);
    // first attempt failed on audio 1; the second transcribed both
    assert_eq!(harness.stt.calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.repository.progress_writes(), vec![0.5, 1.0]);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_mid_flight_aborts_without_retry() -> Result<()> {
    let harness = Harness::with_stt(|store| FakeStt {
        // every task created by this harness gets id 1
        cancel: Some((store.clone(), 1)),
        ..FakeStt::default()
    });
    let task = harness.create_task(&[("hello", Some("hello")), ("again", Some("again"))]);
    assert_eq!(task.id, 1);

    let outcome = harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;
    assert_eq!(outcome, HandleOutcome::Cancelled);

    let cancelled = harness.task(task.id).await;
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.retry_count, 0);
    assert!(cancelled.result_path.is_none());
    assert!(cancelled.error_message.is_none());
    // the in-flight transcription completed; nothing after the next checkpoint ran
    assert_eq!(harness.stt.calls.load(Ordering::SeqCst), 1);
    assert!(harness.translator.calls.lock().unwrap().is_empty());
    assert_eq!(
        harness.repository.writes(),
        vec![
            Write::Status(TaskStatus::Running),
            Write::SttText(task.audios[0].id, Some("hello".to_string())),
        ]
    );
    assert!(harness.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_retry_publish_marks_task_failed() -> Result<()> {
    let harness = Harness::with_stt(|_| FakeStt {
        failures: usize::MAX,
        ..FakeStt::default()
    });
    let task = harness.create_task(&[("hello", None)]);

    let outcome = harness
        .orchestrator_with_queue(Arc::new(FailingQueue))
        .handle(CreateTaskMessage::new(task.id))
        .await?;
    assert_eq!(outcome, HandleOutcome::Failed(RetryDecision::Retry { next_count: 1 }));

    let failed = harness.task(task.id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("broker unreachable"));
    Ok(())
}

#[tokio::test]
async fn test_task_without_audios_succeeds_with_empty_artifact() -> Result<()> {
    let harness = Harness::new();
    let task = harness.create_task(&[]);

    let outcome = harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;
    assert!(matches!(outcome, HandleOutcome::Succeeded { .. }));

    let done = harness.task(task.id).await;
    assert!(harness.artifact(&done).await.results().is_empty());
    assert_eq!(harness.repository.progress_writes(), vec![1.0]);
    assert_eq!(done.progress, 1.0);
    Ok(())
}

#[tokio::test]
async fn test_load_error_redelivers_notification() -> Result<()> {
    let harness = Harness::new();
    let task = harness.create_task(&[("hello", Some("hello"))]);
    harness.repository.load_failures.store(1, Ordering::SeqCst);
    let orchestrator = harness.orchestrator();

    let outcome = orchestrator.handle(CreateTaskMessage::new(task.id)).await?;
    assert_eq!(outcome, HandleOutcome::Redelivered);
    assert!(harness.repository.writes().is_empty());
    assert_eq!(harness.task(task.id).await.status, TaskStatus::Pending);

    let message = harness.queue.receive().await?.expect("redelivered notification");
    assert_eq!(message, CreateTaskMessage::new(task.id));
    let outcome = orchestrator.handle(message).await?;
    assert!(matches!(outcome, HandleOutcome::Succeeded { .. }));
    assert_eq!(harness.task(task.id).await.status, TaskStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn test_cancel_during_failing_call_is_not_retried() -> Result<()> {
    let harness = Harness::with_stt(|store| FakeStt {
        failures: usize::MAX,
        cancel: Some((store.clone(), 1)),
        ..FakeStt::default()
    });
    let task = harness.create_task(&[("hello", Some("hello"))]);
    assert_eq!(task.id, 1);

    let outcome = harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;
    assert_eq!(outcome, HandleOutcome::Cancelled);

    let cancelled = harness.task(task.id).await;
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.retry_count, 0);
    assert_eq!(cancelled.error_message, None);
    assert_eq!(harness.repository.writes(), vec![Write::Status(TaskStatus::Running)]);
    assert!(harness.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_blank_transcript_skips_scoring_and_translation() -> Result<()> {
    let harness = Harness::new();
    let task = harness.create_task(&[("", Some("hello world"))]);
    let audio_id = task.audios[0].id;

    let outcome = harness.orchestrator().handle(CreateTaskMessage::new(task.id)).await?;
    assert!(matches!(outcome, HandleOutcome::Succeeded { .. }));

    let done = harness.task(task.id).await;
    assert_eq!(done.audios[0].stt_text, None);
    assert_eq!(done.audios[0].wer, None);
    assert!(harness.translator.calls.lock().unwrap().is_empty());
    assert!(harness.artifact(&done).await.results().is_empty());
    assert_eq!(
        harness.repository.writes(),
        vec![
            Write::Status(TaskStatus::Running),
            Write::SttText(audio_id, None),
            Write::Progress(1.0),
            Write::Succeeded(format!("translation/{}.pack", task.id)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_scheduler_workers_consume_queue() -> Result<()> {
    let harness = Harness::new();
    let first = harness.create_task(&[("hello there", Some("hello here"))]);
    let second = harness.create_task(&[("bye", None)]);

    let queue: Arc<dyn TaskQueue> = harness.queue.clone();
    let scheduler = Arc::new(
        TaskScheduler::new(Arc::new(harness.orchestrator()), queue.clone(), harness.admission.clone())
            .with_poll_interval(Duration::from_millis(10)),
    );
    scheduler.spawn_worker().await;
    scheduler.spawn_worker().await;
    let running = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    queue.publish(CreateTaskMessage::new(first.id)).await?;
    queue.publish(CreateTaskMessage::new(second.id)).await?;
    // duplicate delivery is skipped by the status guard
    queue.publish(CreateTaskMessage::new(first.id)).await?;

    let mut completed = false;
    for _ in 0..200 {
        let a = harness.task(first.id).await.status;
        let b = harness.task(second.id).await.status;
        if a == TaskStatus::Succeeded && b == TaskStatus::Succeeded && harness.queue.is_empty() {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    running.abort();

    assert!(completed, "Tasks should be completed");
    assert_eq!(harness.task(first.id).await.audios[0].wer, Some(0.5));
    Ok(())
}
