#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use tracing::info;
use std::sync::Arc;
use std::fs;
use polyglot_rs::{
    asr::whisper::WhisperApiClient,
    config::WorkerConfig,
    schedule::{
        AdmissionController, IntakeGate, RetryPolicy, SqliteTaskQueue, SysinfoMemoryProbe,
        TaskOrchestrator, TaskQueue, TaskScheduler,
    },
    storage::{self, blob::FsBlobStore, task::SqliteTaskRepository},
    translate::GeminiTranslator,
    utils::logger,
    AppContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env()?;

    // 初始化日志系统
    let _guard = logger::init(config.log_dir.clone())?;
    info!("Starting translation worker, version {}", env!("GIT_HASH"));

    // 创建必要的目录
    if let Some(dir) = config.database_dir() {
        fs::create_dir_all(dir)?;
    }
    fs::create_dir_all(&config.blob_root)?;

    // 初始化 storage
    info!("Initializing Storage...");
    let pool = storage::connect(&config.database_url, config.workers as u32 + 2).await?;
    let repository = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteTaskQueue::new(pool));
    let blob_store = Arc::new(FsBlobStore::new(config.blob_root.clone()));

    // 初始化外部服务客户端
    info!("Whisper service at {}", config.whisper_base_url);
    let stt = Arc::new(WhisperApiClient::new(
        config.whisper_base_url.clone(),
        config.request_timeout,
    )?);
    let translator = Arc::new(GeminiTranslator::new(
        config.gemini_base_url.clone(),
        config.gemini_model.clone(),
        config.gemini_api_key.clone(),
        config.request_timeout,
    )?);

    let admission = Arc::new(AdmissionController::new(
        Arc::new(SysinfoMemoryProbe::new()),
        IntakeGate::new(),
        config.admission.clone(),
    ));

    let orchestrator = TaskOrchestrator::new(
        repository.clone(),
        blob_store,
        stt,
        translator,
        queue.clone(),
        admission.clone(),
    )
    .with_retry_policy(RetryPolicy::new(config.max_retries));

    // 创建应用上下文
    let ctx = Arc::new(AppContext {
        repository,
        admission: admission.clone(),
    });

    // 初始化调度器并启动
    info!("Initializing Scheduler with {} workers...", config.workers);
    let scheduler = TaskScheduler::new(Arc::new(orchestrator), queue, admission)
        .with_poll_interval(config.poll_interval);
    for _ in 0..config.workers {
        scheduler.spawn_worker().await;
    }

    tokio::spawn(async move {
        if let Err(e) = scheduler.run().await {
            tracing::error!("Scheduler error: {:#}", e);
        }
    });

    // 启动 HTTP 服务器
    match polyglot_rs::web::start_server(ctx, config.http_addr).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(e);
        }
    }

    info!("Shutting down...");
    Ok(())
}
