use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use super::ApiResponse;
use crate::schedule::types::{AudioId, Language, Task, TaskId, TaskStatus};
use crate::AppContext;

pub fn task_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/:task_id", get(get_task))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
struct AudioView {
    id: AudioId,
    name: String,
    stt_text: Option<String>,
    wer: Option<f64>,
}

/// Externally visible task state.
#[derive(Debug, Serialize)]
struct TaskView {
    id: TaskId,
    status: TaskStatus,
    progress: f64,
    retry_count: u32,
    error_message: Option<String>,
    result_path: Option<String>,
    finish_time: Option<DateTime<Utc>>,
    target_languages: Vec<Language>,
    audios: Vec<AudioView>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            status: task.status,
            progress: task.progress,
            retry_count: task.retry_count,
            error_message: task.error_message,
            result_path: task.result_path,
            finish_time: task.finish_time,
            target_languages: task.target_languages,
            audios: task
                .audios
                .into_iter()
                .map(|audio| AudioView {
                    id: audio.id,
                    name: audio.name,
                    stt_text: audio.stt_text,
                    wer: audio.wer,
                })
                .collect(),
        }
    }
}

// Get task endpoint
async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<TaskId>,
) -> impl IntoResponse {
    match ctx.repository.get(task_id).await {
        Ok(Some(task)) => (
            StatusCode::OK,
            Json(ApiResponse::success(TaskView::from(task))),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Task {} not found", task_id))),
        ),
        Err(e) => {
            error!("Failed to get task {}: {:#}", task_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}
