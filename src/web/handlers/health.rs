use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use super::ApiResponse;
use crate::AppContext;

pub fn health_router(ctx: Arc<AppContext>) -> Router {
    Router::new().route("/health", get(health)).with_state(ctx)
}

#[derive(Debug, Serialize)]
struct Health {
    intake_paused: bool,
    memory_usage_ratio: f64,
    version: &'static str,
}

async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(ApiResponse::success(Health {
        intake_paused: ctx.admission.gate().is_paused(),
        memory_usage_ratio: ctx.admission.usage_ratio(),
        version: env!("GIT_HASH"),
    }))
}
