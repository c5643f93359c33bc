use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::scheduler::{Scheduler, SchedulerStatus};
use crate::auth::{ApiKeyState, RequireApiKey};
use crate::server::log_request;
use crate::server::response::ApiError;
use crate::types::PipelineRunOptions;

pub struct ConversionState {
    pub scheduler: Arc<Scheduler>,
    pub api_key: String,
}

impl ApiKeyState for ConversionState {
    fn api_key(&self) -> &str {
        &self.api_key
    }
}

async fn run_pipeline(
    _key: RequireApiKey,
    State(state): State<Arc<ConversionState>>,
    Json(opts): Json<PipelineRunOptions>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.submit(opts).await?;
    Ok(StatusCode::OK)
}

async fn status(
    _key: RequireApiKey,
    State(state): State<Arc<ConversionState>>,
) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn health() -> &'static str {
    "OK"
}

pub fn create_conversion_router(state: Arc<ConversionState>) -> Router {
    Router::new()
        .route("/v3/health", get(health))
        .route("/v3/pipelines/run", post(run_pipeline))
        .route("/v3/pipelines/status", get(status))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
