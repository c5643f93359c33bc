use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::{RequireApiKey, RequireUser};
use crate::server::AppState;
use crate::server::dto::{CancelledResponse, CountResponse, CreateTaskRequest};
use crate::server::response::ApiError;
use crate::types::{TaskPatch, TaskStatus};

pub async fn create_task(
    _key: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> impl IntoResponse {
    let task = state
        .services
        .tasks
        .create(
            &req.user_id,
            &req.name,
            req.status.unwrap_or(TaskStatus::Waiting),
            req.object.as_deref(),
        )
        .await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(task)))
}

pub async fn patch_task(
    _key: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> impl IntoResponse {
    let task = state.services.tasks.patch(&id, &patch).await?;
    Ok::<_, ApiError>(Json(task))
}

pub async fn delete_task(
    _key: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.services.tasks.delete(&id).await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Polled by pipelines between stages.
pub async fn is_cancelled(
    _key: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.services.core.is_task_cancelled(&id).await?;
    Ok::<_, ApiError>(Json(CancelledResponse { cancelled }))
}

pub async fn list_tasks(auth: RequireUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tasks = state.services.tasks.list(&auth.user.id)?;
    Ok::<_, ApiError>(Json(tasks))
}

pub async fn count_tasks(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let count = state.services.tasks.count(&auth.user.id)?;
    Ok::<_, ApiError>(Json(CountResponse { count }))
}

pub async fn get_task(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task = state.services.tasks.find(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(task))
}

pub async fn dismiss(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.services.tasks.dismiss(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn dismiss_all(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let result = state.services.tasks.dismiss_all(&auth.user.id).await?;
    Ok::<_, ApiError>(Json(result))
}

pub async fn cancel(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task = state.services.tasks.cancel(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(task))
}
