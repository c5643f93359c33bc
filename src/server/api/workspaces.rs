use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::{NameRequest, StorageCapacityRequest};
use crate::server::response::ApiError;
use crate::service::CreateWorkspaceOptions;

pub async fn create_workspace(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(opts): Json<CreateWorkspaceOptions>,
) -> impl IntoResponse {
    let workspace = state
        .services
        .workspaces
        .create(&opts, &auth.user.id)
        .await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(workspace)))
}

pub async fn list_workspaces(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let workspaces = state.services.workspaces.find_all(&auth.user.id).await?;
    Ok::<_, ApiError>(Json(workspaces))
}

pub async fn get_workspace(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let workspace = state.services.workspaces.find(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(workspace))
}

pub async fn delete_workspace(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.services.workspaces.delete(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn patch_name(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<NameRequest>,
) -> impl IntoResponse {
    let workspace = state
        .services
        .workspaces
        .patch_name(&id, &req.name, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(workspace))
}

pub async fn patch_storage_capacity(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<StorageCapacityRequest>,
) -> impl IntoResponse {
    let workspace = state
        .services
        .workspaces
        .patch_storage_capacity(&id, req.storage_capacity, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(workspace))
}
