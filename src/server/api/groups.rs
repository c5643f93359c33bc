use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::{CreateGroupRequest, NameRequest, OrganizationQuery};
use crate::server::response::ApiError;

pub async fn create_group(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGroupRequest>,
) -> impl IntoResponse {
    let group = state
        .services
        .groups
        .create(&req.name, &req.organization_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(group)))
}

pub async fn list_groups(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrganizationQuery>,
) -> impl IntoResponse {
    let groups = state
        .services
        .groups
        .list(query.organization_id.as_deref(), &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(groups))
}

pub async fn get_group(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let group = state.services.groups.find(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(group))
}

pub async fn delete_group(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.services.groups.delete(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn patch_name(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<NameRequest>,
) -> impl IntoResponse {
    let group = state
        .services
        .groups
        .patch_name(&id, &req.name, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(group))
}

pub async fn list_members(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let members = state.services.groups.members(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(members))
}

pub async fn add_member(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let group = state
        .services
        .groups
        .add_member(&id, &user_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(group))
}

pub async fn remove_member(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let group = state
        .services
        .groups
        .remove_member(&id, &user_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(group))
}
