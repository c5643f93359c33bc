use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{NameRequest, OrganizationPermissionRequest};
use crate::server::response::ApiError;

pub async fn create_organization(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NameRequest>,
) -> impl IntoResponse {
    let org = state
        .services
        .organizations
        .create(&req.name, &auth.user.id)
        .await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(org)))
}

pub async fn list_organizations(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let orgs = state.services.organizations.list(&auth.user.id).await?;
    Ok::<_, ApiError>(Json(orgs))
}

pub async fn get_organization(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let org = state.services.organizations.find(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(org))
}

pub async fn delete_organization(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state
        .services
        .organizations
        .delete(&id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn patch_name(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<NameRequest>,
) -> impl IntoResponse {
    let org = state
        .services
        .organizations
        .patch_name(&id, &req.name, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(org))
}

pub async fn list_members(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let members = state
        .services
        .organizations
        .members(&id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(members))
}

pub async fn remove_member(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    state
        .services
        .organizations
        .remove_member(&id, &user_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn list_groups(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let groups = state
        .services
        .organizations
        .groups(&id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(groups))
}

pub async fn grant_user_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<OrganizationPermissionRequest>,
) -> impl IntoResponse {
    let level = req
        .permission
        .ok_or_else(|| Error::bad_request("invalid_request", "permission is required"))?;
    let org = state
        .services
        .organizations
        .grant_user_permission(&id, &req.user_id, level, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(org))
}

pub async fn revoke_user_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<OrganizationPermissionRequest>,
) -> impl IntoResponse {
    let org = state
        .services
        .organizations
        .revoke_user_permission(&id, &req.user_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(org))
}
