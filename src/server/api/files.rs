use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::server::dto::{
    BatchTargetRequest, CountResponse, CreateFromS3Request, GroupPermissionRequest, IdsRequest,
    NameRequest, PatchFromS3Request, PathQuery, SizeResponse, SweepRequest, SweepResponse,
    UploadQuery, UserPermissionRequest,
};
use crate::server::response::ApiError;
use crate::server::validation::require_ids;
use crate::service::{BatchResult, CopyManyResult, CreateFileOptions, FileView, ListOptions, Page};
use crate::storage::DEFAULT_CONTENT_TYPE;
use crate::types::{FileType, PermissionLevel, S3Reference};

pub async fn create_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(opts): Json<CreateFileOptions>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let file = files.create(&opts, &auth.user.id).await?;
    let view = files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(view)))
}

/// Multipart upload of a single `file` field into a folder.
pub async fn upload(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> impl IntoResponse {
    let view = receive_upload(&state, &auth.user.id, &query, multipart).await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(view)))
}

/// Stages the `file` field on disk, stores it as `<snapshot>/original<ext>`
/// in the workspace bucket, then creates the file from that object.
async fn receive_upload(
    state: &AppState,
    user_id: &str,
    query: &UploadQuery,
    mut multipart: Multipart,
) -> Result<FileView> {
    let workspace = state
        .services
        .workspaces
        .find(&query.workspace_id, user_id)
        .await?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::bad_request("invalid_multipart", e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = query
            .name
            .clone()
            .or_else(|| field.file_name().map(str::to_string))
            .ok_or_else(|| Error::bad_request("invalid_request", "a file name is required"))?;
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let temp = match &state.temp_dir {
            Some(dir) => tempfile::Builder::new().prefix("voltcore-upload-").tempfile_in(dir)?,
            None => tempfile::Builder::new().prefix("voltcore-upload-").tempfile()?,
        };
        let mut out = tokio::fs::File::create(temp.path()).await?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| Error::bad_request("invalid_multipart", e.body_text()))?
        {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        drop(out);

        let snapshot_id = Uuid::new_v4().to_string();
        let key = S3Reference::original_key(&snapshot_id, &name);
        let objects = &state.services.core.objects;
        let info = objects
            .fput_object(&workspace.bucket, &key, temp.path(), &content_type)
            .await?;
        let s3ref = S3Reference {
            bucket: workspace.bucket.clone(),
            key: key.clone(),
            size: info.size,
            snapshot_id,
            content_type: Some(content_type),
        };
        let opts = CreateFileOptions {
            workspace_id: workspace.id.clone(),
            parent_id: query.parent_id.clone(),
            name,
            file_type: FileType::File,
        };

        let file = match state.services.files.create_from_s3(&opts, &s3ref, user_id).await {
            Ok(file) => file,
            Err(e) => {
                if let Err(cleanup) = objects.remove_object(&workspace.bucket, &key).await {
                    tracing::warn!("Failed to remove orphaned object {}: {}", key, cleanup);
                }
                return Err(e);
            }
        };
        return state.services.files.view(file, user_id).await;
    }

    Err(Error::bad_request("invalid_request", "the 'file' field is missing"))
}

pub async fn create_from_s3(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateFromS3Request>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let opts = CreateFileOptions {
        workspace_id: req.workspace_id,
        parent_id: req.parent_id,
        name: req.name,
        file_type: FileType::File,
    };
    let file = files
        .create_from_s3(&opts, &req.s3_reference, &auth.user.id)
        .await?;
    let view = files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>((StatusCode::CREATED, Json(view)))
}

pub async fn patch_from_s3(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PatchFromS3Request>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let file = files
        .patch_from_s3(&id, &req.s3_reference, &auth.user.id)
        .await?;
    let view = files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(view))
}

pub async fn get_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let file = files.find(&id, &auth.user.id).await?;
    let view = files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(view))
}

pub async fn find_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let found = files.find_many(&req.ids, &auth.user.id).await?;
    let views = files.views(found, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(views))
}

pub async fn list_children(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(opts): Query<ListOptions>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let page = files.list_children(&id, &opts, &auth.user.id).await?;
    let data = files.views(page.data, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(Page {
        data,
        total_pages: page.total_pages,
        total_elements: page.total_elements,
        page: page.page,
        size: page.size,
    }))
}

pub async fn probe(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(opts): Query<ListOptions>,
) -> impl IntoResponse {
    let probe = state
        .services
        .files
        .probe(&id, &opts, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(probe))
}

pub async fn get_path(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let path = state.services.files.find_path(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(path))
}

pub async fn get_size(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let size = state.services.files.get_size(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(SizeResponse { size }))
}

pub async fn get_count(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let count = state.services.files.get_count(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(CountResponse { count }))
}

pub async fn get_by_path(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let file = files.find_by_path(&query.path, &auth.user.id).await?;
    let view = files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(view))
}

pub async fn list_by_path(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let listed = files.list_by_path(&query.path, &auth.user.id).await?;
    let views = files.views(listed, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(views))
}

pub async fn patch_name(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<NameRequest>,
) -> impl IntoResponse {
    let files = &state.services.files;
    let file = files.rename(&id, &req.name, &auth.user.id).await?;
    let view = files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(view))
}

// A batch of one reports that file's error as the response status, which is
// what the WebDAV gateway relies on.

pub async fn copy_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchTargetRequest>,
) -> impl IntoResponse {
    require_ids(&req.source_ids)?;
    let files = &state.services.files;
    let result = match req.source_ids.as_slice() {
        [id] => {
            let clone = files.copy(id, &req.target_id, &auth.user.id).await?;
            CopyManyResult {
                new: vec![clone.id],
                succeeded: vec![id.clone()],
                failed: Vec::new(),
            }
        }
        ids => files.copy_many(ids, &req.target_id, &auth.user.id).await,
    };
    Ok::<_, ApiError>(Json(result))
}

pub async fn move_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchTargetRequest>,
) -> impl IntoResponse {
    require_ids(&req.source_ids)?;
    let files = &state.services.files;
    let result = match req.source_ids.as_slice() {
        [id] => {
            files.move_file(id, &req.target_id, &auth.user.id).await?;
            BatchResult {
                succeeded: vec![id.clone()],
                failed: Vec::new(),
            }
        }
        ids => files.move_many(ids, &req.target_id, &auth.user.id).await,
    };
    Ok::<_, ApiError>(Json(result))
}

pub async fn delete_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<IdsRequest>,
) -> impl IntoResponse {
    require_ids(&req.ids)?;
    let files = &state.services.files;
    let result = match req.ids.as_slice() {
        [id] => {
            files.delete(id, &auth.user.id).await?;
            BatchResult {
                succeeded: vec![id.clone()],
                failed: Vec::new(),
            }
        }
        ids => files.delete_many(ids, &auth.user.id).await,
    };
    Ok::<_, ApiError>(Json(result))
}

fn required_permission(permission: Option<PermissionLevel>) -> Result<PermissionLevel> {
    permission.ok_or_else(|| Error::bad_request("invalid_request", "permission is required"))
}

pub async fn grant_user_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserPermissionRequest>,
) -> impl IntoResponse {
    require_ids(&req.ids)?;
    let level = required_permission(req.permission)?;
    state
        .services
        .files
        .grant_user_permission(&req.ids, &req.user_id, level, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn revoke_user_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserPermissionRequest>,
) -> impl IntoResponse {
    require_ids(&req.ids)?;
    state
        .services
        .files
        .revoke_user_permission(&req.ids, &req.user_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn grant_group_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<GroupPermissionRequest>,
) -> impl IntoResponse {
    require_ids(&req.ids)?;
    let level = required_permission(req.permission)?;
    state
        .services
        .files
        .grant_group_permission(&req.ids, &req.group_id, level, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn revoke_group_permission(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<GroupPermissionRequest>,
) -> impl IntoResponse {
    require_ids(&req.ids)?;
    state
        .services
        .files
        .revoke_group_permission(&req.ids, &req.group_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn user_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let grants = state
        .services
        .files
        .user_permissions(&id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(grants))
}

pub async fn group_permissions(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let grants = state
        .services
        .files
        .group_permissions(&id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(grants))
}

pub async fn sweep_uplift(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SweepRequest>,
) -> impl IntoResponse {
    let removed = state
        .services
        .files
        .sweep_uplift(&req.workspace_id, &req.user_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(SweepResponse { removed }))
}
