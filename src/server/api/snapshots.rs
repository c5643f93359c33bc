use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use crate::auth::{RequireApiKey, RequireUser};
use crate::server::AppState;
use crate::server::dto::{FileIdQuery, PurgeResponse, RunPipelineQuery, SnapshotTargetRequest};
use crate::server::response::ApiError;
use crate::types::{PipelineId, SnapshotPatch};

pub async fn list_snapshots(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileIdQuery>,
) -> impl IntoResponse {
    let snapshots = state
        .services
        .snapshots
        .list(&query.file_id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(snapshots))
}

pub async fn get_snapshot(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let snapshot = state.services.snapshots.find(&id, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(snapshot))
}

/// Called by the conversion service as pipelines progress.
pub async fn patch_snapshot(
    _key: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<SnapshotPatch>,
) -> impl IntoResponse {
    let snapshot = state.services.snapshots.patch(&id, &patch).await?;
    Ok::<_, ApiError>(Json(snapshot))
}

pub async fn activate(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(target): Query<SnapshotTargetRequest>,
) -> impl IntoResponse {
    let file = state
        .services
        .snapshots
        .activate(&id, target.file_id.as_deref(), &auth.user.id)
        .await?;
    let view = state.services.files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(view))
}

pub async fn detach(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(target): Query<SnapshotTargetRequest>,
) -> impl IntoResponse {
    let file = state
        .services
        .snapshots
        .detach(&id, target.file_id.as_deref(), &auth.user.id)
        .await?;
    let view = state.services.files.view(file, &auth.user.id).await?;
    Ok::<_, ApiError>(Json(view))
}

pub async fn reprocess(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let snapshot = state
        .services
        .snapshots
        .reprocess(&id, &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(snapshot))
}

/// Starts one named pipeline, e.g. `ocr?language=eng`.
pub async fn run_pipeline(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path((id, pipeline)): Path<(String, PipelineId)>,
    Query(query): Query<RunPipelineQuery>,
) -> impl IntoResponse {
    let snapshot = state
        .services
        .snapshots
        .run_pipeline(&id, pipeline, query.language.as_deref(), &auth.user.id)
        .await?;
    Ok::<_, ApiError>(Json(snapshot))
}

pub async fn purge(_key: RequireApiKey, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let purged = state.services.snapshots.purge().await?;
    Ok::<_, ApiError>(Json(PurgeResponse { purged }))
}
