use serde::{Deserialize, Serialize};

use crate::types::{PermissionLevel, S3Reference, TaskStatus};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub organization_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrganizationQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StorageCapacityRequest {
    pub storage_capacity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationsRequest {
    pub organization_id: String,
    pub emails: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateFromS3Request {
    pub workspace_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    pub s3_reference: S3Reference,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PatchFromS3Request {
    pub s3_reference: S3Reference,
}

/// Copy and move: every source goes under `target_id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchTargetRequest {
    pub source_ids: Vec<String>,
    pub target_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserPermissionRequest {
    pub ids: Vec<String>,
    pub user_id: String,
    /// Required when granting.
    #[serde(default)]
    pub permission: Option<PermissionLevel>,
}

#[derive(Debug, Deserialize)]
pub struct GroupPermissionRequest {
    pub ids: Vec<String>,
    pub group_id: String,
    #[serde(default)]
    pub permission: Option<PermissionLevel>,
}

#[derive(Debug, Deserialize)]
pub struct OrganizationPermissionRequest {
    pub user_id: String,
    #[serde(default)]
    pub permission: Option<PermissionLevel>,
}

#[derive(Debug, Deserialize)]
pub struct SweepRequest {
    pub workspace_id: String,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct FileIdQuery {
    pub file_id: String,
}

/// Snapshots may be shared; `file_id` picks the file to act on.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotTargetRequest {
    #[serde(default)]
    pub file_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunPipelineQuery {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub workspace_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Overrides the multipart file name.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub object: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelledResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct SizeResponse {
    pub size: i64,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub removed: usize,
}
