mod files;
mod groups;
mod invitations;
mod organizations;
mod snapshots;
mod tasks;
mod token;
mod users;
mod workspaces;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post},
};

use crate::server::AppState;

/// Routes served under `/v3`.
pub fn api_router(multipart_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/token", post(token::token))
        .route("/users/me", get(users::me))
        // Organizations
        .route("/organizations", post(organizations::create_organization))
        .route("/organizations", get(organizations::list_organizations))
        .route("/organizations/{id}", get(organizations::get_organization))
        .route("/organizations/{id}", delete(organizations::delete_organization))
        .route("/organizations/{id}/name", patch(organizations::patch_name))
        .route("/organizations/{id}/members", get(organizations::list_members))
        .route(
            "/organizations/{id}/members/{user_id}",
            delete(organizations::remove_member),
        )
        .route("/organizations/{id}/groups", get(organizations::list_groups))
        .route(
            "/organizations/{id}/grant_user_permission",
            post(organizations::grant_user_permission),
        )
        .route(
            "/organizations/{id}/revoke_user_permission",
            post(organizations::revoke_user_permission),
        )
        // Groups
        .route("/groups", post(groups::create_group))
        .route("/groups", get(groups::list_groups))
        .route("/groups/{id}", get(groups::get_group))
        .route("/groups/{id}", delete(groups::delete_group))
        .route("/groups/{id}/name", patch(groups::patch_name))
        .route("/groups/{id}/members", get(groups::list_members))
        .route("/groups/{id}/members/{user_id}", post(groups::add_member))
        .route("/groups/{id}/members/{user_id}", delete(groups::remove_member))
        // Workspaces
        .route("/workspaces", post(workspaces::create_workspace))
        .route("/workspaces", get(workspaces::list_workspaces))
        .route("/workspaces/{id}", get(workspaces::get_workspace))
        .route("/workspaces/{id}", delete(workspaces::delete_workspace))
        .route("/workspaces/{id}/name", patch(workspaces::patch_name))
        .route(
            "/workspaces/{id}/storage_capacity",
            patch(workspaces::patch_storage_capacity),
        )
        // Invitations
        .route("/invitations", post(invitations::create_invitations))
        .route("/invitations/incoming", get(invitations::list_incoming))
        .route("/invitations/outgoing", get(invitations::list_outgoing))
        .route("/invitations/{id}", delete(invitations::delete_invitation))
        .route("/invitations/{id}/accept", post(invitations::accept))
        .route("/invitations/{id}/decline", post(invitations::decline))
        .route("/invitations/{id}/resend", post(invitations::resend))
        // Files
        .route("/files", post(files::create_file))
        .route("/files", delete(files::delete_files))
        .route(
            "/files/upload",
            post(files::upload).layer(DefaultBodyLimit::max(multipart_limit)),
        )
        .route("/files/create_from_s3", post(files::create_from_s3))
        .route("/files/find", post(files::find_files))
        .route("/files/get", get(files::get_by_path))
        .route("/files/list", get(files::list_by_path))
        .route("/files/copy", post(files::copy_files))
        .route("/files/move", post(files::move_files))
        .route("/files/grant_user_permission", post(files::grant_user_permission))
        .route("/files/revoke_user_permission", post(files::revoke_user_permission))
        .route("/files/grant_group_permission", post(files::grant_group_permission))
        .route("/files/revoke_group_permission", post(files::revoke_group_permission))
        .route("/files/sweep_uplift", post(files::sweep_uplift))
        .route("/files/{id}", get(files::get_file))
        .route("/files/{id}/list", get(files::list_children))
        .route("/files/{id}/probe", get(files::probe))
        .route("/files/{id}/path", get(files::get_path))
        .route("/files/{id}/size", get(files::get_size))
        .route("/files/{id}/count", get(files::get_count))
        .route("/files/{id}/name", patch(files::patch_name))
        .route("/files/{id}/patch_from_s3", patch(files::patch_from_s3))
        .route("/files/{id}/user_permissions", get(files::user_permissions))
        .route("/files/{id}/group_permissions", get(files::group_permissions))
        // Snapshots
        .route("/snapshots", get(snapshots::list_snapshots))
        .route("/snapshots/purge", post(snapshots::purge))
        .route("/snapshots/{id}", get(snapshots::get_snapshot))
        .route("/snapshots/{id}", patch(snapshots::patch_snapshot))
        .route("/snapshots/{id}/activate", post(snapshots::activate))
        .route("/snapshots/{id}/detach", post(snapshots::detach))
        .route("/snapshots/{id}/reprocess", post(snapshots::reprocess))
        .route("/snapshots/{id}/pipelines/{pipeline}", post(snapshots::run_pipeline))
        // Tasks
        .route("/tasks", post(tasks::create_task))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/count", get(tasks::count_tasks))
        .route("/tasks/dismiss", post(tasks::dismiss_all))
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/tasks/{id}", patch(tasks::patch_task))
        .route("/tasks/{id}", delete(tasks::delete_task))
        .route("/tasks/{id}/dismiss", post(tasks::dismiss))
        .route("/tasks/{id}/cancel", post(tasks::cancel))
        .route("/tasks/{id}/cancelled", get(tasks::is_cancelled))
}
