pub mod path;
mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Rows written per statement batch in bulk inserts.
pub const BULK_CHUNK_SIZE: usize = 100;

/// Store defines the relational database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn delete_expired_tokens(&self) -> Result<usize>;

    // Organization operations
    fn create_organization(&self, org: &Organization) -> Result<()>;
    fn get_organization(&self, id: &str) -> Result<Option<Organization>>;
    fn list_organizations_for_user(&self, user_id: &str) -> Result<Vec<Organization>>;
    fn update_organization_name(&self, id: &str, name: &str) -> Result<()>;
    fn delete_organization(&self, id: &str) -> Result<bool>;
    fn add_organization_member(&self, org_id: &str, user_id: &str) -> Result<()>;
    fn remove_organization_member(&self, org_id: &str, user_id: &str) -> Result<()>;
    fn list_organization_members(&self, org_id: &str) -> Result<Vec<User>>;
    fn count_organization_owners(&self, org_id: &str) -> Result<i64>;

    // Group operations
    fn create_group(&self, group: &Group) -> Result<()>;
    fn get_group(&self, id: &str) -> Result<Option<Group>>;
    fn list_groups_for_organization(&self, org_id: &str) -> Result<Vec<Group>>;
    fn list_groups_for_user(&self, user_id: &str) -> Result<Vec<Group>>;
    fn update_group_name(&self, id: &str, name: &str) -> Result<()>;
    fn delete_group(&self, id: &str) -> Result<bool>;
    fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()>;
    fn remove_group_member(&self, group_id: &str, user_id: &str) -> Result<()>;
    fn list_group_members(&self, group_id: &str) -> Result<Vec<User>>;

    // Workspace operations
    /// Inserts the workspace row and its root folder in one transaction.
    fn create_workspace(&self, workspace: &Workspace, root: &File) -> Result<()>;
    fn get_workspace(&self, id: &str) -> Result<Option<Workspace>>;
    fn get_workspace_by_name(&self, name: &str) -> Result<Vec<Workspace>>;
    fn list_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>>;
    fn list_workspace_ids_for_organization(&self, org_id: &str) -> Result<Vec<String>>;
    fn update_workspace_name(&self, id: &str, name: &str) -> Result<()>;
    fn update_workspace_storage_capacity(&self, id: &str, capacity: i64) -> Result<()>;
    fn delete_workspace(&self, id: &str) -> Result<bool>;

    // Permission operations on a single resource (exact level)
    fn grant_user_permission(&self, resource_id: &str, user_id: &str, level: PermissionLevel)
    -> Result<()>;
    fn revoke_user_permission(&self, resource_id: &str, user_id: &str) -> Result<()>;
    fn grant_group_permission(
        &self,
        resource_id: &str,
        group_id: &str,
        level: PermissionLevel,
    ) -> Result<()>;
    fn revoke_group_permission(&self, resource_id: &str, group_id: &str) -> Result<()>;
    fn list_user_permissions(&self, resource_id: &str) -> Result<Vec<UserPermission>>;
    fn list_group_permissions(&self, resource_id: &str) -> Result<Vec<GroupPermission>>;
    fn delete_permissions_for_resources(&self, resource_ids: &[String]) -> Result<()>;

    // File operations
    fn insert_file(&self, file: &File) -> Result<()>;
    /// Bulk insert in chunks of `chunk_size`; parents must precede children.
    fn insert_files(&self, files: &[File], chunk_size: usize) -> Result<()>;
    fn get_file(&self, id: &str) -> Result<Option<File>>;
    fn get_files(&self, ids: &[String]) -> Result<Vec<File>>;
    fn list_children(&self, id: &str) -> Result<Vec<File>>;
    fn list_children_ids(&self, id: &str) -> Result<Vec<String>>;
    fn find_child_by_name(&self, parent_id: &str, name: &str) -> Result<Option<File>>;
    /// Files from the workspace root down to `id`, inclusive.
    fn find_path(&self, id: &str) -> Result<Vec<File>>;
    /// `id` and all descendants, parents before children.
    fn find_tree(&self, id: &str) -> Result<Vec<File>>;
    fn find_tree_ids(&self, id: &str) -> Result<Vec<String>>;
    /// True if `ancestor_id` lies on the path from the root to `id`.
    fn is_grand_child_of(&self, id: &str, ancestor_id: &str) -> Result<bool>;
    fn get_tree_size(&self, id: &str) -> Result<i64>;
    /// Number of descendants of `id`, excluding itself.
    fn count_tree_items(&self, id: &str) -> Result<i64>;
    fn update_file_name(&self, id: &str, name: &str) -> Result<()>;
    fn update_file_parent(&self, id: &str, parent_id: &str) -> Result<()>;
    fn update_file_snapshot(&self, id: &str, snapshot_id: Option<&str>) -> Result<()>;
    fn update_file_text(&self, id: &str, text: Option<&str>) -> Result<()>;
    fn touch_file(&self, id: &str) -> Result<()>;
    fn delete_files(&self, ids: &[String]) -> Result<()>;

    // Tree permission operations
    /// Viewer on the workspace, viewer on every ancestor, then `level`
    /// (keeping any higher existing level) on `file_id` and its subtree.
    fn grant_user_permission_on_tree(
        &self,
        file_id: &str,
        user_id: &str,
        level: PermissionLevel,
    ) -> Result<()>;
    fn revoke_user_permission_on_tree(&self, file_id: &str, user_id: &str) -> Result<()>;
    fn grant_group_permission_on_tree(
        &self,
        file_id: &str,
        group_id: &str,
        level: PermissionLevel,
    ) -> Result<()>;
    fn revoke_group_permission_on_tree(&self, file_id: &str, group_id: &str) -> Result<()>;
    fn grant_owner_on_files(&self, file_ids: &[String], user_id: &str, chunk_size: usize)
    -> Result<()>;
    /// Deletes viewer rows of `user_id` on folders of the workspace that no
    /// longer have a granted descendant. Returns the number of rows removed.
    fn sweep_user_uplift(&self, workspace_id: &str, user_id: &str) -> Result<usize>;

    // Snapshot operations
    fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
    /// Inserts `snapshot` at the file's next version, maps it and makes it the
    /// file's active snapshot, all in one transaction.
    fn create_snapshot_for_file(&self, file_id: &str, snapshot: &Snapshot) -> Result<Snapshot>;
    fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>>;
    /// Applies a patch atomically, enforcing the expected status and the
    /// status transition rules.
    fn patch_snapshot(&self, id: &str, patch: &SnapshotPatch) -> Result<Snapshot>;
    fn delete_snapshot(&self, id: &str) -> Result<bool>;
    fn map_snapshot_with_file(&self, snapshot_id: &str, file_id: &str) -> Result<()>;
    fn detach_snapshot(&self, snapshot_id: &str, file_id: &str) -> Result<()>;
    fn delete_mappings_for_file(&self, file_id: &str) -> Result<()>;
    fn count_snapshot_associations(&self, snapshot_id: &str) -> Result<i64>;
    fn list_snapshots_for_file(&self, file_id: &str) -> Result<Vec<Snapshot>>;
    fn list_file_ids_for_snapshot(&self, snapshot_id: &str) -> Result<Vec<String>>;
    fn find_dangling_snapshots(&self) -> Result<Vec<Snapshot>>;
    fn delete_dangling_snapshots(&self) -> Result<usize>;
    fn get_latest_snapshot_version(&self, file_id: &str) -> Result<i64>;
    fn ocr_language_exists(&self, id: &str) -> Result<bool>;

    // Invitation operations
    fn create_invitation(&self, invitation: &Invitation) -> Result<()>;
    fn get_invitation(&self, id: &str) -> Result<Option<Invitation>>;
    fn update_invitation_status(&self, id: &str, status: InvitationStatus) -> Result<()>;
    fn delete_invitation(&self, id: &str) -> Result<bool>;
    fn list_incoming_invitations(&self, email: &str) -> Result<Vec<Invitation>>;
    fn list_outgoing_invitations(&self, org_id: &str, owner_id: &str) -> Result<Vec<Invitation>>;

    // Task operations
    fn create_task(&self, task: &Task) -> Result<()>;
    fn get_task(&self, id: &str) -> Result<Option<Task>>;
    fn save_task(&self, task: &Task) -> Result<()>;
    fn delete_task(&self, id: &str) -> Result<bool>;
    fn list_tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>>;
    fn count_tasks_for_user(&self, user_id: &str) -> Result<i64>;
}
