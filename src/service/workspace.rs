use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Core;
use crate::error::{Error, Result};
use crate::search::{FILE_INDEX, WORKSPACE_INDEX, file_document, workspace_document};
use crate::store::path::validate_name;
use crate::types::{File, FileType, PermissionLevel, Workspace};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkspaceOptions {
    pub name: String,
    pub organization_id: String,
    /// Defaults to the configured capacity.
    #[serde(default)]
    pub storage_capacity: Option<i64>,
}

#[derive(Clone)]
pub struct WorkspaceService {
    core: Arc<Core>,
}

impl WorkspaceService {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    async fn authorized(&self, id: &str, user_id: &str, level: PermissionLevel) -> Result<Workspace> {
        let workspace = self.core.caches.workspace.get(id).await?;
        self.core.guard.authorize(user_id, &workspace, level).await?;
        Ok(workspace)
    }

    /// Creates the bucket, the workspace and its root folder. The creator
    /// owns both.
    pub async fn create(&self, opts: &CreateWorkspaceOptions, user_id: &str) -> Result<Workspace> {
        let org = self.core.caches.organization.get(&opts.organization_id).await?;
        self.core
            .guard
            .authorize(user_id, &org, PermissionLevel::Editor)
            .await?;

        let name = validate_name(&opts.name)?;
        let capacity = opts
            .storage_capacity
            .unwrap_or(self.core.settings.default_storage_capacity);
        if capacity <= 0 {
            return Err(Error::bad_request(
                "invalid_storage_capacity",
                "storage capacity must be positive",
            ));
        }

        let now = Utc::now();
        let workspace = Workspace {
            id: Uuid::new_v4().to_string(),
            name: name.clone(),
            organization_id: org.id.clone(),
            root_id: Uuid::new_v4().to_string(),
            storage_capacity: capacity,
            bucket: Uuid::new_v4().simple().to_string(),
            user_permissions: Vec::new(),
            group_permissions: Vec::new(),
            create_time: now,
            update_time: None,
        };
        let root = File {
            id: workspace.root_id.clone(),
            workspace_id: workspace.id.clone(),
            name,
            file_type: FileType::Folder,
            parent_id: None,
            snapshot_id: None,
            text: None,
            user_permissions: Vec::new(),
            group_permissions: Vec::new(),
            create_time: now,
            update_time: None,
        };

        self.core.objects.make_bucket(&workspace.bucket).await?;
        if let Err(e) = self.core.store.create_workspace(&workspace, &root) {
            if let Err(e) = self.core.objects.remove_bucket(&workspace.bucket).await {
                tracing::warn!("Failed to remove bucket {}: {}", workspace.bucket, e);
            }
            return Err(e);
        }
        self.core
            .store
            .grant_user_permission(&workspace.id, user_id, PermissionLevel::Owner)?;
        self.core
            .store
            .grant_user_permission(&root.id, user_id, PermissionLevel::Owner)?;

        let workspace = self.core.caches.workspace.refresh(&workspace.id).await?;
        let root = self.core.caches.file.refresh(&root.id).await?;
        self.core
            .index(WORKSPACE_INDEX, vec![workspace_document(&workspace)])
            .await;
        self.core.index(FILE_INDEX, vec![file_document(&root)]).await;

        tracing::info!("Created workspace {} ({})", workspace.name, workspace.id);
        Ok(workspace)
    }

    pub async fn find(&self, id: &str, user_id: &str) -> Result<Workspace> {
        self.authorized(id, user_id, PermissionLevel::Viewer).await
    }

    pub async fn find_all(&self, user_id: &str) -> Result<Vec<Workspace>> {
        let workspaces = self.core.store.list_workspaces_for_user(user_id)?;
        self.core
            .guard
            .filter(user_id, workspaces, PermissionLevel::Viewer)
            .await
    }

    /// Renames the workspace and its root folder.
    pub async fn patch_name(&self, id: &str, name: &str, user_id: &str) -> Result<Workspace> {
        let workspace = self.authorized(id, user_id, PermissionLevel::Editor).await?;
        let name = validate_name(name)?;

        self.core.store.update_workspace_name(&workspace.id, &name)?;
        self.core.store.update_file_name(&workspace.root_id, &name)?;

        let workspace = self.sync(&workspace.id).await?;
        self.core.sync_file(&workspace.root_id).await?;
        Ok(workspace)
    }

    pub async fn patch_storage_capacity(&self, id: &str, capacity: i64, user_id: &str) -> Result<Workspace> {
        let workspace = self.authorized(id, user_id, PermissionLevel::Owner).await?;
        if capacity <= 0 {
            return Err(Error::bad_request(
                "invalid_storage_capacity",
                "storage capacity must be positive",
            ));
        }
        let used = self.core.store.get_tree_size(&workspace.root_id)?;
        if capacity < used {
            return Err(Error::bad_request(
                "insufficient_storage_capacity",
                format!("{used} bytes are already in use"),
            ));
        }

        self.core
            .store
            .update_workspace_storage_capacity(&workspace.id, capacity)?;
        self.sync(&workspace.id).await
    }

    async fn sync(&self, id: &str) -> Result<Workspace> {
        let workspace = self.core.caches.workspace.refresh(id).await?;
        self.core
            .index(WORKSPACE_INDEX, vec![workspace_document(&workspace)])
            .await;
        Ok(workspace)
    }

    pub async fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let workspace = self.authorized(id, user_id, PermissionLevel::Owner).await?;
        remove_workspace(&self.core, &workspace).await
    }

    /// Whether `bytes` more fit in the workspace.
    pub async fn has_enough_space(&self, id: &str, bytes: i64, user_id: &str) -> Result<bool> {
        let workspace = self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        match self.core.ensure_capacity(&workspace, bytes) {
            Ok(()) => Ok(true),
            Err(Error::BadRequest { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Deletes the workspace rows, then its bucket and dangling snapshots.
pub(super) async fn remove_workspace(core: &Core, workspace: &Workspace) -> Result<()> {
    let file_ids = core.store.find_tree_ids(&workspace.root_id)?;
    core.store.delete_workspace(&workspace.id)?;

    core.unindex(WORKSPACE_INDEX, std::slice::from_ref(&workspace.id))
        .await;
    core.unindex(FILE_INDEX, &file_ids).await;
    core.caches.workspace.delete(&workspace.id).await;
    for id in &file_ids {
        core.caches.file.delete(id).await;
    }

    core.purge_dangling_snapshots().await?;
    if let Err(e) = core.objects.remove_bucket(&workspace.bucket).await {
        tracing::warn!("Failed to remove bucket {}: {}", workspace.bucket, e);
    }

    tracing::info!("Deleted workspace {} ({})", workspace.name, workspace.id);
    Ok(())
}
