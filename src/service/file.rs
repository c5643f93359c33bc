use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BatchResult, Core, Page, SnapshotService, paginate};
use crate::error::{Entity, Error, Result};
use crate::search::{FILE_INDEX, SearchQuery};
use crate::store::BULK_CHUNK_SIZE;
use crate::store::path::{split_path, validate_name};
use crate::types::{
    File, FileType, GroupPermission, PermissionLevel, S3Reference, Snapshot, TaskStatus,
    UserPermission, Workspace,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileOptions {
    pub workspace_id: String,
    /// Defaults to the workspace root.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "type")]
    pub file_type: Option<FileType>,
    /// Free-text query over names and extracted text in the subtree.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProbe {
    pub total_pages: u64,
    pub total_elements: u64,
}

/// A file as returned to clients: its active snapshot and the caller's level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileView {
    #[serde(flatten)]
    pub file: File,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<PermissionLevel>,
}

impl FileView {
    /// Size of the active original, zero for folders and empty files.
    #[must_use]
    pub fn size(&self) -> i64 {
        self.snapshot
            .as_ref()
            .and_then(|s| s.original.as_ref())
            .map_or(0, |o| o.size)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyManyResult {
    pub new: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// The file tree engine: hierarchical files with permission propagation,
/// cheap copies and cache coherence.
#[derive(Clone)]
pub struct FileService {
    core: Arc<Core>,
    snapshots: SnapshotService,
}

impl FileService {
    pub fn new(core: Arc<Core>, snapshots: SnapshotService) -> Self {
        Self { core, snapshots }
    }

    async fn authorized(&self, id: &str, user_id: &str, level: PermissionLevel) -> Result<File> {
        let file = self.core.caches.file.get(id).await?;
        self.core.guard.authorize(user_id, &file, level).await?;
        Ok(file)
    }

    async fn authorized_children(&self, id: &str, user_id: &str) -> Result<Vec<File>> {
        let children = self.core.store.list_children(id)?;
        self.core
            .guard
            .filter(user_id, children, PermissionLevel::Viewer)
            .await
    }

    /// Case-insensitive sibling name check, ignoring `exclude_id`.
    fn has_similar_sibling(&self, parent_id: &str, name: &str, exclude_id: Option<&str>) -> Result<bool> {
        let name = name.to_lowercase();
        Ok(self
            .core
            .store
            .list_children(parent_id)?
            .iter()
            .any(|c| Some(c.id.as_str()) != exclude_id && c.name.to_lowercase() == name))
    }

    async fn prepare_create(
        &self,
        opts: &CreateFileOptions,
        user_id: &str,
    ) -> Result<(Workspace, File, String)> {
        let workspace = self.core.caches.workspace.get(&opts.workspace_id).await?;
        self.core
            .guard
            .authorize(user_id, &workspace, PermissionLevel::Viewer)
            .await?;

        let parent_id = opts.parent_id.as_deref().unwrap_or(&workspace.root_id);
        let parent = self.authorized(parent_id, user_id, PermissionLevel::Editor).await?;
        if !parent.is_folder() {
            return Err(Error::bad_request("file_is_not_a_folder", "parent is not a folder"));
        }
        if parent.workspace_id != workspace.id {
            return Err(Error::bad_request(
                "file_not_in_workspace",
                "parent does not belong to the workspace",
            ));
        }

        let name = validate_name(&opts.name)?;
        if self.has_similar_sibling(&parent.id, &name, None)? {
            return Err(Error::similar_name_exists());
        }
        Ok((workspace, parent, name))
    }

    async fn insert(&self, parent: &File, name: String, file_type: FileType, user_id: &str) -> Result<File> {
        let file = File {
            id: Uuid::new_v4().to_string(),
            workspace_id: parent.workspace_id.clone(),
            name,
            file_type,
            parent_id: Some(parent.id.clone()),
            snapshot_id: None,
            text: None,
            user_permissions: Vec::new(),
            group_permissions: Vec::new(),
            create_time: Utc::now(),
            update_time: None,
        };
        self.core.store.insert_file(&file)?;
        self.core
            .store
            .grant_user_permission_on_tree(&file.id, user_id, PermissionLevel::Owner)?;
        self.core.store.touch_file(&parent.id)?;

        self.core.sync_files(&[parent.id.clone()]).await?;
        self.core.sync_file(&file.id).await
    }

    pub async fn view(&self, file: File, user_id: &str) -> Result<FileView> {
        let snapshot = match &file.snapshot_id {
            Some(id) => self.core.caches.snapshot.find(id).await?,
            None => None,
        };
        let permission = self.core.guard.effective_level(user_id, &file).await?;
        Ok(FileView {
            file,
            snapshot,
            permission,
        })
    }

    pub async fn views(&self, files: Vec<File>, user_id: &str) -> Result<Vec<FileView>> {
        let mut views = Vec::with_capacity(files.len());
        for file in files {
            views.push(self.view(file, user_id).await?);
        }
        Ok(views)
    }

    pub async fn create(&self, opts: &CreateFileOptions, user_id: &str) -> Result<File> {
        let (_, parent, name) = self.prepare_create(opts, user_id).await?;
        let file = self.insert(&parent, name, opts.file_type, user_id).await?;
        tracing::debug!("Created {} {} in {}", file.file_type, file.id, parent.id);
        Ok(file)
    }

    /// Creates a file whose original has already been written to the
    /// workspace bucket, then starts conversion.
    pub async fn create_from_s3(
        &self,
        opts: &CreateFileOptions,
        s3ref: &S3Reference,
        user_id: &str,
    ) -> Result<File> {
        if opts.file_type != FileType::File {
            return Err(Error::bad_request("invalid_file_type", "only files have contents"));
        }
        let (workspace, parent, name) = self.prepare_create(opts, user_id).await?;
        check_reference(&workspace, s3ref)?;
        self.core.ensure_capacity(&workspace, s3ref.size)?;

        let file = self.insert(&parent, name, FileType::File, user_id).await?;
        self.snapshots.store(&file, s3ref, user_id).await?;
        self.core.caches.file.get(&file.id).await
    }

    /// Adds a new snapshot version to an existing file.
    pub async fn patch_from_s3(&self, id: &str, s3ref: &S3Reference, user_id: &str) -> Result<File> {
        let file = self.authorized(id, user_id, PermissionLevel::Editor).await?;
        if file.is_folder() {
            return Err(Error::bad_request("file_is_a_folder", "folders have no contents"));
        }
        let workspace = self.core.caches.workspace.get(&file.workspace_id).await?;
        check_reference(&workspace, s3ref)?;
        self.core.ensure_capacity(&workspace, s3ref.size)?;

        self.snapshots.store(&file, s3ref, user_id).await?;
        self.core.caches.file.get(&file.id).await
    }

    pub async fn find(&self, id: &str, user_id: &str) -> Result<File> {
        self.authorized(id, user_id, PermissionLevel::Viewer).await
    }

    /// Files among `ids` the user can view; missing ones are skipped.
    pub async fn find_many(&self, ids: &[String], user_id: &str) -> Result<Vec<File>> {
        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(file) = self.core.caches.file.find(id).await? {
                files.push(file);
            }
        }
        self.core
            .guard
            .filter(user_id, files, PermissionLevel::Viewer)
            .await
    }

    /// Resolves `/<workspace>/<a>/<b>`. `/` is a synthetic folder standing
    /// for the user's workspace list.
    pub async fn find_by_path(&self, path: &str, user_id: &str) -> Result<File> {
        let components = split_path(path)?;
        let Some((workspace_name, rest)) = components.split_first() else {
            return Ok(virtual_root(user_id));
        };

        let mut current = self.workspace_root(workspace_name, user_id).await?;
        for component in rest {
            if !current.is_folder() {
                return Err(Error::NotFound(Entity::File));
            }
            current = self
                .authorized_children(&current.id, user_id)
                .await?
                .into_iter()
                .find(|c| &c.name == component)
                .ok_or(Error::NotFound(Entity::File))?;
        }
        Ok(current)
    }

    async fn workspace_root(&self, name: &str, user_id: &str) -> Result<File> {
        let candidates = self.core.store.get_workspace_by_name(name)?;
        let viewable = self
            .core
            .guard
            .filter(user_id, candidates, PermissionLevel::Viewer)
            .await?;
        let workspace = viewable
            .into_iter()
            .next()
            .ok_or(Error::NotFound(Entity::File))?;
        self.core
            .caches
            .file
            .get(&workspace.root_id)
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(Entity::File),
                e => e,
            })
    }

    pub async fn list_by_path(&self, path: &str, user_id: &str) -> Result<Vec<File>> {
        if split_path(path)?.is_empty() {
            let workspaces = self.core.store.list_workspaces_for_user(user_id)?;
            let workspaces = self
                .core
                .guard
                .filter(user_id, workspaces, PermissionLevel::Viewer)
                .await?;
            let mut roots = Vec::with_capacity(workspaces.len());
            for workspace in workspaces {
                if let Some(root) = self.core.caches.file.find(&workspace.root_id).await? {
                    roots.push(root);
                }
            }
            return Ok(roots);
        }

        let file = self.find_by_path(path, user_id).await?;
        if file.is_folder() {
            self.authorized_children(&file.id, user_id).await
        } else {
            Ok(vec![file])
        }
    }

    /// Files from the workspace root down to `id`.
    pub async fn find_path(&self, id: &str, user_id: &str) -> Result<Vec<File>> {
        self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        self.core.store.find_path(id)
    }

    async fn list_matching(&self, folder: &File, opts: &ListOptions, user_id: &str) -> Result<Vec<File>> {
        let files = match opts.query.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let query = SearchQuery::text(text).filter("workspace_id", &folder.workspace_id);
                let documents = self.core.search.query(FILE_INDEX, &query).await?;
                let mut files = Vec::new();
                for document in documents {
                    if document.id == folder.id
                        || !self.core.store.is_grand_child_of(&document.id, &folder.id)?
                    {
                        continue;
                    }
                    if let Some(file) = self.core.caches.file.find(&document.id).await? {
                        files.push(file);
                    }
                }
                self.core
                    .guard
                    .filter(user_id, files, PermissionLevel::Viewer)
                    .await?
            }
            _ => self.authorized_children(&folder.id, user_id).await?,
        };

        Ok(match opts.file_type {
            Some(file_type) => files.into_iter().filter(|f| f.file_type == file_type).collect(),
            None => files,
        })
    }

    async fn viewable_folder(&self, id: &str, user_id: &str) -> Result<File> {
        let folder = self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        if !folder.is_folder() {
            return Err(Error::bad_request("file_is_not_a_folder", "file is not a folder"));
        }
        Ok(folder)
    }

    pub async fn list_children(&self, id: &str, opts: &ListOptions, user_id: &str) -> Result<Page<File>> {
        let folder = self.viewable_folder(id, user_id).await?;
        let files = self.list_matching(&folder, opts, user_id).await?;
        paginate(
            files,
            opts.page.unwrap_or(1),
            opts.size.unwrap_or(super::DEFAULT_PAGE_SIZE),
        )
    }

    pub async fn probe(&self, id: &str, opts: &ListOptions, user_id: &str) -> Result<FileProbe> {
        let page = self.list_children(id, opts, user_id).await?;
        Ok(FileProbe {
            total_pages: page.total_pages,
            total_elements: page.total_elements,
        })
    }

    /// Sum of original sizes over the subtree.
    pub async fn get_size(&self, id: &str, user_id: &str) -> Result<i64> {
        self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        self.core.store.get_tree_size(id)
    }

    pub async fn get_count(&self, id: &str, user_id: &str) -> Result<i64> {
        self.authorized(id, user_id, PermissionLevel::Viewer).await?;
        self.core.store.count_tree_items(id)
    }

    pub async fn rename(&self, id: &str, name: &str, user_id: &str) -> Result<File> {
        let file = self.authorized(id, user_id, PermissionLevel::Editor).await?;
        let name = validate_name(name)?;
        if name == file.name {
            return Ok(file);
        }
        if let Some(parent_id) = &file.parent_id {
            if self.has_similar_sibling(parent_id, &name, Some(&file.id))? {
                return Err(Error::similar_name_exists());
            }
        }

        self.core.store.update_file_name(&file.id, &name)?;
        self.core.sync_file(&file.id).await
    }

    /// Clones the subtree of `source_id` under `target_id`. Clones share the
    /// origin's snapshots and belong to the caller.
    pub async fn copy(&self, source_id: &str, target_id: &str, user_id: &str) -> Result<File> {
        let source = self.authorized(source_id, user_id, PermissionLevel::Editor).await?;
        let target = self.authorized(target_id, user_id, PermissionLevel::Editor).await?;

        if source.id == target.id {
            return Err(Error::bad_request(
                "file_cannot_be_copied_into_itself",
                "a file cannot be copied into itself",
            ));
        }
        if !target.is_folder() {
            return Err(Error::bad_request("file_is_not_a_folder", "target is not a folder"));
        }
        if source.workspace_id != target.workspace_id {
            return Err(Error::bad_request(
                "file_cannot_be_copied_across_workspaces",
                "files cannot be copied across workspaces",
            ));
        }
        if self.core.store.is_grand_child_of(&target.id, &source.id)? {
            return Err(Error::bad_request(
                "file_cannot_be_copied_into_own_subtree",
                "a folder cannot be copied into its own subtree",
            ));
        }

        let workspace = self.core.caches.workspace.get(&target.workspace_id).await?;
        self.core
            .ensure_capacity(&workspace, self.core.store.get_tree_size(&source.id)?)?;

        let task = self
            .core
            .create_task(user_id, "Copying.", TaskStatus::Running, Some(&source.name))
            .await?;
        let result = self.clone_tree(&source, &target, user_id).await;
        self.core.discard_task(&task.id).await;
        result
    }

    async fn clone_tree(&self, source: &File, target: &File, user_id: &str) -> Result<File> {
        let tree = self.core.store.find_tree(&source.id)?;
        let taken: HashSet<String> = self
            .core
            .store
            .list_children(&target.id)?
            .into_iter()
            .map(|c| c.name.to_lowercase())
            .collect();

        let now = Utc::now();
        let mut ids: HashMap<String, String> = HashMap::with_capacity(tree.len());
        let mut clones = Vec::with_capacity(tree.len());

        for node in &tree {
            let id = Uuid::new_v4().to_string();
            let (parent_id, name) = if node.id == source.id {
                (target.id.clone(), unique_copy_name(&node.name, node.is_folder(), &taken))
            } else {
                let parent = node
                    .parent_id
                    .as_ref()
                    .and_then(|p| ids.get(p))
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("orphaned node {} in tree", node.id)))?;
                (parent, node.name.clone())
            };
            ids.insert(node.id.clone(), id.clone());
            clones.push(File {
                id,
                workspace_id: target.workspace_id.clone(),
                name,
                file_type: node.file_type,
                parent_id: Some(parent_id),
                snapshot_id: node.snapshot_id.clone(),
                text: node.text.clone(),
                user_permissions: Vec::new(),
                group_permissions: Vec::new(),
                create_time: now,
                update_time: None,
            });
        }

        let clone_ids: Vec<String> = clones.iter().map(|c| c.id.clone()).collect();
        self.core.store.insert_files(&clones, BULK_CHUNK_SIZE)?;
        self.core
            .store
            .grant_owner_on_files(&clone_ids, user_id, BULK_CHUNK_SIZE)?;
        // A clone shares only the active snapshot of its origin.
        for clone in &clones {
            if let Some(snapshot_id) = &clone.snapshot_id {
                self.core.store.map_snapshot_with_file(snapshot_id, &clone.id)?;
            }
        }
        self.core.store.touch_file(&target.id)?;

        self.core.sync_files(&clone_ids).await?;
        self.core.sync_file(&target.id).await?;
        tracing::info!(
            "Copied {} ({} files) into {}",
            source.id,
            clone_ids.len(),
            target.id
        );

        let root = clone_ids
            .first()
            .ok_or_else(|| Error::Internal("empty tree".to_string()))?;
        self.core.caches.file.get(root).await
    }

    pub async fn copy_many(&self, source_ids: &[String], target_id: &str, user_id: &str) -> CopyManyResult {
        let mut result = CopyManyResult::default();
        for id in source_ids {
            match self.copy(id, target_id, user_id).await {
                Ok(clone) => {
                    result.new.push(clone.id);
                    result.succeeded.push(id.clone());
                }
                Err(e) => {
                    tracing::debug!("Copy of {} failed: {}", id, e);
                    result.failed.push(id.clone());
                }
            }
        }
        result
    }

    /// Reparents `source_id` under `target_id`. Permissions are not copied.
    pub async fn move_file(&self, source_id: &str, target_id: &str, user_id: &str) -> Result<File> {
        let source = self.authorized(source_id, user_id, PermissionLevel::Editor).await?;
        let target = self.authorized(target_id, user_id, PermissionLevel::Editor).await?;

        if source.parent_id.as_deref() == Some(target.id.as_str()) {
            return Err(Error::bad_request(
                "file_already_child_of_destination",
                "file is already a child of the destination",
            ));
        }
        if source.id == target.id {
            return Err(Error::bad_request(
                "file_cannot_be_moved_into_itself",
                "a file cannot be moved into itself",
            ));
        }
        if !target.is_folder() {
            return Err(Error::bad_request("file_is_not_a_folder", "target is not a folder"));
        }
        if source.workspace_id != target.workspace_id {
            return Err(Error::bad_request(
                "file_cannot_be_moved_across_workspaces",
                "files cannot be moved across workspaces",
            ));
        }
        if self.core.store.is_grand_child_of(&target.id, &source.id)? {
            return Err(Error::bad_request(
                "target_is_grand_child_of_source",
                "the target is inside the moved folder",
            ));
        }
        if self.has_similar_sibling(&target.id, &source.name, None)? {
            return Err(Error::similar_name_exists());
        }

        let task = self
            .core
            .create_task(user_id, "Moving.", TaskStatus::Running, Some(&source.name))
            .await?;
        let result = self.reparent(&source, &target).await;
        self.core.discard_task(&task.id).await;
        result
    }

    async fn reparent(&self, source: &File, target: &File) -> Result<File> {
        self.core.store.update_file_parent(&source.id, &target.id)?;
        self.core.store.touch_file(&target.id)?;

        let mut affected = self.core.store.find_tree_ids(&source.id)?;
        affected.push(target.id.clone());
        if let Some(old_parent) = &source.parent_id {
            self.core.store.touch_file(old_parent)?;
            affected.push(old_parent.clone());
        }
        self.core.sync_files(&affected).await?;

        tracing::info!("Moved {} into {}", source.id, target.id);
        self.core.caches.file.get(&source.id).await
    }

    pub async fn move_many(&self, source_ids: &[String], target_id: &str, user_id: &str) -> BatchResult {
        let mut result = BatchResult::default();
        for id in source_ids {
            match self.move_file(id, target_id, user_id).await {
                Ok(_) => result.succeeded.push(id.clone()),
                Err(e) => {
                    tracing::debug!("Move of {} failed: {}", id, e);
                    result.failed.push(id.clone());
                }
            }
        }
        result
    }

    /// Deletes the subtree of `id` and collects snapshots left dangling.
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let file = self.authorized(id, user_id, PermissionLevel::Owner).await?;
        if file.is_root() {
            return Err(Error::forbidden(
                "cannot_delete_workspace_root",
                "the root folder of a workspace cannot be deleted",
            ));
        }

        let task = self
            .core
            .create_task(user_id, "Deleting.", TaskStatus::Running, Some(&file.name))
            .await?;
        let result = self.delete_tree(&file).await;
        self.core.discard_task(&task.id).await;
        result
    }

    async fn delete_tree(&self, file: &File) -> Result<()> {
        let ids = self.core.store.find_tree_ids(&file.id)?;
        self.core.store.delete_files(&ids)?;

        self.core.unindex(FILE_INDEX, &ids).await;
        for id in &ids {
            self.core.caches.file.delete(id).await;
        }
        if let Some(parent_id) = &file.parent_id {
            self.core.store.touch_file(parent_id)?;
            self.core.sync_files(&[parent_id.clone()]).await?;
        }
        tracing::info!("Deleted {} ({} files)", file.id, ids.len());

        self.core.purge_dangling_snapshots().await?;
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[String], user_id: &str) -> BatchResult {
        let mut result = BatchResult::default();
        for id in ids {
            match self.delete(id, user_id).await {
                Ok(()) => result.succeeded.push(id.clone()),
                Err(e) => {
                    tracing::debug!("Delete of {} failed: {}", id, e);
                    result.failed.push(id.clone());
                }
            }
        }
        result
    }

    /// Refreshes the workspace, the path to `file` and its subtree.
    async fn sync_grants(&self, file: &File) -> Result<()> {
        if let Err(e) = self.core.caches.workspace.refresh(&file.workspace_id).await {
            tracing::warn!("Failed to refresh workspace {}: {}", file.workspace_id, e);
        }
        let mut ids: Vec<String> = self
            .core
            .store
            .find_path(&file.id)?
            .into_iter()
            .map(|f| f.id)
            .collect();
        ids.extend(self.core.store.find_tree_ids(&file.id)?.into_iter().skip(1));
        self.core.caches.file.refresh_many(&ids).await
    }

    fn ensure_user(&self, user_id: &str) -> Result<()> {
        self.core
            .store
            .get_user(user_id)?
            .map(|_| ())
            .ok_or(Error::NotFound(Entity::User))
    }

    async fn ensure_group(&self, group_id: &str, caller_id: &str) -> Result<()> {
        let group = self.core.caches.group.get(group_id).await?;
        self.core
            .guard
            .authorize(caller_id, &group, PermissionLevel::Viewer)
            .await
    }

    pub async fn grant_user_permission(
        &self,
        ids: &[String],
        user_id: &str,
        level: PermissionLevel,
        caller_id: &str,
    ) -> Result<()> {
        self.ensure_user(user_id)?;
        for id in ids {
            let file = self.authorized(id, caller_id, PermissionLevel::Owner).await?;
            self.core
                .store
                .grant_user_permission_on_tree(&file.id, user_id, level)?;
            self.sync_grants(&file).await?;
        }
        Ok(())
    }

    pub async fn revoke_user_permission(&self, ids: &[String], user_id: &str, caller_id: &str) -> Result<()> {
        self.ensure_user(user_id)?;
        for id in ids {
            let file = self.authorized(id, caller_id, PermissionLevel::Owner).await?;
            self.core
                .store
                .revoke_user_permission_on_tree(&file.id, user_id)?;
            self.sync_grants(&file).await?;
        }
        Ok(())
    }

    pub async fn grant_group_permission(
        &self,
        ids: &[String],
        group_id: &str,
        level: PermissionLevel,
        caller_id: &str,
    ) -> Result<()> {
        self.ensure_group(group_id, caller_id).await?;
        for id in ids {
            let file = self.authorized(id, caller_id, PermissionLevel::Owner).await?;
            self.core
                .store
                .grant_group_permission_on_tree(&file.id, group_id, level)?;
            self.sync_grants(&file).await?;
        }
        Ok(())
    }

    pub async fn revoke_group_permission(&self, ids: &[String], group_id: &str, caller_id: &str) -> Result<()> {
        self.ensure_group(group_id, caller_id).await?;
        for id in ids {
            let file = self.authorized(id, caller_id, PermissionLevel::Owner).await?;
            self.core
                .store
                .revoke_group_permission_on_tree(&file.id, group_id)?;
            self.sync_grants(&file).await?;
        }
        Ok(())
    }

    /// Direct user grants on a file, excluding the caller's own.
    pub async fn user_permissions(&self, id: &str, caller_id: &str) -> Result<Vec<UserPermission>> {
        self.authorized(id, caller_id, PermissionLevel::Owner).await?;
        Ok(self
            .core
            .store
            .list_user_permissions(id)?
            .into_iter()
            .filter(|p| p.user_id != caller_id)
            .collect())
    }

    pub async fn group_permissions(&self, id: &str, caller_id: &str) -> Result<Vec<GroupPermission>> {
        self.authorized(id, caller_id, PermissionLevel::Owner).await?;
        self.core.store.list_group_permissions(id)
    }

    /// Drops viewer rows of `user_id` on folders that no longer lead to any
    /// of their grants. Returns the number of rows removed.
    pub async fn sweep_uplift(&self, workspace_id: &str, user_id: &str, caller_id: &str) -> Result<usize> {
        let workspace = self.core.caches.workspace.get(workspace_id).await?;
        self.core
            .guard
            .authorize(caller_id, &workspace, PermissionLevel::Owner)
            .await?;

        let removed = self.core.store.sweep_user_uplift(workspace_id, user_id)?;
        if removed > 0 {
            self.core.caches.workspace.refresh(workspace_id).await?;
            let ids = self.core.store.find_tree_ids(&workspace.root_id)?;
            self.core.caches.file.refresh_many(&ids).await?;
            tracing::info!(
                "Swept {} uplift grants of {} in workspace {}",
                removed,
                user_id,
                workspace_id
            );
        }
        Ok(removed)
    }
}

fn check_reference(workspace: &Workspace, s3ref: &S3Reference) -> Result<()> {
    if s3ref.bucket != workspace.bucket {
        return Err(Error::bad_request(
            "invalid_s3_reference",
            "the object does not belong to the workspace bucket",
        ));
    }
    if s3ref.size < 0 {
        return Err(Error::bad_request("invalid_s3_reference", "size cannot be negative"));
    }
    Ok(())
}

fn virtual_root(user_id: &str) -> File {
    File {
        id: user_id.to_string(),
        workspace_id: String::new(),
        name: "/".to_string(),
        file_type: FileType::Folder,
        parent_id: None,
        snapshot_id: None,
        text: None,
        user_permissions: Vec::new(),
        group_permissions: Vec::new(),
        create_time: Utc::now(),
        update_time: None,
    }
}

/// `name` if free, else `stem (Copy)ext`, `stem (Copy 2)ext` and so on.
/// `taken` holds lowercased sibling names.
fn unique_copy_name(name: &str, is_folder: bool, taken: &HashSet<String>) -> String {
    if !taken.contains(&name.to_lowercase()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 && !is_folder => name.split_at(idx),
        _ => (name, ""),
    };

    let mut n = 1;
    loop {
        let candidate = if n == 1 {
            format!("{stem} (Copy){ext}")
        } else {
            format!("{stem} (Copy {n}){ext}")
        };
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taken(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_lowercase()).collect()
    }

    #[test]
    fn test_unique_copy_name_free() {
        assert_eq!(unique_copy_name("a.txt", false, &taken(&["b.txt"])), "a.txt");
    }

    #[test]
    fn test_unique_copy_name_keeps_extension() {
        assert_eq!(
            unique_copy_name("Report.pdf", false, &taken(&["report.PDF"])),
            "Report (Copy).pdf"
        );
        assert_eq!(
            unique_copy_name("a.txt", false, &taken(&["a.txt", "a (copy).txt"])),
            "a (Copy 2).txt"
        );
    }

    #[test]
    fn test_unique_copy_name_folders_and_dotfiles() {
        assert_eq!(unique_copy_name("v1.2", true, &taken(&["v1.2"])), "v1.2 (Copy)");
        assert_eq!(unique_copy_name(".env", false, &taken(&[".env"])), ".env (Copy)");
    }

    #[test]
    fn test_virtual_root() {
        let root = virtual_root("u1");
        assert_eq!(root.id, "u1");
        assert_eq!(root.name, "/");
        assert!(root.is_folder());
        assert!(root.workspace_id.is_empty());
    }
}
