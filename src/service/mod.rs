//! Domain services: the file tree engine, snapshots, and the organization,
//! group, workspace, invitation, task and user operations around them.
//!
//! Every mutation follows the same order: authorize, write the store, then
//! update search and cache. Search and cache writes after a successful store
//! write are best effort.

mod file;
mod group;
mod invitation;
mod organization;
mod snapshot;
mod task;
mod user;
mod workspace;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use file::{CopyManyResult, CreateFileOptions, FileProbe, FileService, FileView, ListOptions};
pub use group::GroupService;
pub use invitation::InvitationService;
pub use organization::OrganizationService;
pub use snapshot::SnapshotService;
pub use task::{DismissAllResult, TaskService};
pub use user::UserService;
pub use workspace::{CreateWorkspaceOptions, WorkspaceService};

use crate::auth::Guard;
use crate::cache::{Caches, KvCache};
use crate::conversion::PipelineLauncher;
use crate::error::{Error, Result};
use crate::search::{Document, FILE_INDEX, SearchIndex, file_document};
use crate::storage::ObjectStore;
use crate::store::Store;
use crate::types::{File, Snapshot, SnapshotField, SnapshotPatch, Task, TaskPatch, TaskStatus, Workspace};

/// Payload key holding the name of the object a task works on.
pub const TASK_PAYLOAD_OBJECT: &str = "object";

/// Extracted text kept on the file row for indexing is capped to this size.
const MAX_INDEXED_TEXT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub default_storage_capacity: i64,
    /// Originals above this size skip conversion and are marked ready.
    pub file_processing_limit_bytes: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_storage_capacity: 100_000_000_000,
            file_processing_limit_bytes: 1000 * 1024 * 1024,
        }
    }
}

/// Outcome of a batch operation, by input id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// One page of results plus the totals needed by pagers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total_pages: u64,
    pub total_elements: u64,
    pub page: u64,
    pub size: u64,
}

pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Slices `items` to the 1-based `page` of `size` elements.
pub fn paginate<T>(items: Vec<T>, page: u64, size: u64) -> Result<Page<T>> {
    if page == 0 {
        return Err(Error::bad_request("invalid_page_parameter", "page must be at least 1"));
    }
    if size == 0 {
        return Err(Error::bad_request("invalid_size_parameter", "size must be at least 1"));
    }

    let total_elements = items.len() as u64;
    let total_pages = total_elements.div_ceil(size);
    let skip = usize::try_from((page - 1).saturating_mul(size)).unwrap_or(usize::MAX);
    let take = usize::try_from(size).unwrap_or(usize::MAX);
    let data = items.into_iter().skip(skip).take(take).collect();

    Ok(Page {
        data,
        total_pages,
        total_elements,
        page,
        size,
    })
}

/// Shared backends plus the operations the conversion side calls back into.
pub struct Core {
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    pub search: Arc<dyn SearchIndex>,
    pub caches: Caches,
    pub guard: Guard,
    pub settings: Settings,
}

impl Core {
    pub fn new(
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        kv: Arc<dyn KvCache>,
        search: Arc<dyn SearchIndex>,
        settings: Settings,
    ) -> Arc<Self> {
        let caches = Caches::new(kv, store.clone());
        Arc::new(Self {
            guard: Guard::new(caches.clone()),
            store,
            objects,
            search,
            caches,
            settings,
        })
    }

    pub(crate) async fn index(&self, index: &str, documents: Vec<Document>) {
        if documents.is_empty() {
            return;
        }
        if let Err(e) = self.search.index(index, documents).await {
            tracing::warn!("Failed to index {} documents: {}", index, e);
        }
    }

    pub(crate) async fn unindex(&self, index: &str, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.search.delete(index, ids).await {
            tracing::warn!("Failed to remove {} documents from {}: {}", ids.len(), index, e);
        }
    }

    /// Reloads files from the store into the cache and the file index.
    pub(crate) async fn sync_files(&self, ids: &[String]) -> Result<Vec<File>> {
        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            match self.caches.file.refresh(id).await {
                Ok(file) => files.push(file),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.index(FILE_INDEX, files.iter().map(file_document).collect())
            .await;
        Ok(files)
    }

    pub(crate) async fn sync_file(&self, id: &str) -> Result<File> {
        let file = self.caches.file.refresh(id).await?;
        self.index(FILE_INDEX, vec![file_document(&file)]).await;
        Ok(file)
    }

    /// Fails with `insufficient_storage_capacity` when `bytes` more would
    /// exceed the workspace's capacity.
    pub(crate) fn ensure_capacity(&self, workspace: &Workspace, bytes: i64) -> Result<()> {
        let used = self.store.get_tree_size(&workspace.root_id)?;
        if used.saturating_add(bytes) > workspace.storage_capacity {
            return Err(Error::bad_request(
                "insufficient_storage_capacity",
                format!(
                    "workspace '{}' has {} of {} bytes in use",
                    workspace.name, used, workspace.storage_capacity
                ),
            ));
        }
        Ok(())
    }

    /// Applies a snapshot patch, then refreshes the snapshot and every file
    /// mapped to it. A new text artifact is materialized on those files for
    /// indexing.
    pub async fn patch_snapshot(&self, id: &str, patch: &SnapshotPatch) -> Result<Snapshot> {
        let snapshot = self.store.patch_snapshot(id, patch)?;
        self.caches.snapshot.set(&snapshot).await;

        let file_ids = self.store.list_file_ids_for_snapshot(id)?;
        if patch.has(SnapshotField::Text) {
            let text = match &snapshot.text {
                Some(object) => self.read_text(&object.bucket, &object.key).await,
                None => None,
            };
            for file_id in &file_ids {
                self.store.update_file_text(file_id, text.as_deref())?;
            }
        }
        self.sync_files(&file_ids).await?;

        Ok(snapshot)
    }

    async fn read_text(&self, bucket: &str, key: &str) -> Option<String> {
        match self.objects.get_object(bucket, key, None).await {
            Ok(bytes) => {
                let end = bytes.len().min(MAX_INDEXED_TEXT_BYTES);
                Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            Err(e) => {
                tracing::warn!("Failed to read text object {}/{}: {}", bucket, key, e);
                None
            }
        }
    }

    pub async fn create_task(
        &self,
        user_id: &str,
        name: &str,
        status: TaskStatus,
        object: Option<&str>,
    ) -> Result<Task> {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            error: None,
            percentage: None,
            is_indeterminate: true,
            user_id: user_id.to_string(),
            status,
            payload: object.map(|o| HashMap::from([(TASK_PAYLOAD_OBJECT.to_string(), o.to_string())])),
            cancelled: false,
            create_time: Utc::now(),
            update_time: None,
        };
        self.store.create_task(&task)?;
        self.caches.task.set(&task).await;
        Ok(task)
    }

    pub async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        let mut task = self.caches.task.get(id).await?;
        patch.apply(&mut task);
        task.update_time = Some(Utc::now());
        self.store.save_task(&task)?;
        self.caches.task.set(&task).await;
        Ok(task)
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        self.store.delete_task(id)?;
        self.caches.task.delete(id).await;
        Ok(())
    }

    /// Deletes a bookkeeping task, logging instead of failing.
    pub(crate) async fn discard_task(&self, id: &str) {
        if let Err(e) = self.delete_task(id).await {
            tracing::warn!("Failed to delete task {}: {}", id, e);
        }
    }

    /// A missing task counts as cancelled.
    pub async fn is_task_cancelled(&self, id: &str) -> Result<bool> {
        match self.store.get_task(id)? {
            Some(task) => Ok(task.cancelled),
            None => Ok(true),
        }
    }

    /// Removes snapshots that no file maps any more, along with their
    /// objects and pending tasks. Object removal is best effort.
    pub async fn purge_dangling_snapshots(&self) -> Result<usize> {
        let dangling = self.store.find_dangling_snapshots()?;
        let mut removed = 0;

        for snapshot in dangling {
            if self.store.count_snapshot_associations(&snapshot.id)? > 0 {
                continue;
            }
            for object in snapshot.objects() {
                if let Err(e) = self.objects.remove_object(&object.bucket, &object.key).await {
                    tracing::warn!(
                        "Failed to remove object {}/{}: {}",
                        object.bucket,
                        object.key,
                        e
                    );
                }
            }
            if let Some(task_id) = &snapshot.task_id {
                self.discard_task(task_id).await;
            }
            if self.store.delete_snapshot(&snapshot.id)? {
                removed += 1;
            }
            self.caches.snapshot.delete(&snapshot.id).await;
        }

        if removed > 0 {
            tracing::info!("Purged {} dangling snapshots", removed);
        }
        Ok(removed)
    }
}

/// Every service, sharing one [`Core`].
#[derive(Clone)]
pub struct Services {
    pub core: Arc<Core>,
    pub files: FileService,
    pub snapshots: SnapshotService,
    pub workspaces: WorkspaceService,
    pub organizations: OrganizationService,
    pub groups: GroupService,
    pub invitations: InvitationService,
    pub tasks: TaskService,
    pub users: UserService,
}

impl Services {
    pub fn new(core: Arc<Core>, launcher: Arc<dyn PipelineLauncher>) -> Self {
        let snapshots = SnapshotService::new(core.clone(), launcher.clone());
        Self {
            files: FileService::new(core.clone(), snapshots.clone()),
            workspaces: WorkspaceService::new(core.clone()),
            organizations: OrganizationService::new(core.clone()),
            groups: GroupService::new(core.clone()),
            invitations: InvitationService::new(core.clone()),
            tasks: TaskService::new(core.clone()),
            users: UserService::new(core.clone()),
            snapshots,
            core,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate() {
        let page = paginate((1..=7).collect::<Vec<_>>(), 2, 3).unwrap();
        assert_eq!(page.data, vec![4, 5, 6]);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_elements, 7);

        let last = paginate((1..=7).collect::<Vec<_>>(), 3, 3).unwrap();
        assert_eq!(last.data, vec![7]);

        let beyond = paginate((1..=7).collect::<Vec<_>>(), 9, 3).unwrap();
        assert!(beyond.data.is_empty());

        assert_eq!(
            paginate(vec![1], 0, 3).unwrap_err().code(),
            "invalid_page_parameter"
        );
        assert_eq!(
            paginate(vec![1], 1, 0).unwrap_err().code(),
            "invalid_size_parameter"
        );
    }
}
