use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use super::Core;
use crate::conversion::PipelineLauncher;
use crate::error::{Entity, Error, Result};
use crate::types::{
    File, PAYLOAD_LANGUAGE, PAYLOAD_USER, PAYLOAD_WORKSPACE, PermissionLevel, PipelineId,
    PipelineRunOptions, S3Reference, Snapshot, SnapshotPatch, SnapshotStatus, TaskPatch,
    TaskStatus,
};

/// Snapshot versions of files and the hand-off to conversion.
#[derive(Clone)]
pub struct SnapshotService {
    core: Arc<Core>,
    launcher: Arc<dyn PipelineLauncher>,
}

impl SnapshotService {
    pub fn new(core: Arc<Core>, launcher: Arc<dyn PipelineLauncher>) -> Self {
        Self { core, launcher }
    }

    async fn authorized_file(&self, id: &str, user_id: &str, level: PermissionLevel) -> Result<File> {
        let file = self.core.caches.file.get(id).await?;
        self.core.guard.authorize(user_id, &file, level).await?;
        Ok(file)
    }

    /// The snapshot plus one mapped file the user holds `level` on. When
    /// `file_id` is given it must be mapped to the snapshot.
    async fn authorized(
        &self,
        id: &str,
        file_id: Option<&str>,
        user_id: &str,
        level: PermissionLevel,
    ) -> Result<(Snapshot, File)> {
        let snapshot = self.core.caches.snapshot.get(id).await?;
        let mapped = self.core.store.list_file_ids_for_snapshot(id)?;

        let candidates: Vec<&String> = match file_id {
            Some(file_id) => mapped.iter().filter(|m| *m == file_id).collect(),
            None => mapped.iter().collect(),
        };

        let mut denied = None;
        for candidate in candidates {
            let Some(file) = self.core.caches.file.find(candidate).await? else {
                continue;
            };
            match self.core.guard.authorize(user_id, &file, level).await {
                Ok(()) => return Ok((snapshot, file)),
                Err(e @ Error::MissingPermission(..)) => denied = Some(e),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Err(denied.unwrap_or(Error::NotFound(Entity::Snapshot)))
    }

    /// Snapshots of a file, oldest version first.
    pub async fn list(&self, file_id: &str, user_id: &str) -> Result<Vec<Snapshot>> {
        self.authorized_file(file_id, user_id, PermissionLevel::Viewer)
            .await?;
        self.core.store.list_snapshots_for_file(file_id)
    }

    pub async fn find(&self, id: &str, user_id: &str) -> Result<Snapshot> {
        let (snapshot, _) = self
            .authorized(id, None, user_id, PermissionLevel::Viewer)
            .await?;
        Ok(snapshot)
    }

    /// Makes the snapshot the active one of a file it is mapped to.
    pub async fn activate(&self, id: &str, file_id: Option<&str>, user_id: &str) -> Result<File> {
        let (snapshot, file) = self
            .authorized(id, file_id, user_id, PermissionLevel::Editor)
            .await?;
        self.core.store.update_file_snapshot(&file.id, Some(&snapshot.id))?;
        self.core.sync_file(&file.id).await
    }

    /// Unmaps the snapshot from a file. The snapshot and its objects are
    /// removed once no file maps it, and the file falls back to its latest
    /// remaining version.
    pub async fn detach(&self, id: &str, file_id: Option<&str>, user_id: &str) -> Result<File> {
        let (snapshot, file) = self
            .authorized(id, file_id, user_id, PermissionLevel::Owner)
            .await?;

        self.core.store.detach_snapshot(&snapshot.id, &file.id)?;
        if self.core.store.count_snapshot_associations(&snapshot.id)? == 0 {
            self.remove(&snapshot).await?;
        }

        if file.snapshot_id.as_deref() == Some(snapshot.id.as_str()) {
            let latest = self.core.store.list_snapshots_for_file(&file.id)?.pop();
            self.core
                .store
                .update_file_snapshot(&file.id, latest.as_ref().map(|s| s.id.as_str()))?;
        }
        self.core.sync_file(&file.id).await
    }

    async fn remove(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(task_id) = &snapshot.task_id {
            self.core.discard_task(task_id).await;
        }
        self.core.store.delete_snapshot(&snapshot.id)?;
        self.core.caches.snapshot.delete(&snapshot.id).await;
        for object in snapshot.objects() {
            if let Err(e) = self
                .core
                .objects
                .remove_object(&object.bucket, &object.key)
                .await
            {
                tracing::warn!(
                    "Failed to remove object {}/{}: {}",
                    object.bucket,
                    object.key,
                    e
                );
            }
        }
        Ok(())
    }

    async fn settled(&self, id: &str, user_id: &str) -> Result<(Snapshot, File)> {
        let (snapshot, file) = self
            .authorized(id, None, user_id, PermissionLevel::Editor)
            .await?;
        if !snapshot.status.is_terminal() {
            return Err(Error::conflict(
                "snapshot_is_processing",
                format!("snapshot is {}", snapshot.status),
            ));
        }
        Ok((snapshot, file))
    }

    /// Runs conversion again over a settled snapshot.
    pub async fn reprocess(&self, id: &str, user_id: &str) -> Result<Snapshot> {
        let (snapshot, file) = self.settled(id, user_id).await?;
        self.launch(snapshot, &file, user_id, true, None, HashMap::new())
            .await
    }

    /// Runs one named pipeline over a settled snapshot. OCR and entity runs
    /// need a known OCR language; watermark runs are stamped with the
    /// workspace name and the caller's username.
    pub async fn run_pipeline(
        &self,
        id: &str,
        pipeline: PipelineId,
        language: Option<&str>,
        user_id: &str,
    ) -> Result<Snapshot> {
        let (snapshot, file) = self.settled(id, user_id).await?;

        let mut payload = HashMap::new();
        match pipeline {
            PipelineId::Ocr | PipelineId::Entity => {
                let language = language
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .ok_or_else(|| Error::bad_request("language_is_undefined", "language is undefined"))?;
                if !self.core.store.ocr_language_exists(language)? {
                    return Err(Error::bad_request(
                        "invalid_language",
                        format!("'{language}' is not a known language"),
                    ));
                }
                payload.insert(PAYLOAD_LANGUAGE.to_string(), language.to_string());
            }
            PipelineId::Watermark => {
                let workspace = self.core.caches.workspace.get(&file.workspace_id).await?;
                let user = self
                    .core
                    .store
                    .get_user(user_id)?
                    .ok_or(Error::NotFound(Entity::User))?;
                payload.insert(PAYLOAD_WORKSPACE.to_string(), workspace.name);
                payload.insert(PAYLOAD_USER.to_string(), user.username);
            }
            _ => {}
        }

        tracing::info!("Running {} pipeline on snapshot {}", pipeline, snapshot.id);
        self.launch(snapshot, &file, user_id, true, Some(pipeline), payload)
            .await
    }

    /// Applies a patch coming from the conversion side.
    pub async fn patch(&self, id: &str, patch: &SnapshotPatch) -> Result<Snapshot> {
        self.core.patch_snapshot(id, patch).await
    }

    pub async fn purge(&self) -> Result<usize> {
        self.core.purge_dangling_snapshots().await
    }

    /// Records a new version of `file` over an uploaded original and starts
    /// its conversion. Originals above the processing limit are marked ready
    /// right away.
    pub(crate) async fn store(&self, file: &File, s3ref: &S3Reference, user_id: &str) -> Result<Snapshot> {
        let snapshot = Snapshot {
            id: s3ref.snapshot_id.clone(),
            version: 0,
            original: Some(s3ref.to_object()),
            preview: None,
            text: None,
            ocr: None,
            entities: None,
            mosaic: None,
            watermark: None,
            thumbnail: None,
            status: SnapshotStatus::Waiting,
            error: None,
            language: None,
            task_id: None,
            create_time: Utc::now(),
            update_time: None,
        };
        let snapshot = self.core.store.create_snapshot_for_file(&file.id, &snapshot)?;
        self.core.caches.snapshot.set(&snapshot).await;
        self.core.sync_file(&file.id).await?;
        tracing::info!(
            "Stored snapshot {} v{} for file {}",
            snapshot.id,
            snapshot.version,
            file.id
        );

        if s3ref.size > self.core.settings.file_processing_limit_bytes {
            tracing::info!(
                "Snapshot {} exceeds the processing limit, skipping conversion",
                snapshot.id
            );
            return self
                .core
                .patch_snapshot(&snapshot.id, &SnapshotPatch::new().status(SnapshotStatus::Ready))
                .await;
        }

        self.launch(snapshot, file, user_id, false, None, HashMap::new())
            .await
    }

    async fn launch(
        &self,
        snapshot: Snapshot,
        file: &File,
        user_id: &str,
        rerun: bool,
        pipeline_id: Option<PipelineId>,
        extra: HashMap<String, String>,
    ) -> Result<Snapshot> {
        let Some(original) = snapshot.original.clone() else {
            return Err(Error::bad_request("snapshot_has_no_original", "snapshot has no original"));
        };

        let task = self
            .core
            .create_task(user_id, "Waiting.", TaskStatus::Waiting, Some(&file.name))
            .await?;
        let snapshot = self
            .core
            .patch_snapshot(
                &snapshot.id,
                &SnapshotPatch::new().task_id(Some(task.id.clone())),
            )
            .await?;

        let mut payload = task.payload.clone().unwrap_or_default();
        payload.extend(extra);
        let opts = PipelineRunOptions {
            pipeline_id,
            task_id: Some(task.id.clone()),
            snapshot_id: snapshot.id.clone(),
            bucket: original.bucket,
            key: original.key,
            payload: (!payload.is_empty()).then_some(payload),
        };

        match self.launcher.run(opts).await {
            Ok(()) => Ok(snapshot),
            Err(e @ Error::AlreadyProcessing(_)) if rerun => {
                self.core.discard_task(&task.id).await;
                Err(e)
            }
            Err(e) => {
                tracing::error!("Failed to start conversion of {}: {}", snapshot.id, e);
                let message = e.to_string();
                let failed = TaskPatch::new()
                    .status(TaskStatus::Error)
                    .error(Some(message.clone()));
                if let Err(e) = self.core.patch_task(&task.id, &failed).await {
                    tracing::warn!("Failed to mark task {} as failed: {}", task.id, e);
                }
                if rerun {
                    return Err(e);
                }
                let patch = SnapshotPatch::new()
                    .status(SnapshotStatus::Error)
                    .error(Some(message));
                self.core.patch_snapshot(&snapshot.id, &patch).await
            }
        }
    }
}
