use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::PipelineBackend;
use super::identifier::identify;
use super::pipeline::{Context, PreviewLimits, pipeline_for};
use super::remotes::Remotes;
use super::tools::Tools;
use crate::error::{Error, Result};
use crate::storage::ObjectStore;
use crate::types::{PipelineRunOptions, SnapshotPatch, SnapshotStatus, TaskPatch, TaskStatus};

pub const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub tools: Tools,
    pub limits: PreviewLimits,
    pub remotes: Remotes,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, usize::from),
            tools: Tools::default(),
            limits: PreviewLimits::default(),
            remotes: Remotes::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub workers: usize,
    pub active: usize,
    pub queued: usize,
}

/// Runs pipelines on a bounded pool of workers, at most one per snapshot.
pub struct Scheduler {
    backend: Arc<dyn PipelineBackend>,
    objects: Arc<dyn ObjectStore>,
    options: SchedulerOptions,
    permits: Arc<Semaphore>,
    snapshots: Mutex<HashSet<String>>,
    queued: AtomicUsize,
    active: AtomicUsize,
    shutting_down: AtomicBool,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(
        backend: Arc<dyn PipelineBackend>,
        objects: Arc<dyn ObjectStore>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let workers = options.workers.max(1);
        Arc::new(Self {
            backend,
            objects,
            permits: Arc::new(Semaphore::new(workers)),
            options: SchedulerOptions { workers, ..options },
            snapshots: Mutex::new(HashSet::new()),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        })
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            workers: self.options.workers,
            active: self.active.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }

    /// Whether a run for the snapshot is queued or in progress.
    #[must_use]
    pub fn is_processing(&self, snapshot_id: &str) -> bool {
        self.snapshots
            .lock()
            .is_ok_and(|snapshots| snapshots.contains(snapshot_id))
    }

    fn claim(&self, snapshot_id: &str) -> Result<()> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| Error::Internal("scheduler lock poisoned".to_string()))?;
        if !snapshots.insert(snapshot_id.to_string()) {
            return Err(Error::AlreadyProcessing(snapshot_id.to_string()));
        }
        Ok(())
    }

    fn release(&self, snapshot_id: &str) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.remove(snapshot_id);
        }
    }

    /// Accepts a run and moves the snapshot to `processing`. The pipeline
    /// itself runs in the background.
    pub async fn submit(self: &Arc<Self>, opts: PipelineRunOptions) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::Unavailable);
        }
        self.claim(&opts.snapshot_id)?;

        let mut patch = SnapshotPatch::new().status(SnapshotStatus::Processing);
        if opts.task_id.is_some() {
            patch = patch.task_id(opts.task_id.clone());
        }
        if let Err(e) = self.backend.patch_snapshot(&opts.snapshot_id, &patch).await {
            self.release(&opts.snapshot_id);
            return Err(match e {
                Error::StatusConflict { .. } | Error::Api { status: 409, .. } => {
                    Error::AlreadyProcessing(opts.snapshot_id)
                }
                e => e,
            });
        }
        if let Some(task_id) = &opts.task_id {
            let patch = TaskPatch::new()
                .name("Processing.")
                .status(TaskStatus::Running);
            if let Err(e) = self.backend.patch_task(task_id, &patch).await {
                tracing::warn!("Failed to mark task {} running: {}", task_id, e);
            }
        }

        tracing::info!("Accepted snapshot {} for processing", opts.snapshot_id);
        self.queued.fetch_add(1, Ordering::SeqCst);
        let scheduler = Arc::clone(self);
        self.tracker.spawn(async move { scheduler.execute(opts).await });
        Ok(())
    }

    async fn execute(&self, opts: PipelineRunOptions) {
        let permit = self.permits.clone().acquire_owned().await;
        self.queued.fetch_sub(1, Ordering::SeqCst);

        let result = match permit {
            Ok(_permit) => {
                self.active.fetch_add(1, Ordering::SeqCst);
                let result = self.process(&opts).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                result
            }
            Err(_) => Err(Error::Unavailable),
        };

        self.finish(&opts, result).await;
        self.release(&opts.snapshot_id);
    }

    async fn process(&self, opts: &PipelineRunOptions) -> Result<()> {
        let pipeline = pipeline_for(opts.pipeline_id.unwrap_or_else(|| identify(&opts.key)));
        tracing::debug!(
            "Running {} pipeline for snapshot {}",
            pipeline.id(),
            opts.snapshot_id
        );
        let ctx = Context::prepare(
            opts.clone(),
            self.options.tools.clone(),
            self.options.limits,
            self.options.remotes.clone(),
            self.backend.clone(),
            self.objects.clone(),
        )
        .await?;
        pipeline.run(&ctx).await
    }

    /// Terminal writes, applied only while the snapshot is still
    /// `processing`. The snapshot loses its task id either way; a successful
    /// task is removed, a failed one stays for the user to see.
    async fn finish(&self, opts: &PipelineRunOptions, result: Result<()>) {
        let snapshot_id = &opts.snapshot_id;
        let (snapshot_patch, task_patch) = match &result {
            Ok(()) => (
                SnapshotPatch::new()
                    .status(SnapshotStatus::Ready)
                    .task_id(None)
                    .expect_status(SnapshotStatus::Processing),
                TaskPatch::new().name("Done.").status(TaskStatus::Success),
            ),
            Err(e) => {
                tracing::error!("Pipeline for snapshot {} failed: {}", snapshot_id, e);
                let message = e.to_string();
                (
                    SnapshotPatch::new()
                        .status(SnapshotStatus::Error)
                        .error(Some(message.clone()))
                        .task_id(None)
                        .expect_status(SnapshotStatus::Processing),
                    TaskPatch::new()
                        .status(TaskStatus::Error)
                        .error(Some(message)),
                )
            }
        };

        match self.backend.patch_snapshot(snapshot_id, &snapshot_patch).await {
            Ok(()) => {}
            Err(e @ (Error::StatusConflict { .. } | Error::Api { status: 409, .. })) => {
                tracing::warn!("Snapshot {} left processing before its run ended: {}", snapshot_id, e);
            }
            Err(e) => tracing::error!("Failed to finalize snapshot {}: {}", snapshot_id, e),
        }

        let Some(task_id) = &opts.task_id else {
            return;
        };
        if let Err(e) = self.backend.patch_task(task_id, &task_patch).await {
            tracing::warn!("Failed to update task {}: {}", task_id, e);
        }
        if result.is_ok() {
            if let Err(e) = self.backend.delete_task(task_id).await {
                tracing::warn!("Failed to delete task {}: {}", task_id, e);
            }
        } else {
            tracing::info!("Snapshot {} ended in error", snapshot_id);
        }
    }

    /// Logs the queue while there is work.
    pub fn spawn_status_logger(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let status = scheduler.status();
                if status.active > 0 || status.queued > 0 {
                    tracing::info!(
                        "Scheduler: {} active, {} queued, {} workers",
                        status.active,
                        status.queued,
                        status.workers
                    );
                }
            }
        })
    }

    /// Rejects new runs and waits for the accepted ones.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Waits until every accepted run has finished.
    pub async fn drain(&self) {
        while self.tracker.len() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsObjectStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingBackend {
        snapshots: StdMutex<Vec<SnapshotPatch>>,
        deleted: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl PipelineBackend for RecordingBackend {
        async fn patch_snapshot(&self, _id: &str, patch: &SnapshotPatch) -> Result<()> {
            self.snapshots.lock().unwrap().push(patch.clone());
            Ok(())
        }

        async fn patch_task(&self, _id: &str, _patch: &TaskPatch) -> Result<()> {
            Ok(())
        }

        async fn delete_task(&self, id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn is_task_cancelled(&self, _id: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn run_options(snapshot_id: &str) -> PipelineRunOptions {
        PipelineRunOptions {
            pipeline_id: None,
            task_id: Some("t1".into()),
            snapshot_id: snapshot_id.into(),
            bucket: "bucket-one".into(),
            key: format!("{snapshot_id}/original.bin"),
            payload: None,
        }
    }

    #[tokio::test]
    async fn test_noop_run_marks_ready_and_removes_task() {
        let tmp = TempDir::new().unwrap();
        let objects = Arc::new(FsObjectStore::new(tmp.path().join("objects")));
        objects.make_bucket("bucket-one").await.unwrap();
        objects
            .put_object("bucket-one", "s1/original.bin", Bytes::from_static(b"hello"), "application/octet-stream")
            .await
            .unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let scheduler = Scheduler::new(backend.clone(), objects, SchedulerOptions::default());

        scheduler.submit(run_options("s1")).await.unwrap();
        scheduler.drain().await;

        let patches = backend.snapshots.lock().unwrap();
        assert_eq!(patches.first().unwrap().status, Some(SnapshotStatus::Processing));
        let last = patches.last().unwrap();
        assert_eq!(last.status, Some(SnapshotStatus::Ready));
        assert_eq!(last.expected_status, Some(SnapshotStatus::Processing));
        assert_eq!(*backend.deleted.lock().unwrap(), vec!["t1".to_string()]);
        assert!(!scheduler.is_processing("s1"));
    }

    #[tokio::test]
    async fn test_missing_original_marks_error() {
        let tmp = TempDir::new().unwrap();
        let objects = Arc::new(FsObjectStore::new(tmp.path().join("objects")));
        let backend = Arc::new(RecordingBackend::default());
        let scheduler = Scheduler::new(backend.clone(), objects, SchedulerOptions::default());

        scheduler.submit(run_options("s2")).await.unwrap();
        scheduler.drain().await;

        let patches = backend.snapshots.lock().unwrap();
        let last = patches.last().unwrap();
        assert_eq!(last.status, Some(SnapshotStatus::Error));
        assert_eq!(last.expected_status, Some(SnapshotStatus::Processing));
        assert!(last.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(backend.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_runs() {
        let tmp = TempDir::new().unwrap();
        let objects = Arc::new(FsObjectStore::new(tmp.path().join("objects")));
        let scheduler = Scheduler::new(
            Arc::new(RecordingBackend::default()),
            objects,
            SchedulerOptions::default(),
        );
        scheduler.shutdown().await;
        let err = scheduler.submit(run_options("s3")).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable));
    }
}
