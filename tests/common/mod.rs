#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use uuid::Uuid;

use voltcore::auth::IdentityService;
use voltcore::cache::MemoryCache;
use voltcore::conversion::{
    LocalPipelineBackend, PipelineBackend, PipelineLauncher, Scheduler, SchedulerOptions,
};
use voltcore::error::Result;
use voltcore::search::MemorySearch;
use voltcore::service::{Core, CreateFileOptions, CreateWorkspaceOptions, Services, Settings};
use voltcore::storage::{FsObjectStore, ObjectStore};
use voltcore::store::{SqliteStore, Store};
use voltcore::types::{File, FileType, PipelineId, PipelineRunOptions, S3Reference, User, Workspace};

pub const PASSWORD: &str = "correct horse battery staple";

/// Records pipeline runs instead of starting them, so tests decide when and
/// how conversion happens.
#[derive(Default)]
pub struct RecordingLauncher {
    runs: Mutex<Vec<PipelineRunOptions>>,
}

impl RecordingLauncher {
    pub fn runs(&self) -> Vec<PipelineRunOptions> {
        self.runs.lock().unwrap().clone()
    }

    pub fn last(&self) -> PipelineRunOptions {
        self.runs().pop().expect("no pipeline run was launched")
    }
}

#[async_trait]
impl PipelineLauncher for RecordingLauncher {
    async fn run(&self, opts: PipelineRunOptions) -> Result<()> {
        self.runs.lock().unwrap().push(opts);
        Ok(())
    }
}

/// Every component wired in-process over a temp directory.
pub struct Fixture {
    pub temp_dir: TempDir,
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    pub core: Arc<Core>,
    pub services: Services,
    pub identity: Arc<IdentityService>,
    pub launcher: Arc<RecordingLauncher>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().expect("open store"));
        store.initialize().expect("create schema");
        let objects: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::new(temp_dir.path().join("objects")));

        let core = Core::new(
            store.clone(),
            objects.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(MemorySearch::new()),
            settings,
        );
        let launcher = Arc::new(RecordingLauncher::default());
        let services = Services::new(core.clone(), launcher.clone());
        let identity = Arc::new(IdentityService::new(store.clone(), 3600));

        Self {
            temp_dir,
            store,
            objects,
            core,
            services,
            identity,
            launcher,
        }
    }

    /// A scheduler writing back into this fixture's core.
    pub fn scheduler(&self, options: SchedulerOptions) -> Arc<Scheduler> {
        let backend: Arc<dyn PipelineBackend> =
            Arc::new(LocalPipelineBackend::new(self.core.clone()));
        Scheduler::new(backend, self.objects.clone(), options)
    }

    /// Runs the last launched pipeline to completion, forcing `pipeline`.
    pub async fn convert_last(&self, pipeline: PipelineId, options: SchedulerOptions) {
        let scheduler = self.scheduler(options);
        let opts = PipelineRunOptions {
            pipeline_id: Some(pipeline),
            ..self.launcher.last()
        };
        scheduler.submit(opts).await.expect("submit pipeline run");
        scheduler.shutdown().await;
    }

    pub fn user(&self, username: &str) -> User {
        self.identity
            .create_user(username, &format!("{username}@example.com"), username, PASSWORD)
            .expect("create user")
    }

    /// An organization owned by `owner` holding one workspace.
    pub async fn workspace(&self, owner: &User, name: &str, capacity: i64) -> Workspace {
        let org = self
            .services
            .organizations
            .create(&format!("{name} org"), &owner.id)
            .await
            .expect("create organization");
        self.services
            .workspaces
            .create(
                &CreateWorkspaceOptions {
                    name: name.to_string(),
                    organization_id: org.id,
                    storage_capacity: Some(capacity),
                },
                &owner.id,
            )
            .await
            .expect("create workspace")
    }

    pub async fn folder(&self, workspace: &Workspace, parent: &str, name: &str, user: &User) -> File {
        self.services
            .files
            .create(
                &CreateFileOptions {
                    workspace_id: workspace.id.clone(),
                    parent_id: Some(parent.to_string()),
                    name: name.to_string(),
                    file_type: FileType::Folder,
                },
                &user.id,
            )
            .await
            .expect("create folder")
    }

    /// Writes `content` into the workspace bucket and creates a file over it.
    pub async fn upload(
        &self,
        workspace: &Workspace,
        parent: &str,
        name: &str,
        content: &[u8],
        user: &User,
    ) -> File {
        let s3ref = self.put_original(workspace, name, content).await;
        self.services
            .files
            .create_from_s3(
                &CreateFileOptions {
                    workspace_id: workspace.id.clone(),
                    parent_id: Some(parent.to_string()),
                    name: name.to_string(),
                    file_type: FileType::File,
                },
                &s3ref,
                &user.id,
            )
            .await
            .expect("create file from s3")
    }

    pub async fn put_original(&self, workspace: &Workspace, name: &str, content: &[u8]) -> S3Reference {
        let snapshot_id = Uuid::new_v4().to_string();
        let key = S3Reference::original_key(&snapshot_id, name);
        self.objects
            .put_object(
                &workspace.bucket,
                &key,
                Bytes::copy_from_slice(content),
                "application/octet-stream",
            )
            .await
            .expect("put original");
        S3Reference {
            bucket: workspace.bucket.clone(),
            key,
            size: content.len() as i64,
            snapshot_id,
            content_type: None,
        }
    }
}
