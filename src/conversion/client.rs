//! The two seams between the core API and the conversion service.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use urlencoding::encode;

use super::scheduler::Scheduler;
use crate::error::{Error, Result};
use crate::remote::RemoteClient;
use crate::service::Core;
use crate::types::{PipelineRunOptions, SnapshotPatch, TaskPatch};

/// Starts pipeline runs. Implemented by the conversion service.
#[async_trait]
pub trait PipelineLauncher: Send + Sync {
    /// Accepts a run; fails with `AlreadyProcessing` when the snapshot has
    /// an active run.
    async fn run(&self, opts: PipelineRunOptions) -> Result<()>;
}

/// What pipelines write back into the core.
#[async_trait]
pub trait PipelineBackend: Send + Sync {
    async fn patch_snapshot(&self, id: &str, patch: &SnapshotPatch) -> Result<()>;

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<()>;

    async fn delete_task(&self, id: &str) -> Result<()>;

    async fn is_task_cancelled(&self, id: &str) -> Result<bool>;
}

/// Launches runs on an in-process scheduler.
pub struct LocalLauncher {
    scheduler: Arc<Scheduler>,
}

impl LocalLauncher {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl PipelineLauncher for LocalLauncher {
    async fn run(&self, opts: PipelineRunOptions) -> Result<()> {
        self.scheduler.submit(opts).await
    }
}

/// Launches runs on a remote conversion service.
pub struct HttpPipelineLauncher {
    client: RemoteClient,
}

impl HttpPipelineLauncher {
    pub fn new(conversion_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: RemoteClient::new(conversion_url)?.with_api_key(api_key),
        })
    }
}

#[async_trait]
impl PipelineLauncher for HttpPipelineLauncher {
    async fn run(&self, opts: PipelineRunOptions) -> Result<()> {
        let req = self
            .client
            .request(Method::POST, "/pipelines/run")
            .json(&opts);
        match self.client.send(req).await {
            Ok(_) => Ok(()),
            Err(Error::Api { status: 409, .. }) => Err(Error::AlreadyProcessing(opts.snapshot_id)),
            Err(Error::Api { status: 503, .. }) => Err(Error::Unavailable),
            Err(e) => Err(e),
        }
    }
}

/// Writes straight into the core when both run in one process.
pub struct LocalPipelineBackend {
    core: Arc<Core>,
}

impl LocalPipelineBackend {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl PipelineBackend for LocalPipelineBackend {
    async fn patch_snapshot(&self, id: &str, patch: &SnapshotPatch) -> Result<()> {
        self.core.patch_snapshot(id, patch).await?;
        Ok(())
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        self.core.patch_task(id, patch).await?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.core.delete_task(id).await
    }

    async fn is_task_cancelled(&self, id: &str) -> Result<bool> {
        self.core.is_task_cancelled(id).await
    }
}

#[derive(Deserialize)]
struct CancelledResponse {
    cancelled: bool,
}

/// Calls the core API's service endpoints with the shared API key.
pub struct HttpPipelineBackend {
    client: RemoteClient,
}

impl HttpPipelineBackend {
    pub fn new(api_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: RemoteClient::new(api_url)?.with_api_key(api_key),
        })
    }
}

#[async_trait]
impl PipelineBackend for HttpPipelineBackend {
    async fn patch_snapshot(&self, id: &str, patch: &SnapshotPatch) -> Result<()> {
        let req = self
            .client
            .request(Method::PATCH, &format!("/snapshots/{}", encode(id)))
            .json(patch);
        self.client.send(req).await?;
        Ok(())
    }

    async fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<()> {
        let req = self
            .client
            .request(Method::PATCH, &format!("/tasks/{}", encode(id)))
            .json(patch);
        self.client.send(req).await?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.client.delete(&format!("/tasks/{}", encode(id))).await
    }

    async fn is_task_cancelled(&self, id: &str) -> Result<bool> {
        match self
            .client
            .get::<CancelledResponse>(&format!("/tasks/{}/cancelled", encode(id)))
            .await
        {
            Ok(resp) => Ok(resp.cancelled),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }
}
