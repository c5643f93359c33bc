//! Per-kind conversion pipelines and the context they run in.
//!
//! A pipeline is a sequence of stages. Each stage starts with
//! [`Context::stage`], which stops the run when its task was cancelled and
//! otherwise reports progress by renaming the task. Each stage patches only
//! the snapshot fields it produced.

mod audio_video;
mod entity;
mod image;
mod mosaic;
mod noop;
mod ocr;
mod office;
mod pdf;
mod watermark;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tempfile::TempDir;

pub use audio_video::AudioVideoPipeline;
pub use entity::{EntityPipeline, MAX_ENTITY_TEXT_LEN};
pub use image::ImagePipeline;
pub use mosaic::MosaicPipeline;
pub use noop::NoopPipeline;
pub use ocr::OcrPipeline;
pub use office::OfficePipeline;
pub use pdf::PdfPipeline;
pub use watermark::WatermarkPipeline;

use super::PipelineBackend;
use super::remotes::Remotes;
use super::tools::Tools;
use crate::error::{Error, Result};
use crate::storage::ObjectStore;
use crate::types::{PipelineId, PipelineRunOptions, S3Object, SnapshotPatch, TaskPatch, extension_of};

/// Bounds of generated image previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for PreviewLimits {
    fn default() -> Self {
        Self {
            max_width: 1280,
            max_height: 1280,
        }
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn id(&self) -> PipelineId;

    async fn run(&self, ctx: &Context) -> Result<()>;
}

#[must_use]
pub fn pipeline_for(id: PipelineId) -> &'static dyn Pipeline {
    match id {
        PipelineId::Pdf => &PdfPipeline,
        PipelineId::Office => &OfficePipeline,
        PipelineId::Image => &ImagePipeline,
        PipelineId::AudioVideo => &AudioVideoPipeline,
        PipelineId::Noop => &NoopPipeline,
        PipelineId::Ocr => &OcrPipeline,
        PipelineId::Entity => &EntityPipeline,
        PipelineId::Mosaic => &MosaicPipeline,
        PipelineId::Watermark => &WatermarkPipeline,
    }
}

/// One run over one snapshot. Owns the working directory, which is removed
/// with the context.
pub struct Context {
    pub opts: PipelineRunOptions,
    pub tools: Tools,
    pub limits: PreviewLimits,
    pub remotes: Remotes,
    backend: Arc<dyn PipelineBackend>,
    objects: Arc<dyn ObjectStore>,
    workdir: TempDir,
    input: PathBuf,
    input_size: i64,
}

impl Context {
    /// Downloads the original into a fresh working directory.
    pub async fn prepare(
        opts: PipelineRunOptions,
        tools: Tools,
        limits: PreviewLimits,
        remotes: Remotes,
        backend: Arc<dyn PipelineBackend>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let workdir = tools.runner.workdir()?;
        let input = workdir.path().join(format!(
            "original{}",
            extension_of(&opts.key).unwrap_or_default()
        ));
        objects.fget_object(&opts.bucket, &opts.key, &input).await?;
        let input_size = i64::try_from(tokio::fs::metadata(&input).await?.len()).unwrap_or(i64::MAX);

        Ok(Self {
            opts,
            tools,
            limits,
            remotes,
            backend,
            objects,
            workdir,
            input,
            input_size,
        })
    }

    #[must_use]
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// A path inside the working directory.
    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.workdir.path().join(name)
    }

    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Object key of a derivative of this snapshot.
    #[must_use]
    pub fn key(&self, name: &str) -> String {
        format!("{}/{}", self.opts.snapshot_id, name)
    }

    /// A run option passed along from the core, ignoring blank values.
    #[must_use]
    pub fn payload(&self, name: &str) -> Option<&str> {
        self.opts
            .payload
            .as_ref()
            .and_then(|p| p.get(name))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn input_size(&self) -> i64 {
        self.input_size
    }

    #[must_use]
    pub fn original(&self) -> S3Object {
        S3Object::new(&self.opts.bucket, &self.opts.key, self.input_size)
    }

    /// Fails with `Cancelled` when the task was cancelled, otherwise names
    /// the task after the stage.
    pub async fn stage(&self, name: &str) -> Result<()> {
        let Some(task_id) = &self.opts.task_id else {
            return Ok(());
        };
        if self.backend.is_task_cancelled(task_id).await? {
            return Err(Error::Cancelled(task_id.clone()));
        }
        if let Err(e) = self
            .backend
            .patch_task(task_id, &TaskPatch::new().name(name))
            .await
        {
            tracing::warn!("Failed to report stage of task {}: {}", task_id, e);
        }
        Ok(())
    }

    pub async fn patch(&self, patch: SnapshotPatch) -> Result<()> {
        self.backend
            .patch_snapshot(&self.opts.snapshot_id, &patch)
            .await
    }

    /// Stores a file from the working directory as a derivative.
    pub async fn upload(&self, name: &str, path: &Path, content_type: &str) -> Result<S3Object> {
        let key = self.key(name);
        let info = self
            .objects
            .fput_object(&self.opts.bucket, &key, path, content_type)
            .await?;
        Ok(S3Object::new(&self.opts.bucket, key, info.size))
    }

    pub async fn upload_text(&self, name: &str, text: &str) -> Result<S3Object> {
        let key = self.key(name);
        let info = self
            .objects
            .put_text(&self.opts.bucket, &key, text, "text/plain")
            .await?;
        Ok(S3Object::new(&self.opts.bucket, key, info.size))
    }

    pub async fn upload_json<T: Serialize + Sync>(&self, name: &str, value: &T) -> Result<S3Object> {
        let key = self.key(name);
        let body = serde_json::to_string(value)?;
        let info = self
            .objects
            .put_text(&self.opts.bucket, &key, &body, "application/json")
            .await?;
        Ok(S3Object::new(&self.opts.bucket, key, info.size))
    }

    /// Extracts the text layer of `pdf` and stores it as `text.txt`.
    /// Returns the trimmed text, empty when the PDF has none.
    pub async fn extract_text(&self, pdf: &Path) -> Result<String> {
        let output = self.path("text.txt");
        self.tools.pdf_to_text(pdf, &output).await?;
        let text = tokio::fs::read(&output).await?;
        self.store_text(&String::from_utf8_lossy(&text)).await
    }

    /// Stores `text` as the snapshot's `text.txt` unless it is blank.
    pub async fn store_text(&self, text: &str) -> Result<String> {
        let text = text.trim().to_string();
        if text.is_empty() {
            tracing::debug!("No text found in snapshot {}", self.opts.snapshot_id);
            return Ok(text);
        }
        let object = self.upload_text("text.txt", &text).await?;
        self.patch(SnapshotPatch::new().text(object)).await?;
        Ok(text)
    }

    /// Renders a thumbnail of `source`. Tool and upload failures are logged
    /// and skipped.
    pub async fn thumbnail(&self, source: &Path) -> Result<()> {
        self.stage("Creating thumbnail.").await?;

        let output = self.path("thumbnail.png");
        let result = async {
            let props = self.tools.thumbnail(source, &output).await?;
            let mut object = self.upload("thumbnail.png", &output, "image/png").await?;
            object.image = Some(props);
            Ok::<_, Error>(object)
        }
        .await;

        match result {
            Ok(object) => self.patch(SnapshotPatch::new().thumbnail(object)).await,
            Err(e) => {
                tracing::warn!(
                    "Failed to create thumbnail for snapshot {}: {}",
                    self.opts.snapshot_id,
                    e
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_for() {
        for id in [
            PipelineId::Pdf,
            PipelineId::Office,
            PipelineId::Image,
            PipelineId::AudioVideo,
            PipelineId::Noop,
            PipelineId::Ocr,
            PipelineId::Entity,
            PipelineId::Mosaic,
            PipelineId::Watermark,
        ] {
            assert_eq!(pipeline_for(id).id(), id);
        }
    }
}
