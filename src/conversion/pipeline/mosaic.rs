use async_trait::async_trait;

use super::ocr::unsupported;
use super::{Context, Pipeline};
use crate::conversion::identifier::is_image;
use crate::error::Result;
use crate::types::{ImageProps, PipelineId, S3Object, SnapshotPatch, extension_of};

/// Formats the mosaic service tiles as they are.
const TILEABLE: &[&str] = &[".jpg", ".jpeg", ".png"];

/// Has a large image cut into zoomable tiles under `<snapshot>/mosaic`.
pub struct MosaicPipeline;

#[async_trait]
impl Pipeline for MosaicPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Mosaic
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        let key = &ctx.opts.key;
        if !is_image(key) {
            return Err(unsupported(key));
        }
        let service = ctx.remotes.mosaic()?;

        ctx.stage("Creating mosaic.").await?;
        let tileable = extension_of(key).is_some_and(|ext| TILEABLE.contains(&ext.as_str()));
        let source = if tileable {
            ctx.input().to_path_buf()
        } else {
            let output = ctx.path("mosaic.jpg");
            ctx.tools.convert_image(ctx.input(), &output, None).await?;
            output
        };

        let target = ctx.key("mosaic");
        let metadata = service.create(&source, &ctx.opts.bucket, &target).await?;
        let mut object = S3Object::new(&ctx.opts.bucket, target, 0);
        object.image = Some(ImageProps {
            width: metadata.width,
            height: metadata.height,
        });
        ctx.patch(SnapshotPatch::new().mosaic(object)).await
    }
}
