use async_trait::async_trait;

use super::{Context, Pipeline};
use crate::conversion::identifier::{is_non_alpha_image, is_tiff};
use crate::error::Result;
use crate::types::{PipelineId, SnapshotPatch};

pub struct ImagePipeline;

#[async_trait]
impl Pipeline for ImagePipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Image
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        ctx.stage("Measuring image dimensions.").await?;
        let props = ctx.tools.image_size(ctx.input()).await?;
        let mut original = ctx.original();
        original.image = Some(props);
        ctx.patch(SnapshotPatch::new().original(original.clone()))
            .await?;

        let limits = ctx.limits;
        let oversized = props.width > limits.max_width || props.height > limits.max_height;
        let key = &ctx.opts.key;
        let preview = if is_tiff(key) || oversized {
            // Formats that may carry alpha keep it in a PNG preview.
            let name = if is_tiff(key) || is_non_alpha_image(key) {
                "preview.jpg"
            } else {
                "preview.png"
            };
            let content_type = if name.ends_with(".jpg") { "image/jpeg" } else { "image/png" };
            let output = ctx.path(name);
            let props = ctx
                .tools
                .convert_image(
                    ctx.input(),
                    &output,
                    Some((limits.max_width, limits.max_height)),
                )
                .await?;
            let mut preview = ctx.upload(name, &output, content_type).await?;
            preview.image = Some(props);
            preview
        } else {
            original
        };
        ctx.patch(SnapshotPatch::new().preview(preview)).await?;

        ctx.thumbnail(ctx.input()).await
    }
}
