use async_trait::async_trait;

use super::ocr::unsupported;
use super::{Context, Pipeline};
use crate::conversion::identifier::{is_image, is_office, is_pdf, is_plain_text};
use crate::conversion::remotes::{WatermarkCategory, WatermarkRequest};
use crate::error::Result;
use crate::types::{
    PAYLOAD_USER, PAYLOAD_WORKSPACE, PipelineId, S3Object, SnapshotPatch, extension_of,
};

/// Stamps the workspace and user names onto a copy of the original.
pub struct WatermarkPipeline;

#[async_trait]
impl Pipeline for WatermarkPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Watermark
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        let key = &ctx.opts.key;
        let category = if is_image(key) {
            WatermarkCategory::Image
        } else if is_pdf(key) || is_office(key) || is_plain_text(key) {
            WatermarkCategory::Document
        } else {
            return Err(unsupported(key));
        };
        let service = ctx.remotes.watermark()?;

        ctx.stage("Applying watermark.").await?;
        let request = WatermarkRequest {
            bucket: ctx.opts.bucket.clone(),
            key: ctx.key(&format!("watermark{}", extension_of(key).unwrap_or_default())),
            category,
            values: [PAYLOAD_WORKSPACE, PAYLOAD_USER]
                .into_iter()
                .filter_map(|name| ctx.payload(name))
                .map(str::to_string)
                .collect(),
        };
        service.create(ctx.input(), &request).await?;

        let object = S3Object::new(&request.bucket, request.key, ctx.input_size());
        ctx.patch(SnapshotPatch::new().watermark(object)).await
    }
}
