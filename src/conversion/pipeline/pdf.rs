use std::path::Path;

use async_trait::async_trait;

use super::{Context, Pipeline};
use crate::error::Result;
use crate::types::{DocumentProps, PipelineId, S3Object, SnapshotPatch};

pub struct PdfPipeline;

#[async_trait]
impl Pipeline for PdfPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Pdf
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        process_pdf(ctx, ctx.input(), ctx.original()).await
    }
}

/// Page count and preview, then thumbnail, then text. `preview` is the
/// object already holding `pdf`.
pub(super) async fn process_pdf(ctx: &Context, pdf: &Path, mut preview: S3Object) -> Result<()> {
    let page_count = ctx.tools.pdf_page_count(pdf).await?;
    preview.document = Some(DocumentProps {
        page_count: Some(page_count),
        extension: Some(".pdf".to_string()),
    });
    ctx.patch(SnapshotPatch::new().preview(preview)).await?;

    ctx.thumbnail(pdf).await?;

    ctx.stage("Extracting text.").await?;
    ctx.extract_text(pdf).await?;
    Ok(())
}
