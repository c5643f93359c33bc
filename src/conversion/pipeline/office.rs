use async_trait::async_trait;

use super::pdf::process_pdf;
use super::{Context, Pipeline};
use crate::error::Result;
use crate::types::PipelineId;

/// Office documents and plain text go through PDF.
pub struct OfficePipeline;

#[async_trait]
impl Pipeline for OfficePipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Office
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        ctx.stage("Converting to PDF.").await?;
        let outdir = ctx.path("pdf");
        tokio::fs::create_dir_all(&outdir).await?;
        let pdf = ctx.tools.office_to_pdf(ctx.input(), &outdir).await?;
        let preview = ctx.upload("preview.pdf", &pdf, "application/pdf").await?;

        process_pdf(ctx, &pdf, preview).await
    }
}
