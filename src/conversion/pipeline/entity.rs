use async_trait::async_trait;

use super::ocr::{required_language, searchable_pdf, unsupported};
use super::{Context, Pipeline};
use crate::conversion::identifier::{is_image, is_office, is_pdf, is_plain_text};
use crate::error::{Error, Result};
use crate::types::{PipelineId, SnapshotPatch};

/// Longest text, in characters, sent for entity extraction.
pub const MAX_ENTITY_TEXT_LEN: usize = 1_000_000;

/// Gets the text of a document, OCR-ing images, and stores the named
/// entities the language service finds in it as `entities.json`.
pub struct EntityPipeline;

#[async_trait]
impl Pipeline for EntityPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Entity
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        let language = required_language(ctx)?;
        let service = ctx.remotes.language()?;

        ctx.stage("Extracting text.").await?;
        let key = &ctx.opts.key;
        let text = if is_plain_text(key) {
            let bytes = tokio::fs::read(ctx.input()).await?;
            ctx.store_text(&String::from_utf8_lossy(&bytes)).await?
        } else if is_pdf(key) {
            ctx.extract_text(ctx.input()).await?
        } else if is_office(key) {
            let outdir = ctx.path("pdf");
            tokio::fs::create_dir_all(&outdir).await?;
            let pdf = ctx.tools.office_to_pdf(ctx.input(), &outdir).await?;
            ctx.extract_text(&pdf).await?
        } else if is_image(key) {
            let pdf = searchable_pdf(ctx, language).await?;
            ctx.extract_text(&pdf).await?
        } else {
            return Err(unsupported(key));
        };

        ctx.stage("Collecting entities.").await?;
        if text.is_empty() {
            return Err(Error::bad_request("text_is_empty", "text is empty"));
        }
        if text.chars().count() > MAX_ENTITY_TEXT_LEN {
            return Err(Error::bad_request(
                "text_too_long",
                format!("text exceeds supported limit of {MAX_ENTITY_TEXT_LEN} characters"),
            ));
        }
        let entities = service.entities(&text, language).await?;
        tracing::debug!(
            "Found {} entities in snapshot {}",
            entities.len(),
            ctx.opts.snapshot_id
        );
        let object = ctx.upload_json("entities.json", &entities).await?;
        ctx.patch(SnapshotPatch::new().entities(object)).await
    }
}
