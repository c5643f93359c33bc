use std::path::PathBuf;

use async_trait::async_trait;

use super::{Context, Pipeline};
use crate::conversion::identifier::{is_image, is_pdf};
use crate::error::{Error, Result};
use crate::types::{DocumentProps, PAYLOAD_LANGUAGE, PipelineId, SnapshotPatch, extension_of};

/// Assumed when an image records no resolution.
const DEFAULT_DPI: u32 = 72;

/// Builds a searchable PDF from a scanned image or PDF, then extracts its
/// text.
pub struct OcrPipeline;

#[async_trait]
impl Pipeline for OcrPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Ocr
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        let language = required_language(ctx)?;
        ctx.stage("Extracting text.").await?;
        let pdf = searchable_pdf(ctx, language).await?;
        ctx.extract_text(&pdf).await?;
        Ok(())
    }
}

pub(super) fn required_language(ctx: &Context) -> Result<&str> {
    ctx.payload(PAYLOAD_LANGUAGE)
        .ok_or_else(|| Error::bad_request("language_is_undefined", "language is undefined"))
}

pub(super) fn unsupported(key: &str) -> Error {
    Error::bad_request(
        "unsupported_file_type",
        format!("unsupported file type {}", extension_of(key).unwrap_or_default()),
    )
}

/// Stores the OCR result as `ocr.pdf`, records the language on the
/// snapshot and returns the local PDF.
pub(super) async fn searchable_pdf(ctx: &Context, language: &str) -> Result<PathBuf> {
    let key = &ctx.opts.key;
    let output = ctx.path("ocr.pdf");
    if is_image(key) {
        let dpi = match ctx.tools.image_dpi(ctx.input()).await {
            Ok(dpi) => dpi.unwrap_or(DEFAULT_DPI),
            Err(e) => {
                tracing::debug!("No resolution for snapshot {}: {}", ctx.opts.snapshot_id, e);
                DEFAULT_DPI
            }
        };
        // Tesseract rejects images with an alpha channel.
        let flat = ctx.path(&format!("flat{}", extension_of(key).unwrap_or_default()));
        ctx.tools.remove_alpha(ctx.input(), &flat).await?;
        ctx.tools.ocr_pdf(&flat, language, Some(dpi), &output).await?;
    } else if is_pdf(key) {
        ctx.tools.ocr_pdf(ctx.input(), language, None, &output).await?;
    } else {
        return Err(unsupported(key));
    }

    let page_count = ctx.tools.pdf_page_count(&output).await?;
    let mut object = ctx.upload("ocr.pdf", &output, "application/pdf").await?;
    object.document = Some(DocumentProps {
        page_count: Some(page_count),
        extension: Some(".pdf".to_string()),
    });
    ctx.patch(
        SnapshotPatch::new()
            .ocr(object)
            .language(Some(language.to_string())),
    )
    .await?;
    Ok(output)
}
