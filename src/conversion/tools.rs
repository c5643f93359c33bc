use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::runner::ToolRunner;
use crate::error::{Error, Result};
use crate::types::ImageProps;

/// Longest edge of generated thumbnails, in pixels.
pub const THUMBNAIL_MAX_EDGE: u32 = 512;

/// Program names of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolbox {
    pub magick: String,
    pub pdftotext: String,
    pub pdfinfo: String,
    pub soffice: String,
    pub ffmpeg: String,
    pub ocrmypdf: String,
}

impl Default for Toolbox {
    fn default() -> Self {
        Self {
            magick: "magick".to_string(),
            pdftotext: "pdftotext".to_string(),
            pdfinfo: "pdfinfo".to_string(),
            soffice: "soffice".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ocrmypdf: "ocrmypdf".to_string(),
        }
    }
}

/// The tool invocations the pipelines are built from.
#[derive(Debug, Clone, Default)]
pub struct Tools {
    pub runner: ToolRunner,
    pub toolbox: Toolbox,
}

/// `path[0]` selects the first frame or page in ImageMagick.
fn first_frame(path: &Path) -> OsString {
    let mut arg = path.as_os_str().to_owned();
    arg.push("[0]");
    arg
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

impl Tools {
    #[must_use]
    pub fn new(runner: ToolRunner, toolbox: Toolbox) -> Self {
        Self { runner, toolbox }
    }

    pub async fn image_size(&self, input: &Path) -> Result<ImageProps> {
        let args = [
            OsString::from("identify"),
            OsString::from("-format"),
            OsString::from("%w %h"),
            first_frame(input),
        ];
        let out = self
            .runner
            .run(&self.toolbox.magick, args, parent_of(input))
            .await?;
        parse_image_size(&String::from_utf8_lossy(&out))
    }

    /// Writes a PNG thumbnail no larger than [`THUMBNAIL_MAX_EDGE`] on either side.
    pub async fn thumbnail(&self, input: &Path, output: &Path) -> Result<ImageProps> {
        let geometry = format!("{THUMBNAIL_MAX_EDGE}x{THUMBNAIL_MAX_EDGE}>");
        let args = [
            first_frame(input),
            OsString::from("-thumbnail"),
            OsString::from(geometry),
            output.as_os_str().to_owned(),
        ];
        self.runner
            .run(&self.toolbox.magick, args, parent_of(output))
            .await?;
        self.image_size(output).await
    }

    /// Converts by output extension, shrinking to fit `max` when given.
    pub async fn convert_image(
        &self,
        input: &Path,
        output: &Path,
        max: Option<(u32, u32)>,
    ) -> Result<ImageProps> {
        let mut args = vec![first_frame(input)];
        if let Some((width, height)) = max {
            args.push(OsString::from("-resize"));
            args.push(OsString::from(format!("{width}x{height}>")));
        }
        args.push(output.as_os_str().to_owned());
        self.runner
            .run(&self.toolbox.magick, args, parent_of(output))
            .await?;
        self.image_size(output).await
    }

    /// Horizontal resolution in pixels per inch; `None` when the image
    /// does not record one.
    pub async fn image_dpi(&self, input: &Path) -> Result<Option<u32>> {
        let args = [
            OsString::from("identify"),
            OsString::from("-units"),
            OsString::from("PixelsPerInch"),
            OsString::from("-format"),
            OsString::from("%x"),
            first_frame(input),
        ];
        let out = self
            .runner
            .run(&self.toolbox.magick, args, parent_of(input))
            .await?;
        Ok(parse_dpi(&String::from_utf8_lossy(&out)))
    }

    pub async fn remove_alpha(&self, input: &Path, output: &Path) -> Result<()> {
        let args = [
            input.as_os_str().to_owned(),
            OsString::from("-alpha"),
            OsString::from("off"),
            output.as_os_str().to_owned(),
        ];
        self.runner
            .run(&self.toolbox.magick, args, parent_of(output))
            .await?;
        Ok(())
    }

    /// Writes a searchable PDF of `input` using the Tesseract model
    /// `language`. `dpi` is only passed for image input.
    pub async fn ocr_pdf(
        &self,
        input: &Path,
        language: &str,
        dpi: Option<u32>,
        output: &Path,
    ) -> Result<()> {
        let mut args = vec![
            OsString::from("--rotate-pages"),
            OsString::from("--clean"),
            OsString::from("--deskew"),
            OsString::from(format!("--language={language}")),
        ];
        match dpi {
            Some(dpi) => args.push(OsString::from(format!("--image-dpi={dpi}"))),
            None => args.push(OsString::from("--skip-text")),
        }
        args.push(input.as_os_str().to_owned());
        args.push(output.as_os_str().to_owned());
        self.runner
            .run(&self.toolbox.ocrmypdf, args, parent_of(output))
            .await?;
        Ok(())
    }

    pub async fn pdf_page_count(&self, input: &Path) -> Result<u32> {
        let out = self
            .runner
            .run(&self.toolbox.pdfinfo, [input.as_os_str()], parent_of(input))
            .await?;
        parse_page_count(&String::from_utf8_lossy(&out))
    }

    pub async fn pdf_to_text(&self, input: &Path, output: &Path) -> Result<()> {
        self.runner
            .run(
                &self.toolbox.pdftotext,
                [input.as_os_str(), output.as_os_str()],
                parent_of(output),
            )
            .await?;
        Ok(())
    }

    /// Renders the first PDF page to an image.
    pub async fn pdf_thumbnail(&self, input: &Path, output: &Path) -> Result<ImageProps> {
        self.thumbnail(input, output).await
    }

    /// Converts an office or text document to PDF inside `outdir` and
    /// returns the produced file.
    pub async fn office_to_pdf(&self, input: &Path, outdir: &Path) -> Result<PathBuf> {
        let args = [
            OsString::from("--headless"),
            OsString::from("--convert-to"),
            OsString::from("pdf"),
            OsString::from("--outdir"),
            outdir.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ];
        self.runner.run(&self.toolbox.soffice, args, outdir).await?;

        let stem = input
            .file_stem()
            .ok_or_else(|| Error::Command(format!("{} has no file name", input.display())))?;
        let output = outdir.join(stem).with_extension("pdf");
        if !tokio::fs::try_exists(&output).await? {
            return Err(Error::Command(format!(
                "{} produced no PDF for {}",
                self.toolbox.soffice,
                input.display()
            )));
        }
        Ok(output)
    }

    /// Grabs the first video frame as an image.
    pub async fn video_frame(&self, input: &Path, output: &Path) -> Result<()> {
        let args = [
            OsString::from("-y"),
            OsString::from("-i"),
            input.as_os_str().to_owned(),
            OsString::from("-frames:v"),
            OsString::from("1"),
            output.as_os_str().to_owned(),
        ];
        self.runner
            .run(&self.toolbox.ffmpeg, args, parent_of(output))
            .await?;
        Ok(())
    }
}

fn parse_image_size(out: &str) -> Result<ImageProps> {
    let mut parts = out.split_whitespace().map(str::parse::<u32>);
    match (parts.next(), parts.next()) {
        (Some(Ok(width)), Some(Ok(height))) => Ok(ImageProps { width, height }),
        _ => Err(Error::Command(format!("unexpected image size output '{}'", out.trim()))),
    }
}

fn parse_dpi(out: &str) -> Option<u32> {
    let value: f64 = out.split_whitespace().next()?.parse().ok()?;
    // ImageMagick reports 0 when the file has no density.
    (value >= 1.0).then(|| value.round() as u32)
}

fn parse_page_count(out: &str) -> Result<u32> {
    out.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|n| n.trim().parse().ok())
        .ok_or_else(|| Error::Command("page count missing from pdfinfo output".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_size() {
        let props = parse_image_size("640 480").unwrap();
        assert_eq!((props.width, props.height), (640, 480));
        assert!(parse_image_size("oops").is_err());
    }

    #[test]
    fn test_parse_page_count() {
        let out = "Title:          Report\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_page_count(out).unwrap(), 12);
        assert!(parse_page_count("Title: x").is_err());
    }

    #[test]
    fn test_parse_dpi() {
        assert_eq!(parse_dpi("300"), Some(300));
        assert_eq!(parse_dpi("71.9836"), Some(72));
        assert_eq!(parse_dpi("0"), None);
        assert_eq!(parse_dpi("undefined"), None);
    }

    #[test]
    fn test_first_frame() {
        assert_eq!(first_frame(Path::new("/tmp/a.tif")), OsString::from("/tmp/a.tif[0]"));
    }
}
