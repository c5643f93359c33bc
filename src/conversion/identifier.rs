//! Picks a pipeline from an object key's extension.

use crate::types::{PipelineId, extension_of};

const PDF: &[&str] = &[".pdf"];

const OFFICE: &[&str] = &[
    ".xls", ".doc", ".ppt", ".xlsx", ".docx", ".pptx", ".odt", ".ott", ".ods", ".ots", ".odp",
    ".otp", ".odg", ".otg", ".odf", ".odc", ".pages", ".numbers", ".key", ".rtf",
];

const PLAIN_TEXT: &[&str] = &[
    ".txt", ".html", ".js", ".jsx", ".ts", ".tsx", ".css", ".sass", ".scss", ".go", ".py", ".rb",
    ".java", ".c", ".h", ".cpp", ".hpp", ".json", ".yml", ".yaml", ".toml", ".md", ".csv",
];

const IMAGE: &[&str] = &[
    ".xpm", ".png", ".jpg", ".jpeg", ".jp2", ".gif", ".webp", ".tiff", ".tif", ".bmp", ".ico",
    ".heif", ".xcf", ".svg",
];

const NON_ALPHA_IMAGE: &[&str] = &[".jpg", ".jpeg", ".gif", ".tiff", ".tif", ".bmp"];

const VIDEO: &[&str] = &[
    ".ogv", ".mpeg", ".mov", ".mqv", ".mp4", ".webm", ".3gp", ".3g2", ".avi", ".flv", ".mkv",
    ".asf", ".m4v",
];

const AUDIO: &[&str] = &[
    ".oga", ".ogg", ".mp3", ".flac", ".midi", ".ape", ".mpc", ".amr", ".wav", ".aiff", ".au",
    ".aac", ".voc", ".m4a", ".qcp",
];

fn has_extension(key: &str, set: &[&str]) -> bool {
    extension_of(key).is_some_and(|ext| set.contains(&ext.as_str()))
}

#[must_use]
pub fn is_pdf(key: &str) -> bool {
    has_extension(key, PDF)
}

#[must_use]
pub fn is_office(key: &str) -> bool {
    has_extension(key, OFFICE)
}

#[must_use]
pub fn is_plain_text(key: &str) -> bool {
    has_extension(key, PLAIN_TEXT)
}

#[must_use]
pub fn is_image(key: &str) -> bool {
    has_extension(key, IMAGE)
}

/// Image formats without an alpha channel.
#[must_use]
pub fn is_non_alpha_image(key: &str) -> bool {
    has_extension(key, NON_ALPHA_IMAGE)
}

#[must_use]
pub fn is_tiff(key: &str) -> bool {
    has_extension(key, &[".tiff", ".tif"])
}

#[must_use]
pub fn is_video(key: &str) -> bool {
    has_extension(key, VIDEO)
}

#[must_use]
pub fn is_audio(key: &str) -> bool {
    has_extension(key, AUDIO)
}

/// The pipeline for `key`; unknown extensions get [`PipelineId::Noop`].
#[must_use]
pub fn identify(key: &str) -> PipelineId {
    if is_pdf(key) {
        PipelineId::Pdf
    } else if is_office(key) || is_plain_text(key) {
        PipelineId::Office
    } else if is_image(key) {
        PipelineId::Image
    } else if is_audio(key) || is_video(key) {
        PipelineId::AudioVideo
    } else {
        PipelineId::Noop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify() {
        assert_eq!(identify("s1/original.pdf"), PipelineId::Pdf);
        assert_eq!(identify("s1/original.DOCX"), PipelineId::Office);
        assert_eq!(identify("s1/original.md"), PipelineId::Office);
        assert_eq!(identify("s1/original.png"), PipelineId::Image);
        assert_eq!(identify("s1/original.mp4"), PipelineId::AudioVideo);
        assert_eq!(identify("s1/original.flac"), PipelineId::AudioVideo);
        assert_eq!(identify("s1/original.zip"), PipelineId::Noop);
        assert_eq!(identify("s1/original"), PipelineId::Noop);
    }

    #[test]
    fn test_image_variants() {
        assert!(is_tiff("a/b.TIF"));
        assert!(is_non_alpha_image("photo.jpeg"));
        assert!(!is_non_alpha_image("logo.png"));
    }
}
